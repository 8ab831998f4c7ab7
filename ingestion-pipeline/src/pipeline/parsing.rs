use lopdf::Document;

use common::error::AppError;

use super::normalize::normalize_text;

const FAST_PATH_MIN_LEN: usize = 20;
const FAST_PATH_MIN_ASCII_RATIO: f64 = 0.7;

/// A contiguous run of parsed text anchored to its position in the (pre-normalization) source
/// document, with a page number when the source format carries one.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSegment {
    pub text: String,
    pub page_hint: Option<u32>,
}

/// Dispatches on content type to the matching parser, then normalizes every segment's text.
/// PDFs keep one segment per page so chunk boundaries can carry an accurate `page_hint`;
/// plain and rich text collapse to a single segment.
pub fn parse_segments(bytes: &[u8], mime_type: &str) -> Result<Vec<ParsedSegment>, AppError> {
    let segments = match mime_type {
        "application/pdf" => parse_pdf(bytes)?,
        "text/plain" | "application/octet-stream" | "text/x-rust" => vec![ParsedSegment {
            text: decode_utf8(bytes)?,
            page_hint: None,
        }],
        "text/markdown" | "text/html" | "text/rtf" | "application/rtf" => vec![ParsedSegment {
            text: flatten_rich_text(&decode_utf8(bytes)?),
            page_hint: None,
        }],
        other => return Err(AppError::Ingestion(format!("unsupported content type for ingestion: {other}"))),
    };

    Ok(segments
        .into_iter()
        .map(|segment| ParsedSegment {
            text: normalize_text(&segment.text),
            page_hint: segment.page_hint,
        })
        .filter(|segment| !segment.text.trim().is_empty())
        .collect())
}

fn decode_utf8(bytes: &[u8]) -> Result<String, AppError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|err| AppError::Ingestion(format!("file is not valid UTF-8 text: {err}")))
}

/// Strips Markdown/HTML/RTF markup down to its visible text. Deliberately simple: this is a
/// flattening pass, not a renderer, so headings and emphasis markers are just dropped.
fn flatten_rich_text(raw: &str) -> String {
    let mut plain = String::with_capacity(raw.len());
    let mut in_tag = false;
    for ch in raw.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if in_tag => {}
            '#' | '*' | '_' | '`' | '>' => {}
            _ => plain.push(ch),
        }
    }
    plain
}

/// Extracts text page by page via `lopdf`, preserving page numbers for citation hints. A page
/// whose extracted text doesn't clear the ASCII/letter-ratio heuristic (e.g. a scanned image
/// with no text layer) is dropped rather than surfaced as garbage; OCR is not implemented here.
fn parse_pdf(bytes: &[u8]) -> Result<Vec<ParsedSegment>, AppError> {
    let document = Document::load_mem(bytes)
        .map_err(|err| AppError::Ingestion(format!("failed to parse PDF: {err}")))?;

    let mut page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    page_numbers.sort_unstable();

    if page_numbers.is_empty() {
        return Err(AppError::Ingestion("PDF has no pages".into()));
    }

    let mut segments = Vec::with_capacity(page_numbers.len());
    for page_number in page_numbers {
        let text = document
            .extract_text(&[page_number])
            .map_err(|err| AppError::Ingestion(format!("failed to extract PDF page {page_number}: {err}")))?;

        if !looks_good_enough(&text) {
            continue;
        }

        segments.push(ParsedSegment {
            text,
            page_hint: Some(page_number),
        });
    }

    if segments.is_empty() {
        return Err(AppError::Ingestion(
            "PDF text extraction produced no usable pages; this document likely needs OCR, which is not implemented".into(),
        ));
    }

    Ok(segments)
}

/// Cheap heuristic rejecting pages whose extracted text is empty or mostly non-letter noise,
/// the signature of a scanned page with no embedded text layer.
fn looks_good_enough(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.len() < FAST_PATH_MIN_LEN {
        return false;
    }

    let total_chars = trimmed.chars().count() as f64;
    let ascii_chars = trimmed.chars().filter(char::is_ascii).count() as f64;
    if ascii_chars / total_chars < FAST_PATH_MIN_ASCII_RATIO {
        return false;
    }

    let letters = trimmed.chars().filter(|c| c.is_alphabetic()).count() as f64;
    letters / total_chars > 0.3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_single_segment() {
        let segments = parse_segments(b"hello world", "text/plain").expect("parse");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hello world");
        assert!(segments[0].page_hint.is_none());
    }

    #[test]
    fn markdown_is_flattened_to_plain_text() {
        let segments = parse_segments(b"# Heading\n\nSome *text*.", "text/markdown").expect("parse");
        assert_eq!(segments.len(), 1);
        assert!(!segments[0].text.contains('#'));
        assert!(!segments[0].text.contains('*'));
    }

    #[test]
    fn unsupported_mime_type_is_rejected() {
        let result = parse_segments(b"data", "image/png");
        assert!(matches!(result, Err(AppError::Ingestion(_))));
    }

    #[test]
    fn blank_segments_are_dropped() {
        let segments = parse_segments(b"   \n\t  ", "text/plain").expect("parse");
        assert!(segments.is_empty());
    }
}
