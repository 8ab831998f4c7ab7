use std::sync::OnceLock;

use common::error::AppError;
use text_splitter::{ChunkCapacity, ChunkConfig, TextSplitter};

/// One chunk candidate produced by the splitter, before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkCandidate {
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
}

/// Splits `text` into token-bounded chunks using the deployment's configured tokenizer as the
/// sizer, preferring paragraph breaks, then sentences, then a hard cut, per the overlap and
/// target-size budget. Offsets are byte offsets into `text` after normalization.
pub fn chunk_text(
    text: &str,
    target_tokens: usize,
    overlap_tokens: usize,
    tokenizer_name: &str,
) -> Result<Vec<ChunkCandidate>, AppError> {
    if target_tokens == 0 {
        return Err(AppError::Validation("chunk_target_tokens must be greater than zero".into()));
    }
    if overlap_tokens >= target_tokens {
        return Err(AppError::Validation(format!(
            "chunk_overlap_tokens ({overlap_tokens}) must be less than chunk_target_tokens ({target_tokens})"
        )));
    }

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let tokenizer = get_tokenizer(tokenizer_name)?;

    let capacity = ChunkCapacity::new(target_tokens)
        .with_max(max_chunk_tokens(target_tokens))
        .map_err(|err| AppError::Validation(format!("invalid chunk token bounds: {err}")))?;
    let config = ChunkConfig::new(capacity)
        .with_overlap(overlap_tokens)
        .map_err(|err| AppError::Validation(format!("invalid chunk overlap: {err}")))?
        .with_sizer(tokenizer);
    let splitter = TextSplitter::new(config);

    let candidates: Vec<ChunkCandidate> = splitter
        .chunk_indices(text)
        .map(|(offset, chunk)| ChunkCandidate {
            text: chunk.to_string(),
            char_start: offset,
            char_end: offset + chunk.len(),
        })
        .collect();

    Ok(candidates)
}

/// Allows the splitter to grow a chunk up to 15% past the target before a hard cut, matching
/// the paragraph-break tolerance in the boundary preference.
fn max_chunk_tokens(target_tokens: usize) -> usize {
    target_tokens + target_tokens / 100 * 15
}

fn get_tokenizer(name: &str) -> Result<&'static tokenizers::Tokenizer, AppError> {
    static TOKENIZER: OnceLock<Result<(String, tokenizers::Tokenizer), String>> = OnceLock::new();

    let cached = TOKENIZER.get_or_init(|| {
        tokenizers::Tokenizer::from_pretrained(name, None)
            .map(|tokenizer| (name.to_string(), tokenizer))
            .map_err(|err| format!("failed to initialize tokenizer '{name}': {err}"))
    });

    match cached {
        Ok((cached_name, tokenizer)) if cached_name == name => Ok(tokenizer),
        Ok((cached_name, _)) => Err(AppError::Ingestion(format!(
            "tokenizer already initialized as '{cached_name}', cannot switch to '{name}' within one process"
        ))),
        Err(err) => Err(AppError::Ingestion(err.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlap_greater_than_target() {
        let result = chunk_text("some text", 10, 10, "bert-base-cased");
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn empty_text_produces_no_chunks() {
        let chunks = chunk_text("   \n  ", 512, 128, "bert-base-cased").expect("chunk");
        assert!(chunks.is_empty());
    }

    #[test]
    fn offsets_are_monotonic_and_within_bounds() {
        let text = "Paragraph one has several words in it.\n\nParagraph two also has several words in it, continuing the thought further.";
        let chunks = chunk_text(text, 12, 2, "bert-base-cased").expect("chunk");
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.char_end <= text.len());
            assert!(chunk.char_start <= chunk.char_end);
            assert_eq!(&text[chunk.char_start..chunk.char_end], chunk.text);
        }
    }
}
