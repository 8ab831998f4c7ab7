use unicode_normalization::UnicodeNormalization;

/// Unifies line endings to `\n` and applies Unicode NFC normalization, so chunk offsets are
/// stable regardless of the source parser's newline convention or composed/decomposed input.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    unified.nfc().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unifies_crlf_and_cr_to_lf() {
        let normalized = normalize_text("line one\r\nline two\rline three");
        assert_eq!(normalized, "line one\nline two\nline three");
    }

    #[test]
    fn composes_combining_characters() {
        let decomposed = "e\u{0301}";
        let normalized = normalize_text(decomposed);
        assert_eq!(normalized, "\u{00e9}");
    }
}
