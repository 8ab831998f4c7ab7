use std::ffi::OsString;
use std::path::Path;

use common::error::AppError;
use unicode_normalization::UnicodeNormalization;

/// Maximum prompt size after normalization, per the flag-grammar contract.
const MAX_PROMPT_BYTES: usize = 50 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl Effort {
    pub fn as_flag(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Low,
    Medium,
    High,
}

impl Verbosity {
    pub fn as_flag(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// A single generation request. `model` is checked against the configured allow-list before
/// spawn; the closed `Effort`/`Verbosity` enums make out-of-grammar values unrepresentable.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub user_id: String,
    pub model: String,
    pub effort: Effort,
    pub verbosity: Verbosity,
    pub prompt: String,
}

/// Normalizes and validates a raw prompt: NFC, size-capped, null-byte free, control characters
/// other than `\n`/`\t` stripped.
pub fn sanitize_prompt(raw: &str) -> Result<String, AppError> {
    let normalized: String = raw.nfc().collect();

    if normalized.len() > MAX_PROMPT_BYTES {
        return Err(AppError::Validation(format!(
            "prompt exceeds {MAX_PROMPT_BYTES} bytes after normalization"
        )));
    }
    if normalized.contains('\0') {
        return Err(AppError::Validation("prompt contains a null byte".into()));
    }

    let cleaned: String = normalized
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect();

    Ok(cleaned)
}

/// Checks `model` against the configured allow-list, rejecting loudly before spawn.
pub fn check_model_allowed(model: &str, allowlist: &[String]) -> Result<(), AppError> {
    if allowlist.iter().any(|m| m == model) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "model '{model}' is not in the configured allow-list"
        )))
    }
}

/// Builds the argv for the child process. Never invokes a shell; the prompt itself is never
/// placed on the argv, only flags from the closed grammar.
pub fn build_argv(binary: &Path, request: &GenerationRequest, stream: bool) -> Vec<OsString> {
    let mut args = vec![binary.as_os_str().to_owned()];
    args.push("--model".into());
    args.push(request.model.clone().into());
    args.push("--effort".into());
    args.push(request.effort.as_flag().into());
    args.push("--verbosity".into());
    args.push(request.verbosity.as_flag().into());
    if stream {
        args.push("--stream".into());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_prompt_strips_control_chars_but_keeps_newlines_and_tabs() {
        let raw = "line one\n\tindented\u{7}bell";
        let cleaned = sanitize_prompt(raw).expect("sanitize");
        assert_eq!(cleaned, "line one\n\tindentedbell");
    }

    #[test]
    fn sanitize_prompt_rejects_null_byte() {
        let raw = "hello\0world";
        assert!(matches!(sanitize_prompt(raw), Err(AppError::Validation(_))));
    }

    #[test]
    fn sanitize_prompt_rejects_oversized_prompt() {
        let raw = "a".repeat(MAX_PROMPT_BYTES + 1);
        assert!(matches!(sanitize_prompt(&raw), Err(AppError::Validation(_))));
    }

    #[test]
    fn check_model_allowed_rejects_unknown_model() {
        let allowlist = vec!["default".to_string()];
        assert!(check_model_allowed("default", &allowlist).is_ok());
        assert!(check_model_allowed("sneaky", &allowlist).is_err());
    }

    #[test]
    fn build_argv_never_places_prompt_on_argv() {
        let request = GenerationRequest {
            user_id: "u1".into(),
            model: "default".into(),
            effort: Effort::Low,
            verbosity: Verbosity::Medium,
            prompt: "do not leak me onto argv".into(),
        };
        let argv = build_argv(Path::new("/usr/bin/generative-cli"), &request, true);
        let joined: Vec<String> = argv.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(!joined.iter().any(|a| a.contains("leak")));
        assert_eq!(
            joined,
            vec![
                "/usr/bin/generative-cli",
                "--model",
                "default",
                "--effort",
                "low",
                "--verbosity",
                "medium",
                "--stream",
            ]
        );
    }
}
