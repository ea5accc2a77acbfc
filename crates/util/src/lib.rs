mod path_processing;
pub mod settings;

pub use path_processing::expand_tilde;
pub use settings::{Settings, SettingsError};

use once_cell::sync::Lazy;
use regex::Regex;

static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: )([\w\-\.=:/+ ]+)",
        r"(?i)(bearer )([\w\-\.=:/+]+)",
        r"(?i)([A-Z0-9_]*?(KEY|TOKEN|SECRET|PASSWORD)=)([^\s]+)",
        r#"(?i)("(?:accessToken|access_token|password)"\s*:\s*)("[^"]*")"#,
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Redacts values that look like secrets in a string.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for re in SENSITIVE_PATTERNS.iter() {
        redacted = re
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}<redacted>", prefix)
            })
            .to_string();
    }
    redacted
}

/// Shortens `text` to at most `max_len` characters, ending with `...` when cut.
pub fn truncate_for_display(text: &str, max_len: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_len {
        return trimmed.to_string();
    }

    // Reserve space for the trailing ellipsis.
    let target_len = max_len.saturating_sub(3);
    let truncated: String = trimmed.chars().take(target_len).collect();
    format!("{}...", truncated.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_redacted() {
        assert_eq!(redact_sensitive("Authorization: Bearer abc.def"), "Authorization: <redacted>");
        assert_eq!(redact_sensitive("FORMFLOW_ACCESS_TOKEN=abc123 next"), "FORMFLOW_ACCESS_TOKEN=<redacted> next");
        assert_eq!(redact_sensitive(r#"{"accessToken": "abc"}"#), r#"{"accessToken": <redacted>}"#);
        assert_eq!(redact_sensitive("vessel KW-1 accepted"), "vessel KW-1 accepted");
    }

    #[test]
    fn long_text_is_truncated() {
        assert_eq!(truncate_for_display("short", 10), "short");
        assert_eq!(truncate_for_display("Owner already has a pending request", 16), "Owner already...");
    }
}
