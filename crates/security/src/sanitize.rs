//! Sanitization of diagnostic text before it leaves the process boundary.
//!
//! Crash messages from in-process plugins can contain absolute paths and
//! arbitrarily long dumps. Paths become `[path]` and the text is capped.

use std::sync::LazyLock;

use regex_lite::Regex;

/// Maximum length, in characters, of a sanitized message.
pub const MAX_SANITIZED_LEN: usize = 256;

static ABSOLUTE_PATH: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(^|[\s('"=:,])(/[^\s'"(),:]+|[A-Za-z]:\\[^\s'"(),:]*)"#).ok()
});

/// Replace absolute filesystem paths with `[path]` and cap the length.
pub fn sanitize_message(message: &str) -> String {
    let replaced = match ABSOLUTE_PATH.as_ref() {
        Some(re) => re.replace_all(message, "${1}[path]").into_owned(),
        None => message.to_string(),
    };
    truncate(replaced.trim(), MAX_SANITIZED_LEN)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_paths_replaced() {
        assert_eq!(
            sanitize_message("panicked at /home/alice/src/plugin.rs:42:7"),
            "panicked at [path]:42:7"
        );
    }

    #[test]
    fn windows_paths_replaced() {
        assert_eq!(
            sanitize_message(r"failed to open C:\Users\bob\secret.txt"),
            "failed to open [path]"
        );
    }

    #[test]
    fn multiple_and_quoted_paths() {
        assert_eq!(
            sanitize_message("copy '/etc/passwd' to \"/tmp/x\""),
            "copy '[path]' to \"[path]\""
        );
    }

    #[test]
    fn relative_text_untouched() {
        assert_eq!(sanitize_message("index out of bounds: a/b"), "index out of bounds: a/b");
    }

    #[test]
    fn long_messages_capped() {
        let long = "x".repeat(1000);
        let out = sanitize_message(&long);
        assert_eq!(out.chars().count(), MAX_SANITIZED_LEN);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn multibyte_truncation_is_safe() {
        let long = "é".repeat(500);
        let out = sanitize_message(&long);
        assert!(out.chars().count() <= MAX_SANITIZED_LEN);
    }
}
