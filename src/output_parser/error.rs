//! Error types for the JSON recovery parser.

/// Maximum length of the raw-text excerpt carried by [`ParseError::Unparseable`].
pub const EXCERPT_LEN: usize = 200;

/// Errors returned by the recovery cascade.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    /// The model response was empty or whitespace-only.
    #[error("empty LLM response")]
    EmptyResponse,

    /// Every recovery strategy failed.
    #[error("could not recover JSON from LLM response: {excerpt}")]
    Unparseable {
        /// The first [`EXCERPT_LEN`] characters of the raw response.
        excerpt: String,
    },
}

impl ParseError {
    /// The raw-text excerpt for diagnostics (empty for [`ParseError::EmptyResponse`]).
    pub fn excerpt(&self) -> &str {
        match self {
            ParseError::EmptyResponse => "",
            ParseError::Unparseable { excerpt } => excerpt,
        }
    }
}

/// Truncate to at most `max_chars` characters, appending "..." if truncated.
///
/// Counts characters rather than bytes so multi-byte text never splits.
pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((byte_idx, _)) => format!("{}...", &s[..byte_idx]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_text_unchanged() {
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn truncate_long_text() {
        assert_eq!(truncate("abcdef", 3), "abc...");
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        assert_eq!(truncate("你好世界", 2), "你好...");
    }
}
