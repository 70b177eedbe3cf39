//! JSON recovery cascade.
//!
//! [`recover_json`] extracts one JSON value from model output that was asked
//! for JSON only but may arrive fenced, prefixed with chatter, or with several
//! objects in it. Strategies run cheapest first and the first success wins:
//!
//! 1. strip a leading code-fence opener (bare or `json`) and a trailing fence
//! 2. strip a short (< 100 chars) prose prefix before the first `{` or `[`
//! 3. parse the outermost `{...}` / `[...]` span of the cleaned text
//! 4. parse the cleaned text as-is
//! 5. brace-scan the raw text for top-level balanced objects and parse each,
//!    last one first by default ([`CandidateOrder`])
//!
//! If nothing parses the error carries the first 200 characters of the raw text.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::diagnostics::RecoveryDiagnostics;
use crate::output_parser::error::{truncate, ParseError, EXCERPT_LEN};
use crate::output_parser::extract::{
    balanced_objects, outermost_span, strip_code_fence, strip_prose_prefix, strip_think_tags,
};

/// Order in which brace-scan candidates are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandidateOrder {
    /// Later objects first. Models tend to put examples before the answer.
    #[default]
    LastFirst,
    /// Earlier objects first.
    FirstFirst,
}

/// Tuning knobs for the recovery cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryOptions {
    /// Brace-scan candidate ordering.
    pub candidate_order: CandidateOrder,
    /// Prose prefixes with at least this many characters are not stripped.
    pub max_prose_prefix: usize,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            candidate_order: CandidateOrder::LastFirst,
            max_prose_prefix: 100,
        }
    }
}

impl RecoveryOptions {
    /// Set the brace-scan candidate ordering.
    pub fn with_candidate_order(mut self, order: CandidateOrder) -> Self {
        self.candidate_order = order;
        self
    }
}

/// Recover a JSON value using default options.
///
/// # Examples
///
/// ```
/// use content_pipeline::output_parser::recover_json;
/// use serde_json::json;
///
/// let raw = "Here you go:\n```json\n{\"keywords\": [\"bag\"]}\n```";
/// assert_eq!(recover_json(raw).unwrap(), json!({"keywords": ["bag"]}));
/// ```
pub fn recover_json(raw: &str) -> Result<Value, ParseError> {
    recover_json_with(raw, &RecoveryOptions::default()).map(|(value, _)| value)
}

/// Recover a JSON value and deserialize it into `T`.
///
/// A value that is recovered but has the wrong shape is reported as
/// [`ParseError::Unparseable`] with the raw excerpt.
pub fn recover_json_as<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    let value = recover_json(raw)?;
    serde_json::from_value(value).map_err(|_| ParseError::Unparseable {
        excerpt: truncate(raw, EXCERPT_LEN),
    })
}

/// Run the full cascade, returning the value and what happened.
pub fn recover_json_with(
    raw: &str,
    options: &RecoveryOptions,
) -> Result<(Value, RecoveryDiagnostics), ParseError> {
    let mut diag = RecoveryDiagnostics::default();

    if raw.trim().is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    let without_think = strip_think_tags(raw);

    // Steps 1-2: cleaning transforms
    let (fenceless, fence_stripped) = strip_code_fence(&without_think);
    let (cleaned, prose_stripped) = strip_prose_prefix(fenceless, options.max_prose_prefix);
    diag.fence_stripped = fence_stripped;
    diag.prose_stripped = prose_stripped;

    // Step 3: outermost span
    if let Some(span) = outermost_span(cleaned) {
        if let Ok(value) = serde_json::from_str::<Value>(span) {
            diag.strategy = Some("span");
            tracing::debug!(strategy = "span", "recovered JSON from model output");
            return Ok((value, diag));
        }
    }

    // Step 4: cleaned text as-is (bare scalars, strings)
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        diag.strategy = Some("cleaned");
        tracing::debug!(strategy = "cleaned", "recovered JSON from model output");
        return Ok((value, diag));
    }

    // Step 5: brace-depth scan over the raw text
    let candidates = balanced_objects(raw);
    diag.candidates_found = candidates.len();

    let ordered: Vec<&str> = match options.candidate_order {
        CandidateOrder::LastFirst => candidates.iter().rev().copied().collect(),
        CandidateOrder::FirstFirst => candidates.clone(),
    };
    let parsed: Vec<Value> = ordered
        .iter()
        .filter_map(|c| serde_json::from_str::<Value>(c).ok())
        .collect();
    diag.candidates_parsed = parsed.len();

    if let Some(value) = parsed.into_iter().next() {
        diag.strategy = Some("brace_scan");
        if diag.ambiguous() {
            tracing::warn!(
                candidates = diag.candidates_found,
                parsed = diag.candidates_parsed,
                order = ?options.candidate_order,
                "multiple JSON objects in model output; picked one by ordering"
            );
        } else {
            tracing::debug!(strategy = "brace_scan", "recovered JSON from model output");
        }
        return Ok((value, diag));
    }

    Err(ParseError::Unparseable {
        excerpt: truncate(raw, EXCERPT_LEN),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Titles {
        titles: Vec<String>,
    }

    fn sample() -> Value {
        json!({
            "compliance": {
                "hasIssues": true,
                "issues": [{"original": "best", "fixed": "great"}],
                "fixedTitle": "A title",
                "fixedArticle": "Body with {braces} and \"quotes\""
            }
        })
    }

    #[test]
    fn clean_json_round_trips() {
        let v = sample();
        let raw = serde_json::to_string(&v).unwrap();
        assert_eq!(recover_json(&raw).unwrap(), v);
    }

    #[test]
    fn clean_array_round_trips() {
        let v = json!([1, "two", {"three": 3}]);
        assert_eq!(recover_json(&v.to_string()).unwrap(), v);
    }

    #[test]
    fn fenced_with_prose_prefix_recovers() {
        let v = sample();
        let raw = format!(
            "Sure, here is the result:\n```json\n{}\n```",
            serde_json::to_string(&v).unwrap()
        );
        assert_eq!(recover_json(&raw).unwrap(), v);
    }

    #[test]
    fn fenced_pretty_printed_recovers() {
        let v = sample();
        let raw = format!("```json\n{}\n```", serde_json::to_string_pretty(&v).unwrap());
        let (value, diag) = recover_json_with(&raw, &RecoveryOptions::default()).unwrap();
        assert_eq!(value, v);
        assert!(diag.fence_stripped);
        assert_eq!(diag.strategy, Some("span"));
    }

    #[test]
    fn trailing_commentary_recovers() {
        let raw = "{\"titles\": [\"a\", \"b\"]}\n\nLet me know if you need more!";
        let titles: Titles = recover_json_as(raw).unwrap();
        assert_eq!(titles.titles, vec!["a", "b"]);
    }

    #[test]
    fn think_block_is_ignored() {
        let raw = "<think>maybe {\"draft\": 1}</think>{\"final\": 2}";
        assert_eq!(recover_json(raw).unwrap(), json!({"final": 2}));
    }

    #[test]
    fn bare_scalar_uses_cleaned_step() {
        let (value, diag) = recover_json_with("42", &RecoveryOptions::default()).unwrap();
        assert_eq!(value, json!(42));
        assert_eq!(diag.strategy, Some("cleaned"));
    }

    #[test]
    fn brace_scan_prefers_last_candidate() {
        // The greedy span covers both objects plus prose and fails to parse.
        let raw = "Example: {\"title\": \"example\"} Answer: {\"title\": \"real\"}";
        let (value, diag) = recover_json_with(raw, &RecoveryOptions::default()).unwrap();
        assert_eq!(value, json!({"title": "real"}));
        assert_eq!(diag.strategy, Some("brace_scan"));
        assert_eq!(diag.candidates_found, 2);
        assert!(diag.ambiguous());
    }

    #[test]
    fn brace_scan_first_first_is_configurable() {
        let raw = "Example: {\"title\": \"example\"} Answer: {\"title\": \"real\"}";
        let options = RecoveryOptions::default().with_candidate_order(CandidateOrder::FirstFirst);
        let (value, _) = recover_json_with(raw, &options).unwrap();
        assert_eq!(value, json!({"title": "example"}));
    }

    #[test]
    fn brace_scan_skips_broken_later_candidate() {
        let raw = "{\"ok\": true} then {not json}";
        let (value, diag) = recover_json_with(raw, &RecoveryOptions::default()).unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(diag.candidates_found, 2);
        assert_eq!(diag.candidates_parsed, 1);
        assert!(!diag.ambiguous());
    }

    #[test]
    fn truncated_json_fails_with_excerpt() {
        let raw = format!("{{\"article\": \"{}", "x".repeat(400));
        let err = recover_json(&raw).unwrap_err();
        match err {
            ParseError::Unparseable { ref excerpt } => {
                assert!(excerpt.starts_with("{\"article\""));
                assert_eq!(excerpt.chars().count(), EXCERPT_LEN + 3);
            }
            other => panic!("expected Unparseable, got {:?}", other),
        }
    }

    #[test]
    fn plain_prose_fails() {
        assert!(matches!(
            recover_json("I cannot help with that."),
            Err(ParseError::Unparseable { .. })
        ));
    }

    #[test]
    fn empty_response_fails() {
        assert_eq!(recover_json("   \n"), Err(ParseError::EmptyResponse));
    }

    #[test]
    fn wrong_shape_is_unparseable() {
        let result: Result<Titles, _> = recover_json_as("{\"other\": 1}");
        assert!(matches!(result, Err(ParseError::Unparseable { .. })));
    }
}
