//! Text-level extraction steps shared by the recovery cascade.
//!
//! Every function here is a pure `&str -> &str`/`String` transform; none of
//! them parse JSON. The ordering and parse attempts live in
//! [`json`](crate::output_parser::json).

/// Strip all `<think>...</think>` and `<thinking>...</thinking>` blocks from text.
///
/// Handles complete blocks, incomplete blocks (no closing tag),
/// and multiple sequential blocks.
///
/// # Examples
///
/// ```
/// use content_pipeline::output_parser::strip_think_tags;
///
/// assert_eq!(strip_think_tags("<think>reasoning</think>result"), "result");
/// assert_eq!(strip_think_tags("<think>no closing tag"), "");
/// ```
pub fn strip_think_tags(text: &str) -> String {
    let result = strip_tag_variant(text, "<think>", "</think>");
    strip_tag_variant(&result, "<thinking>", "</thinking>")
}

fn strip_tag_variant(text: &str, open: &str, close: &str) -> String {
    let mut result = text.to_string();
    while let Some(start) = result.find(open) {
        if let Some(end_offset) = result[start..].find(close) {
            let end = start + end_offset + close.len();
            result = format!("{}{}", &result[..start], &result[end..]);
        } else {
            result.truncate(start);
            break;
        }
    }
    result
}

/// Remove a leading code-fence opener (bare or tagged with a language such
/// as `json`, `jsonl` or `json5`) and a trailing fence. Returns the trimmed
/// remainder and whether anything changed.
///
/// ```
/// use content_pipeline::output_parser::extract::strip_code_fence;
///
/// assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), ("{\"a\": 1}", true));
/// assert_eq!(strip_code_fence("{\"a\": 1}"), ("{\"a\": 1}", false));
/// ```
pub fn strip_code_fence(text: &str) -> (&str, bool) {
    let original = text.trim();
    let mut rest = original;

    if let Some(after) = rest.strip_prefix("```") {
        // the opener line holds at most a language tag
        let line_end = after.find('\n').unwrap_or(after.len());
        let is_tag = after[..line_end]
            .trim()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'));
        rest = if is_tag { &after[line_end..] } else { after };
        rest = rest.trim_start();
    }
    if let Some(before) = rest.strip_suffix("```") {
        rest = before.trim_end();
    }

    (rest, rest.len() != original.len())
}

/// Drop a leading prose prefix shorter than `max_chars` characters that
/// precedes the first `{` or `[`. Longer prefixes are left in place.
///
/// ```
/// use content_pipeline::output_parser::extract::strip_prose_prefix;
///
/// assert_eq!(strip_prose_prefix("Sure! {\"a\": 1}", 100), ("{\"a\": 1}", true));
/// assert_eq!(strip_prose_prefix("no json here", 100), ("no json here", false));
/// ```
pub fn strip_prose_prefix(text: &str, max_chars: usize) -> (&str, bool) {
    let Some(start) = text.find(['{', '[']) else {
        return (text, false);
    };
    if start == 0 || text[..start].chars().count() >= max_chars {
        return (text, false);
    }
    (&text[start..], true)
}

/// Find the outermost `{...}` or `[...]` span: from the first opening
/// delimiter to the last matching closing delimiter after it.
///
/// This is a greedy, shape-only match; it does not check balance. Opening
/// positions are tried left to right until one has a closing partner.
///
/// ```
/// use content_pipeline::output_parser::extract::outermost_span;
///
/// assert_eq!(outermost_span("x {\"a\": {\"b\": 1}} y"), Some("{\"a\": {\"b\": 1}}"));
/// assert_eq!(outermost_span("list: [1, 2] done"), Some("[1, 2]"));
/// assert_eq!(outermost_span("nothing"), None);
/// ```
pub fn outermost_span(text: &str) -> Option<&str> {
    for (start, ch) in text.char_indices() {
        let close = match ch {
            '{' => '}',
            '[' => ']',
            _ => continue,
        };
        if let Some(end) = text.rfind(close) {
            if end > start {
                return Some(&text[start..=end]);
            }
        }
    }
    None
}

/// Collect every top-level balanced `{...}` region in `text`, in order of
/// appearance.
///
/// Depth is tracked on `{`/`}`. Once inside an object, braces within JSON
/// string literals are ignored so `{"t": "a } b"}` stays one region. An
/// unterminated trailing region is discarded.
///
/// ```
/// use content_pipeline::output_parser::extract::balanced_objects;
///
/// let text = r#"example {"a": 1} answer {"b": {"c": 2}}"#;
/// assert_eq!(balanced_objects(text), vec![r#"{"a": 1}"#, r#"{"b": {"c": 2}}"#]);
/// ```
pub fn balanced_objects(text: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if depth > 0 {
            if escape_next {
                escape_next = false;
                continue;
            }
            if in_string {
                match ch {
                    '\\' => escape_next = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            if ch == '"' {
                in_string = true;
                continue;
            }
        }

        match ch {
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    found.push(&text[start..=i]);
                }
            }
            _ => {}
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── strip_think_tags ──

    #[test]
    fn strip_think_tags_multiple() {
        let input = "<think>first</think>middle<thinking>second</thinking>end";
        assert_eq!(strip_think_tags(input), "middleend");
    }

    #[test]
    fn strip_think_tags_no_tags() {
        assert_eq!(strip_think_tags("just plain text"), "just plain text");
    }

    // ── strip_code_fence ──

    #[test]
    fn fence_tagged_json_uppercase() {
        let (out, changed) = strip_code_fence("```JSON\n[1, 2]\n```");
        assert_eq!(out, "[1, 2]");
        assert!(changed);
    }

    #[test]
    fn fence_bare() {
        let (out, changed) = strip_code_fence("```\n{\"k\": true}\n```");
        assert_eq!(out, "{\"k\": true}");
        assert!(changed);
    }

    #[test]
    fn fence_with_longer_tag_strips_whole_tag() {
        let (out, changed) = strip_code_fence("```jsonl\n{\"k\": 1}\n```");
        assert_eq!(out, "{\"k\": 1}");
        assert!(changed);
        let (out, _) = strip_code_fence("```JSON5\n[1]\n```");
        assert_eq!(out, "[1]");
    }

    #[test]
    fn fence_opener_with_payload_on_same_line_keeps_payload() {
        let (out, _) = strip_code_fence("```{\"k\": 1}```");
        assert_eq!(out, "{\"k\": 1}");
    }

    #[test]
    fn fence_only_trailing() {
        let (out, _) = strip_code_fence("{\"k\": 1}\n```");
        assert_eq!(out, "{\"k\": 1}");
    }

    #[test]
    fn fence_not_at_start_is_kept() {
        let input = "Here:\n```json\n{}\n```";
        let (out, _) = strip_code_fence(input);
        assert!(out.starts_with("Here:"));
    }

    // ── strip_prose_prefix ──

    #[test]
    fn prose_prefix_too_long_is_kept() {
        let prefix = "x".repeat(120);
        let input = format!("{} {{\"a\": 1}}", prefix);
        let (out, changed) = strip_prose_prefix(&input, 100);
        assert_eq!(out, input);
        assert!(!changed);
    }

    #[test]
    fn prose_prefix_before_array() {
        let (out, changed) = strip_prose_prefix("Titles: [\"a\"]", 100);
        assert_eq!(out, "[\"a\"]");
        assert!(changed);
    }

    #[test]
    fn prose_prefix_none_when_starting_with_brace() {
        let (out, changed) = strip_prose_prefix("{}", 100);
        assert_eq!(out, "{}");
        assert!(!changed);
    }

    // ── outermost_span ──

    #[test]
    fn outermost_span_is_greedy() {
        let input = r#"{"a": 1} and {"b": 2}"#;
        assert_eq!(outermost_span(input), Some(input));
    }

    #[test]
    fn outermost_span_skips_unclosed_opener() {
        assert_eq!(outermost_span("[ unclosed {\"a\": 1}"), Some("{\"a\": 1}"));
    }

    // ── balanced_objects ──

    #[test]
    fn balanced_objects_ignores_braces_in_strings() {
        let input = r#"{"t": "a } b"} tail"#;
        assert_eq!(balanced_objects(input), vec![r#"{"t": "a } b"}"#]);
    }

    #[test]
    fn balanced_objects_drops_unterminated_tail() {
        let input = r#"{"a": 1} {"b": "#;
        assert_eq!(balanced_objects(input), vec![r#"{"a": 1}"#]);
    }

    #[test]
    fn balanced_objects_quotes_in_prose_do_not_confuse() {
        let input = r#"He said "look" {"a": 1}"#;
        assert_eq!(balanced_objects(input), vec![r#"{"a": 1}"#]);
    }

    #[test]
    fn balanced_objects_stray_close_brace() {
        assert_eq!(balanced_objects("} {\"a\": 1}"), vec!["{\"a\": 1}"]);
    }
}
