//! Prompt templating: dotted-path lookup and `{{name}}` substitution.
//!
//! Stage prompts declare their inputs as a mapping from placeholder name to a
//! dotted path into the pipeline state (see [`PipelineState::path_root`]).
//! [`build_variables`] resolves those paths into a variable bag and
//! [`substitute`] renders the template against it.
//!
//! [`PipelineState::path_root`]: crate::state::PipelineState::path_root

use serde_json::Value;
use std::collections::HashMap;

/// A resolved variable bag. `None` means the path did not resolve, which is
/// different from a resolved JSON `null`.
pub type Variables = HashMap<String, Option<Value>>;

/// Render the visible marker emitted for a placeholder with no value.
///
/// ```
/// use content_pipeline::template::missing_marker;
///
/// assert_eq!(missing_marker("rtb"), "[missing: rtb]");
/// ```
pub fn missing_marker(name: &str) -> String {
    format!("[missing: {}]", name)
}

/// Walk a dotted path through nested JSON objects.
///
/// Numeric segments index into arrays. Returns `None` as soon as a segment is
/// missing or an intermediate value is not a container; never panics.
///
/// ```
/// use content_pipeline::template::resolve_path;
/// use serde_json::json;
///
/// let root = json!({"x": {"y": 5}});
/// assert_eq!(resolve_path(Some(&root), "x.y"), Some(&json!(5)));
/// assert_eq!(resolve_path(Some(&root), "x.z"), None);
/// assert_eq!(resolve_path(None, "x.y"), None);
/// ```
pub fn resolve_path<'a>(root: Option<&'a Value>, path: &str) -> Option<&'a Value> {
    let mut current = root?;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Resolve every entry of a placeholder → path mapping against `root`.
///
/// Unresolvable paths produce `None` for that placeholder; the failure is
/// deferred to [`substitute`], which renders a missing marker.
pub fn build_variables<'m, I>(mapping: I, root: &Value) -> Variables
where
    I: IntoIterator<Item = (&'m String, &'m String)>,
{
    mapping
        .into_iter()
        .map(|(name, path)| (name.clone(), resolve_path(Some(root), path).cloned()))
        .collect()
}

/// Replace every `{{name}}` placeholder in `template`.
///
/// - strings are inserted verbatim, other scalars via their JSON display
/// - objects and arrays are inserted as pretty-printed JSON
/// - unbound or unresolved names render as [`missing_marker`]
///
/// Whitespace inside the braces is ignored (`{{ name }}` works). An opening
/// `{{` with no closing `}}` is left untouched.
///
/// ```
/// use content_pipeline::template::{substitute, Variables};
/// use serde_json::json;
///
/// let mut vars = Variables::new();
/// vars.insert("a".into(), Some(json!("hello")));
/// assert_eq!(substitute("{{a}} / {{b}}", &vars), "hello / [missing: b]");
/// ```
pub fn substitute(template: &str, variables: &Variables) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            break;
        };
        let name = after_open[..close].trim();
        // `{{` followed by another brace before `}}` is not a placeholder
        if name.is_empty() || name.contains('{') {
            rendered.push_str(&rest[..open + 2]);
            rest = after_open;
            continue;
        }

        rendered.push_str(&rest[..open]);
        match variables.get(name) {
            Some(Some(value)) => rendered.push_str(&value_to_prompt_text(value)),
            _ => rendered.push_str(&missing_marker(name)),
        }
        rest = &after_open[close + 2..];
    }

    rendered.push_str(rest);
    rendered
}

/// Stringify a JSON value the way it should appear inside a prompt.
pub fn value_to_prompt_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Option<Value>)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_resolve_path_nested() {
        let root = json!({"x": {"y": 5}});
        assert_eq!(resolve_path(Some(&root), "x.y"), Some(&json!(5)));
    }

    #[test]
    fn test_resolve_path_missing_leaf() {
        let root = json!({"x": {"y": 5}});
        assert_eq!(resolve_path(Some(&root), "x.z"), None);
    }

    #[test]
    fn test_resolve_path_empty_root() {
        let root = json!({});
        assert_eq!(resolve_path(Some(&root), "x.y"), None);
        assert_eq!(resolve_path(None, "x.y"), None);
    }

    #[test]
    fn test_resolve_path_through_null_and_scalar() {
        let root = json!({"a": null, "b": 3});
        assert_eq!(resolve_path(Some(&root), "a"), Some(&Value::Null));
        assert_eq!(resolve_path(Some(&root), "a.c"), None);
        assert_eq!(resolve_path(Some(&root), "b.c"), None);
    }

    #[test]
    fn test_resolve_path_array_index() {
        let root = json!({"titles": [{"title": "first"}, {"title": "second"}]});
        assert_eq!(
            resolve_path(Some(&root), "titles.1.title"),
            Some(&json!("second"))
        );
        assert_eq!(resolve_path(Some(&root), "titles.9.title"), None);
        assert_eq!(resolve_path(Some(&root), "titles.x"), None);
    }

    #[test]
    fn test_build_variables_keeps_missing_as_none() {
        let root = json!({"workflow": {"parameters": {"feature": "school bag"}}});
        let mapping: HashMap<String, String> = [
            ("feature".to_string(), "workflow.parameters.feature".to_string()),
            ("persona".to_string(), "workflow.intermediateResults.persona".to_string()),
        ]
        .into_iter()
        .collect();

        let built = build_variables(&mapping, &root);
        assert_eq!(built.len(), 2);
        assert_eq!(built["feature"], Some(json!("school bag")));
        assert_eq!(built["persona"], None);
    }

    #[test]
    fn test_substitute_missing_placeholder_is_marked() {
        let v = vars(&[("a", Some(json!("alpha")))]);
        let out = substitute("A={{a}}, B={{b}}", &v);
        assert_eq!(out, "A=alpha, B=[missing: b]");
        assert!(!out.contains("{{b}}"));
    }

    #[test]
    fn test_substitute_none_value_is_marked() {
        let v = vars(&[("a", None)]);
        assert_eq!(substitute("{{a}}", &v), "[missing: a]");
    }

    #[test]
    fn test_substitute_null_is_not_missing() {
        let v = vars(&[("rtb", Some(Value::Null))]);
        assert_eq!(substitute("rtb: {{rtb}}", &v), "rtb: null");
    }

    #[test]
    fn test_substitute_structured_value_pretty_printed() {
        let v = vars(&[("kw", Some(json!({"keywords": ["a", "b"]})))]);
        let out = substitute("{{kw}}", &v);
        assert_eq!(
            out,
            serde_json::to_string_pretty(&json!({"keywords": ["a", "b"]})).unwrap()
        );
        assert!(out.contains('\n'));
    }

    #[test]
    fn test_substitute_scalars() {
        let v = vars(&[("n", Some(json!(400))), ("flag", Some(json!(true)))]);
        assert_eq!(substitute("{{n}} words, {{flag}}", &v), "400 words, true");
    }

    #[test]
    fn test_substitute_trims_names_and_repeats() {
        let v = vars(&[("name", Some(json!("Ada")))]);
        assert_eq!(substitute("{{ name }} and {{name}}", &v), "Ada and Ada");
    }

    #[test]
    fn test_substitute_unterminated_placeholder_left_alone() {
        let v = vars(&[]);
        assert_eq!(substitute("open {{ never closed", &v), "open {{ never closed");
    }

    #[test]
    fn test_substitute_no_placeholders() {
        assert_eq!(substitute("static prompt", &Variables::new()), "static prompt");
    }
}
