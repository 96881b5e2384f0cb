//! `{{dot.path}}` placeholder resolution over the input map.
//!
//! Two forms share the same grammar:
//! - the textual substitutor (HTTP url/body/headers, GraphQL variables):
//!   scalar values stringify, null renders empty, the surrounding text is
//!   otherwise untouched;
//! - the parametric substitutor (database node): each `{{…}}` becomes the
//!   driver's positional parameter marker and the extracted values are
//!   returned separately, so user data never lands in the SQL text.
//!
//! Both resolve a leading `input.` prefix as a no-op.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::NodeError;
use crate::model::JsonMap;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").expect("placeholder regex"))
}

/// Positional parameter style of the SQL driver in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `?` — MySQL
    Question,
    /// `$1`, `$2`, … — Postgres
    Dollar,
}

/// Navigate a dot path ("config.token", "payload.user.id") through a map.
/// A leading `input.` segment is stripped. Missing segments are an error so
/// the host node can surface the broken path.
pub fn get_nested(map: &JsonMap, path: &str) -> Result<Value, NodeError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(NodeError::MissingPath(String::new()));
    }
    let stripped = path.strip_prefix("input.").unwrap_or(path);
    let mut current = Value::Object(map.clone());
    for part in stripped.split('.') {
        match current {
            Value::Object(ref obj) => match obj.get(part) {
                Some(v) => current = v.clone(),
                None => return Err(NodeError::MissingPath(path.to_string())),
            },
            _ => return Err(NodeError::MissingPath(path.to_string())),
        }
    }
    Ok(current)
}

/// Render a value into surrounding text: scalars bare, null empty,
/// containers as JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Replace every `{{path}}` in `text` with the stringified value from
/// `input`. An unresolvable path propagates an error out of the host node.
pub fn resolve_placeholders(text: &str, input: &JsonMap) -> Result<String, NodeError> {
    let mut err: Option<NodeError> = None;
    let out = placeholder_re().replace_all(text, |caps: &regex::Captures<'_>| {
        match get_nested(input, &caps[1]) {
            Ok(v) => stringify(&v),
            Err(e) => {
                if err.is_none() {
                    err = Some(e);
                }
                caps[0].to_string()
            }
        }
    });
    match err {
        Some(e) => Err(e),
        None => Ok(out.into_owned()),
    }
}

/// Replace every `{{path}}` with the driver's positional marker and return
/// the extracted values in placeholder order.
pub fn resolve_parametric(
    query: &str,
    input: &JsonMap,
    style: ParamStyle,
) -> Result<(String, Vec<Value>), NodeError> {
    let mut args = Vec::new();
    for caps in placeholder_re().captures_iter(query) {
        args.push(get_nested(input, &caps[1])?);
    }
    let mut n = 0usize;
    let replaced = placeholder_re().replace_all(query, |_: &regex::Captures<'_>| {
        n += 1;
        match style {
            ParamStyle::Question => "?".to_string(),
            ParamStyle::Dollar => format!("${n}"),
        }
    });
    Ok((replaced.into_owned(), args))
}

/// Substitute `{{path}}` inside a JSON document with JSON-encoded values so
/// the result stays valid JSON and types are preserved (GraphQL variables).
pub fn resolve_json_placeholders(text: &str, input: &JsonMap) -> Result<String, NodeError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0usize;
    for caps in placeholder_re().captures_iter(text) {
        let m = caps.get(0).expect("whole match");
        let value = get_nested(input, &caps[1])?;
        let encoded = serde_json::to_string(&value)?;
        out.push_str(&text[last..m.start()]);
        out.push_str(&encoded);
        last = m.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input() -> JsonMap {
        json!({
            "userId": 42,
            "name": "ada",
            "flag": true,
            "nothing": null,
            "config": {"token": "s3cret"},
            "payload": {"tags": ["a", "b"]}
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_textual_substitution() {
        let out = resolve_placeholders(
            "https://api/x?u={{userId}}&t={{config.token}}&f={{flag}}",
            &input(),
        )
        .unwrap();
        assert_eq!(out, "https://api/x?u=42&t=s3cret&f=true");
    }

    #[test]
    fn test_input_prefix_is_noop() {
        let out = resolve_placeholders("{{input.name}}/{{name}}", &input()).unwrap();
        assert_eq!(out, "ada/ada");
    }

    #[test]
    fn test_null_renders_empty() {
        assert_eq!(resolve_placeholders("[{{nothing}}]", &input()).unwrap(), "[]");
    }

    #[test]
    fn test_missing_path_is_error() {
        let err = resolve_placeholders("{{config.missing}}", &input()).unwrap_err();
        assert!(matches!(err, NodeError::MissingPath(_)));
    }

    #[test]
    fn test_containers_render_as_json() {
        let out = resolve_placeholders("{{payload.tags}}", &input()).unwrap();
        assert_eq!(out, r#"["a","b"]"#);
    }

    #[test]
    fn test_parametric_question_style() {
        let (q, args) = resolve_parametric(
            "SELECT * FROM users WHERE id = {{userId}} AND name = {{input.name}}",
            &input(),
            ParamStyle::Question,
        )
        .unwrap();
        assert_eq!(q, "SELECT * FROM users WHERE id = ? AND name = ?");
        assert_eq!(args, vec![json!(42), json!("ada")]);
    }

    #[test]
    fn test_parametric_dollar_style() {
        let (q, args) = resolve_parametric(
            "UPDATE t SET name = {{name}} WHERE id = {{userId}}",
            &input(),
            ParamStyle::Dollar,
        )
        .unwrap();
        assert_eq!(q, "UPDATE t SET name = $1 WHERE id = $2");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_json_placeholders_preserve_types() {
        let out =
            resolve_json_placeholders(r#"{"id": {{userId}}, "tags": {{payload.tags}}}"#, &input())
                .unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v, json!({"id": 42, "tags": ["a", "b"]}));
    }

    #[test]
    fn test_no_placeholders_passthrough() {
        assert_eq!(resolve_placeholders("plain", &input()).unwrap(), "plain");
    }
}
