//! `{{variable}}` substitution for node configuration strings.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::warn;

static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_$.\-]+)\s*\}\}").expect("static interpolation pattern")
});

/// Result of interpolating one string.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Interpolated<T = String> {
    pub value: T,
    pub warnings: Vec<String>,
}

/// Render a variable the way it appears inside a larger string.
///
/// Strings are inserted verbatim, `null` becomes empty, arrays are joined with commas and objects
/// are written as JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

/// Substitute every `{{name}}` token with the named variable.
///
/// Unknown names are left untouched. Substituting an array succeeds but adds a warning, since a
/// whole list inside a selector or URL is rarely what the author meant.
pub fn interpolate(template: &str, variables: &Map<String, Value>) -> Interpolated {
    let mut warnings = Vec::new();
    let text = TOKEN
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            match variables.get(name) {
                Some(value) => {
                    if value.is_array() {
                        warn!(
                            variable = name,
                            "array variable interpolated into a string; did you mean a loop item?"
                        );
                        warnings.push(format!(
                            "Variable '{}' is an array; its items were joined into the string",
                            name
                        ));
                    }
                    stringify(value)
                }
                None => caps[0].to_string(),
            }
        })
        .into_owned();
    Interpolated {
        value: text,
        warnings,
    }
}

/// Interpolate strings anywhere inside a JSON value; other scalars pass through.
pub fn interpolate_value(value: &Value, variables: &Map<String, Value>) -> Interpolated<Value> {
    let mut warnings = Vec::new();
    let value = walk(value, variables, &mut warnings);
    Interpolated { value, warnings }
}

fn walk(value: &Value, variables: &Map<String, Value>, warnings: &mut Vec<String>) -> Value {
    match value {
        Value::String(s) => {
            let rendered = interpolate(s, variables);
            warnings.extend(rendered.warnings);
            Value::String(rendered.value)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| walk(item, variables, warnings))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), walk(v, variables, warnings)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn substitutes_numbers_and_strings() {
        let out = interpolate("{{a}}-{{ b }}", &vars(json!({"a": 1, "b": "2"})));
        assert_eq!(out.value, "1-2");
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn unknown_tokens_are_preserved() {
        let out = interpolate("https://x.test/{{missing}}", &Map::new());
        assert_eq!(out.value, "https://x.test/{{missing}}");
    }

    #[test]
    fn arrays_substitute_with_warning() {
        let out = interpolate("{{urls}}", &vars(json!({"urls": ["/a", "/b"]})));
        assert_eq!(out.value, "/a,/b");
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn nested_values_are_walked() {
        let out = interpolate_value(
            &json!({"q": "{{term}}", "n": 3, "tags": ["{{term}}"]}),
            &vars(json!({"term": "rust"})),
        );
        assert_eq!(out.value, json!({"q": "rust", "n": 3, "tags": ["rust"]}));
    }
}
