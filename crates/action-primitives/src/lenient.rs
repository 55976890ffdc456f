//! Deserializers for node configs authored in a form editor, where numbers and booleans often
//! arrive as strings.

use serde::de::{Deserializer, Error};
use serde::Deserialize;
use serde_json::Value;

pub fn opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("expected a non-negative number, got {}", n))),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| *f >= 0.0)
            .map(|f| Some(f as u64))
            .ok_or_else(|| D::Error::custom(format!("expected a non-negative number, got '{}'", s))),
        other => Err(D::Error::custom(format!("expected a number, got {}", other))),
    }
}

pub fn opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("expected a number, got {}", n))),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| Some(f as i64))
            .map_err(|_| D::Error::custom(format!("expected a number, got '{}'", s))),
        other => Err(D::Error::custom(format!("expected a number, got {}", other))),
    }
}

pub fn opt_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b)),
        Value::Number(n) => Ok(Some(n.as_f64().map(|f| f != 0.0).unwrap_or(false))),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(D::Error::custom(format!("expected a boolean, got '{}'", s))),
        },
        other => Err(D::Error::custom(format!("expected a boolean, got {}", other))),
    }
}

/// Accepts a plain string or a JSON array of strings.
pub fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()),
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect()),
        other => Err(D::Error::custom(format!("expected a list, got {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct Probe {
        #[serde(deserialize_with = "opt_u64")]
        timeout: Option<u64>,
        #[serde(deserialize_with = "opt_bool")]
        flag: Option<bool>,
        #[serde(deserialize_with = "string_list")]
        names: Vec<String>,
    }

    #[test]
    fn numbers_and_bools_accept_strings() {
        let probe: Probe =
            serde_json::from_value(json!({"timeout": "2500", "flag": "false", "names": "a, b"}))
                .unwrap();
        assert_eq!(probe.timeout, Some(2500));
        assert_eq!(probe.flag, Some(false));
        assert_eq!(probe.names, vec!["a", "b"]);
    }

    #[test]
    fn empty_strings_mean_unset() {
        let probe: Probe = serde_json::from_value(json!({"timeout": "", "flag": ""})).unwrap();
        assert_eq!(probe.timeout, None);
        assert_eq!(probe.flag, None);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(serde_json::from_value::<Probe>(json!({"timeout": "soon"})).is_err());
    }
}
