//! Scope primitives - waitTime, setVariable and regex

use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde_json::{Number, Value};
use tracing::debug;

use super::{variable_name, ActionCtx};
use crate::{
    errors::ActionError,
    interpolate::{interpolate_value, stringify},
    node::{RegexConfig, RegexOperation, RegexSource, SetVariableConfig, ValueType, WaitTimeConfig},
    types::NodeResult,
};

const DEFAULT_WAIT_MS: u64 = 1_000;

/// Execute waitTime primitive
///
/// Sleeps for `duration`, returning early when the run is stopped.
pub async fn execute_wait_time(
    ctx: &mut ActionCtx<'_>,
    config: &WaitTimeConfig,
) -> Result<NodeResult, ActionError> {
    let duration = Duration::from_millis(config.duration.unwrap_or(DEFAULT_WAIT_MS));
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(NodeResult::ok()),
        _ = ctx.scope.cancel_token.cancelled() => {
            debug!(node_id = ctx.node_id, "wait interrupted by stop request");
            Ok(NodeResult::cancelled())
        }
    }
}

/// Execute setVariable primitive
///
/// String values are interpolated, then optionally coerced by `valueType`.
pub async fn execute_set_variable(
    ctx: &mut ActionCtx<'_>,
    config: &SetVariableConfig,
) -> Result<NodeResult, ActionError> {
    let name = config.variable.trim();
    if name.is_empty() {
        return Err(ActionError::missing(ctx.action, "variable"));
    }
    let rendered = interpolate_value(&config.value, ctx.variables);
    for warning in rendered.warnings {
        ctx.warn(warning);
    }
    let value = match config.value_type {
        None => rendered.value,
        Some(kind) => coerce(rendered.value, kind).map_err(|problem| ActionError::BadVariable {
            name: name.to_string(),
            problem,
        })?,
    };
    Ok(NodeResult::ok().with_variable(name, value))
}

fn coerce(value: Value, kind: ValueType) -> Result<Value, String> {
    match (kind, value) {
        (ValueType::String, Value::String(s)) => Ok(Value::String(s)),
        (ValueType::String, other) => Ok(Value::String(stringify(&other))),
        (ValueType::Number, Value::Number(n)) => Ok(Value::Number(n)),
        (ValueType::Number, Value::String(s)) => {
            let trimmed = s.trim();
            if let Ok(int) = trimmed.parse::<i64>() {
                return Ok(Value::Number(int.into()));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("cannot be read as a number: '{}'", s))
        }
        (ValueType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
        (ValueType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "" => Ok(Value::Bool(false)),
            _ => Err(format!("cannot be read as a boolean: '{}'", s)),
        },
        (ValueType::Json, Value::String(s)) => {
            serde_json::from_str(&s).map_err(|err| format!("is not valid JSON: {}", err))
        }
        (ValueType::Json, other) => Ok(other),
        (kind, other) => Err(format!("cannot convert {} to {:?}", other, kind)),
    }
}

/// Execute regex primitive
///
/// Steps:
/// 1. Read the source text (literal, variable or element text)
/// 2. Compile the pattern with `flags`; a bad pattern fails this node only
/// 3. Apply the operation; `test` also routes `true` / `false`
pub async fn execute_regex(
    ctx: &mut ActionCtx<'_>,
    config: &RegexConfig,
) -> Result<NodeResult, ActionError> {
    // 1. Source
    let source = match config.source {
        RegexSource::Text => config
            .text
            .as_deref()
            .map(|t| ctx.text(t))
            .unwrap_or_default(),
        RegexSource::Variable => {
            let name = config
                .source_variable
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ActionError::missing(ctx.action, "sourceVariable"))?;
            ctx.variables.get(name).map(stringify).unwrap_or_default()
        }
        RegexSource::Element => {
            let selector = ctx.selector(config.selector.as_deref())?;
            ctx.page
                .query_text(&selector)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| ActionError::ElementNotFound(selector.clone()))?
        }
    };

    // 2. Compile
    let pattern = ctx.text(&config.pattern);
    let regex = compile(&pattern, config.flags.as_deref().unwrap_or(""))?;

    // 3. Apply
    let match_all = config.match_all.unwrap_or(false);
    let name = variable_name(config.variable.as_deref(), "regexResult");
    let result = match config.operation {
        RegexOperation::Match => {
            let value = if match_all {
                Value::Array(
                    regex
                        .find_iter(&source)
                        .map(|m| Value::String(m.as_str().to_string()))
                        .collect(),
                )
            } else {
                regex
                    .find(&source)
                    .map(|m| Value::String(m.as_str().to_string()))
                    .unwrap_or(Value::Null)
            };
            NodeResult::ok().with_variable(name, value)
        }
        RegexOperation::Extract => NodeResult::ok().with_variable(name, extract(&regex, &source, match_all)),
        RegexOperation::Replace => {
            let replacement = config
                .replacement
                .as_deref()
                .map(|r| ctx.text(r))
                .unwrap_or_default();
            let replacement = js_replacement(&replacement);
            let replaced = regex.replace_all(&source, replacement.as_str());
            NodeResult::ok().with_variable(name, Value::String(replaced.into_owned()))
        }
        RegexOperation::Test => {
            let hit = regex.is_match(&source);
            NodeResult::ok()
                .with_variable(name, Value::Bool(hit))
                .with_branch(hit)
        }
    };
    Ok(result)
}

/// Translate JavaScript replacement syntax into the `regex` crate's.
///
/// `$1`..`$99`, `$&` and `$<name>` become group references, `$$` is a literal dollar; any other
/// `$` is kept as-is.
fn js_replacement(replacement: &str) -> String {
    let mut out = String::with_capacity(replacement.len() + 8);
    let mut chars = replacement.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        match chars.peek().copied() {
            Some('$') => {
                chars.next();
                out.push_str("$$");
            }
            Some('&') => {
                chars.next();
                out.push_str("${0}");
            }
            Some(d) if d.is_ascii_digit() => {
                let mut group = String::new();
                while group.len() < 2 {
                    match chars.peek() {
                        Some(c) if c.is_ascii_digit() => {
                            group.push(*c);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                out.push_str(&format!("${{{}}}", group));
            }
            Some('<') => {
                let rest: String = chars.clone().skip(1).take_while(|c| *c != '>').collect();
                let closed = chars.clone().nth(1 + rest.chars().count()) == Some('>');
                if closed && !rest.is_empty() && rest.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    for _ in 0..rest.chars().count() + 2 {
                        chars.next();
                    }
                    out.push_str(&format!("${{{}}}", rest));
                } else {
                    out.push_str("$$");
                }
            }
            _ => out.push_str("$$"),
        }
    }
    out
}

pub fn compile(pattern: &str, flags: &str) -> Result<Regex, ActionError> {
    RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build()
        .map_err(|err| ActionError::InvalidPattern(format!("{}: {}", pattern, err)))
}

fn extract(regex: &Regex, source: &str, match_all: bool) -> Value {
    let groups = |caps: regex::Captures<'_>| -> Vec<Value> {
        caps.iter()
            .skip(1)
            .map(|g| {
                g.map(|m| Value::String(m.as_str().to_string()))
                    .unwrap_or(Value::Null)
            })
            .collect()
    };
    let group_count = regex.captures_len().saturating_sub(1);
    if !match_all {
        return Value::Array(regex.captures(source).map(groups).unwrap_or_default());
    }
    let per_match: Vec<Vec<Value>> = regex.captures_iter(source).map(groups).collect();
    if group_count == 1 {
        Value::Array(per_match.into_iter().flatten().collect())
    } else {
        Value::Array(per_match.into_iter().map(Value::Array).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeAction;
    use crate::types::DispatchScope;
    use cdp_adapter::{StubPage, StubScript};
    use serde_json::{json, Map};
    use tokio_util::sync::CancellationToken;

    fn regex_config(value: Value) -> RegexConfig {
        match NodeAction::parse("regex", &value).unwrap() {
            NodeAction::Regex(cfg) => cfg,
            other => panic!("unexpected {:?}", other),
        }
    }

    async fn run_regex(config: RegexConfig, vars: Map<String, Value>) -> Result<NodeResult, ActionError> {
        let page = StubPage::new(StubScript::default(), Default::default());
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "n", "regex");
        execute_regex(&mut ctx, &config).await
    }

    #[tokio::test]
    async fn extract_returns_first_match_groups() {
        let config = regex_config(json!({
            "source": "text", "text": "abc123", "pattern": "(\\d+)", "operation": "extract"
        }));
        let result = run_regex(config, Map::new()).await.unwrap();
        assert_eq!(result.output(), Some(&json!(["123"])));
        assert_eq!(result.variable.unwrap().name, "regexResult");
    }

    #[tokio::test]
    async fn extract_all_flattens_single_group() {
        let config = regex_config(json!({
            "text": "a1 b22 c333", "pattern": "(\\d+)", "operation": "extract", "matchAll": true
        }));
        let result = run_regex(config, Map::new()).await.unwrap();
        assert_eq!(result.output(), Some(&json!(["1", "22", "333"])));

        let config = regex_config(json!({
            "text": "a=1;b=2", "pattern": "(\\w)=(\\d)", "operation": "extract", "matchAll": "true"
        }));
        let result = run_regex(config, Map::new()).await.unwrap();
        assert_eq!(result.output(), Some(&json!([["a", "1"], ["b", "2"]])));
    }

    #[tokio::test]
    async fn replace_supports_group_references() {
        let vars = json!({"raw": "2024-05-01"}).as_object().cloned().unwrap();
        let config = regex_config(json!({
            "source": "variable", "sourceVariable": "raw",
            "pattern": "(\\d+)-(\\d+)-(\\d+)", "operation": "replace",
            "replacement": "$3/$2/$1", "variable": "date"
        }));
        let result = run_regex(config, vars).await.unwrap();
        assert_eq!(result.output(), Some(&json!("01/05/2024")));
    }

    #[tokio::test]
    async fn replace_keeps_unknown_dollar_sequences_literal() {
        let config = regex_config(json!({
            "source": "text", "text": "price 42", "pattern": "(?<amount>\\d+)", "operation": "replace",
            "replacement": "$price $$ [$&] <$<amount>> $9x", "variable": "out"
        }));
        let result = run_regex(config, Map::new()).await.unwrap();
        assert_eq!(result.output(), Some(&json!("price $price $ [42] <42> x")));
    }

    #[test]
    fn js_replacement_translates_group_syntax() {
        assert_eq!(js_replacement("$1-$2"), "${1}-${2}");
        assert_eq!(js_replacement("$123"), "${12}3");
        assert_eq!(js_replacement("$word"), "$$word");
        assert_eq!(js_replacement("cost: $"), "cost: $$");
        assert_eq!(js_replacement("$<name>"), "${name}");
        assert_eq!(js_replacement("$<open"), "$$<open");
    }

    #[tokio::test]
    async fn test_operation_routes_and_honors_flags() {
        let config = regex_config(json!({
            "text": "Hello", "pattern": "^hello$", "flags": "i", "operation": "test"
        }));
        let result = run_regex(config, Map::new()).await.unwrap();
        assert_eq!(result.next_handle.as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn malformed_pattern_fails_node() {
        let config = regex_config(json!({"text": "x", "pattern": "(unclosed"}));
        let err = run_regex(config, Map::new()).await.unwrap_err();
        assert!(matches!(err, ActionError::InvalidPattern(_)));
    }

    #[tokio::test]
    async fn set_variable_interpolates_and_coerces() {
        let page = StubPage::new(StubScript::default(), Default::default());
        let vars = json!({"a": 1, "b": 2}).as_object().cloned().unwrap();
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "n", "setVariable");

        let joined = execute_set_variable(
            &mut ctx,
            &SetVariableConfig {
                variable: "out".into(),
                value: json!("{{a}}-{{b}}"),
                value_type: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(joined.output(), Some(&json!("1-2")));

        let number = execute_set_variable(
            &mut ctx,
            &SetVariableConfig {
                variable: "n".into(),
                value: json!("{{a}}{{b}}"),
                value_type: Some(ValueType::Number),
            },
        )
        .await
        .unwrap();
        assert_eq!(number.output(), Some(&json!(12)));
    }

    #[tokio::test]
    async fn wait_time_returns_early_when_cancelled() {
        let page = StubPage::new(StubScript::default(), Default::default());
        let vars = Map::new();
        let token = CancellationToken::new();
        token.cancel();
        let scope = DispatchScope::new("e", "f", token);
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "n", "waitTime");
        let result = execute_wait_time(
            &mut ctx,
            &WaitTimeConfig {
                duration: Some(60_000),
            },
        )
        .await
        .unwrap();
        assert!(result.cancelled);
    }
}
