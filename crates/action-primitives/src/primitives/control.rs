//! Control primitives - branching, visibility probes, loops and the terminal response

use std::time::Duration;

use cdp_adapter::ElementState;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{millis, ActionCtx};
use crate::{
    conditions::{compare, default_operator, evaluate_element_condition},
    errors::ActionError,
    interpolate::{interpolate_value, stringify},
    node::{
        ConditionConfig, ConditionType, IsVisibleConfig, LoopNodeConfig, LoopType, ResponseConfig,
        ResponseFormat,
    },
    types::{LoopConfig, NodeResult},
};

const DEFAULT_VISIBLE_TIMEOUT_MS: u64 = 5_000;
const ATTACHED_REPROBE: Duration = Duration::from_millis(500);
const DEFAULT_MAX_ITERATIONS: u64 = 100;

/// Execute condition primitive
///
/// Routes through `nextHandle` `"true"` or `"false"`. Element probes never fail the node.
pub async fn execute_condition(
    ctx: &mut ActionCtx<'_>,
    config: &ConditionConfig,
) -> Result<NodeResult, ActionError> {
    let expected = interpolate_value(&config.value, ctx.variables).value;
    let outcome = match config.condition_type {
        ConditionType::Variable => {
            let name = config
                .variable
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ActionError::missing(ctx.action, "variable"))?;
            let operator = config.operator.unwrap_or_else(|| default_operator(&expected));
            compare(ctx.variables.get(name), operator, &expected)?
        }
        ConditionType::Element => {
            let selector = ctx.selector(config.selector.as_deref())?;
            let operator = config
                .operator
                .unwrap_or(crate::node::ConditionOperator::Exists);
            evaluate_element_condition(ctx.page, &selector, operator, &expected).await
        }
    };
    debug!(node_id = ctx.node_id, outcome, "Condition evaluated");
    Ok(NodeResult::ok().with_branch(outcome))
}

/// Execute isVisible primitive
///
/// Steps:
/// 1. Wait for the selector to become visible within `timeout`
/// 2. On failure, re-probe for `attached` briefly to tell "hidden" from "absent"
/// 3. Route on the boolean and store it when `variable` is set
pub async fn execute_is_visible(
    ctx: &mut ActionCtx<'_>,
    config: &IsVisibleConfig,
) -> Result<NodeResult, ActionError> {
    let selector = ctx.selector(config.selector.as_deref())?;

    // 1. Visible probe
    let visible = ctx
        .page
        .wait_for_selector(
            &selector,
            ElementState::Visible,
            millis(config.timeout, DEFAULT_VISIBLE_TIMEOUT_MS),
        )
        .await
        .unwrap_or(false);

    // 2. Hidden vs absent
    let state = if visible {
        "visible"
    } else {
        let attached = ctx
            .page
            .wait_for_selector(&selector, ElementState::Attached, ATTACHED_REPROBE)
            .await
            .unwrap_or(false);
        if attached {
            "hidden"
        } else {
            "absent"
        }
    };

    // 3. Result
    let mut result = NodeResult::ok()
        .with_branch(visible)
        .with_data(json!({ "selector": selector, "state": state }));
    if let Some(name) = config.variable.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        result = result.with_variable(name, Value::Bool(visible));
    }
    Ok(result)
}

/// Execute loop primitive
///
/// Produces the iteration plan; the traversal engine runs the body.
/// - `array` / `forEach`: items of `arrayVariable`
/// - `times`: `0..count`, item and index both the iteration number
/// - `while`: no items, the engine re-checks `condition` each round up to `maxIterations`
pub async fn execute_loop(
    ctx: &mut ActionCtx<'_>,
    config: &LoopNodeConfig,
) -> Result<NodeResult, ActionError> {
    let item_variable = super::variable_name(config.item_variable.as_deref(), "item");
    let index_variable = super::variable_name(config.index_variable.as_deref(), "index");
    let max_iterations = config.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);

    let array_data = match config.loop_type {
        LoopType::Array | LoopType::ForEach => {
            let name = config
                .array_variable
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ActionError::missing(ctx.action, "arrayVariable"))?;
            Some(array_items(name, ctx.variables.get(name))?)
        }
        LoopType::Times => {
            let count = config
                .count
                .ok_or_else(|| ActionError::missing(ctx.action, "count"))?;
            Some((0..count).map(|i| json!(i)).collect())
        }
        LoopType::While => {
            if config.condition.is_none() {
                return Err(ActionError::missing(ctx.action, "condition"));
            }
            None
        }
    };

    info!(
        node_id = ctx.node_id,
        loop_type = ?config.loop_type,
        items = array_data.as_ref().map(Vec::len),
        "Loop planned"
    );

    Ok(NodeResult {
        success: true,
        is_array_loop: true,
        array_data,
        loop_config: Some(LoopConfig {
            loop_type: config.loop_type,
            array_variable: config.array_variable.clone(),
            item_variable,
            index_variable,
            condition: config.condition.clone(),
            max_iterations,
        }),
        ..NodeResult::default()
    })
}

fn array_items(name: &str, value: Option<&Value>) -> Result<Vec<Value>, ActionError> {
    match value {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => Ok(items),
            _ => Err(ActionError::BadVariable {
                name: name.to_string(),
                problem: "is not an array".to_string(),
            }),
        },
        Some(_) => Err(ActionError::BadVariable {
            name: name.to_string(),
            problem: "is not an array".to_string(),
        }),
        None => Err(ActionError::BadVariable {
            name: name.to_string(),
            problem: "is not defined".to_string(),
        }),
    }
}

/// Execute response primitive
///
/// Steps:
/// 1. Select the configured variables (all when the list is empty)
/// 2. Optionally merge every array variable into `mergedKey`
/// 3. Optionally attach execution metadata
/// 4. Render as JSON, text or HTML and end the run
pub async fn execute_response(
    ctx: &mut ActionCtx<'_>,
    config: &ResponseConfig,
) -> Result<NodeResult, ActionError> {
    // 1. Selection
    let mut payload = Map::new();
    if config.variables.is_empty() {
        payload.extend(ctx.variables.iter().map(|(k, v)| (k.clone(), v.clone())));
    } else {
        for name in &config.variables {
            match ctx.variables.get(name) {
                Some(value) => {
                    payload.insert(name.clone(), value.clone());
                }
                None => ctx.warn(format!("Response variable '{}' is not defined", name)),
            }
        }
    }

    // 2. Merge arrays
    if config.merge_arrays.unwrap_or(false) {
        let key = super::variable_name(config.merged_key.as_deref(), "items");
        let mut merged = Vec::new();
        payload.retain(|_, value| match value {
            Value::Array(items) => {
                merged.append(items);
                false
            }
            _ => true,
        });
        payload.insert(key, Value::Array(merged));
    }

    // 3. Metadata
    if config.include_metadata.unwrap_or(false) {
        let now = Utc::now();
        payload.insert(
            "_metadata".to_string(),
            json!({
                "executionId": ctx.scope.execution_id,
                "flowId": ctx.scope.flow_id,
                "timestamp": now.to_rfc3339(),
                "durationMs": (now - ctx.scope.started_at).num_milliseconds().max(0),
                "nodesExecuted": ctx.scope.nodes_executed,
            }),
        );
    }

    // 4. Render
    let response = render(payload, config.format);
    Ok(NodeResult::terminal(response))
}

fn render(payload: Map<String, Value>, format: ResponseFormat) -> Value {
    match format {
        ResponseFormat::Json => Value::Object(payload),
        ResponseFormat::Text => Value::String(
            payload
                .iter()
                .map(|(k, v)| format!("{}: {}", k, stringify(v)))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        ResponseFormat::Html => {
            let rows: String = payload
                .iter()
                .map(|(k, v)| {
                    format!(
                        "<tr><th>{}</th><td>{}</td></tr>",
                        escape_html(k),
                        escape_html(&stringify(v))
                    )
                })
                .collect();
            Value::String(format!(
                "<!DOCTYPE html><html><body><table>{}</table></body></html>",
                rows
            ))
        }
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DispatchScope;
    use cdp_adapter::{StubDocument, StubElement, StubPage, StubScript};
    use tokio_util::sync::CancellationToken;

    fn page() -> StubPage {
        let doc = StubDocument::new()
            .with_element("#banner", StubElement::text("Welcome"))
            .with_element("#modal", StubElement::text("").hidden());
        StubPage::new(StubScript::new(doc), Default::default())
    }

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn variable_condition_routes_false() {
        let page = page();
        let vars = vars(json!({"status": "closed"}));
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "c", "condition");
        let config = ConditionConfig {
            variable: Some("status".into()),
            value: json!("open"),
            ..Default::default()
        };
        let result = execute_condition(&mut ctx, &config).await.unwrap();
        assert_eq!(result.condition, Some(false));
        assert_eq!(result.next_handle.as_deref(), Some("false"));
    }

    #[tokio::test]
    async fn is_visible_distinguishes_hidden_from_absent() {
        let page = page();
        let vars = Map::new();
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "v", "isVisible");

        let hidden = execute_is_visible(
            &mut ctx,
            &IsVisibleConfig {
                selector: Some("#modal".into()),
                timeout: Some(5),
                variable: Some("modalShown".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(hidden.next_handle.as_deref(), Some("false"));
        assert_eq!(hidden.data.as_ref().unwrap()["state"], json!("hidden"));
        assert_eq!(hidden.output(), Some(&json!(false)));

        let absent = execute_is_visible(
            &mut ctx,
            &IsVisibleConfig {
                selector: Some("#nope".into()),
                timeout: Some(5),
                variable: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(absent.data.as_ref().unwrap()["state"], json!("absent"));
        assert!(absent.variable.is_none());
    }

    #[tokio::test]
    async fn array_loop_reports_items_and_defaults() {
        let page = page();
        let vars = vars(json!({"urls": ["/a", "/b"]}));
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "l", "loop");
        let result = execute_loop(
            &mut ctx,
            &LoopNodeConfig {
                array_variable: Some("urls".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(result.is_array_loop);
        assert_eq!(result.array_data, Some(vec![json!("/a"), json!("/b")]));
        let loop_config = result.loop_config.unwrap();
        assert_eq!(loop_config.item_variable, "item");
        assert_eq!(loop_config.index_variable, "index");
    }

    #[tokio::test]
    async fn loop_over_missing_variable_fails() {
        let page = page();
        let vars = Map::new();
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "l", "loop");
        let err = execute_loop(
            &mut ctx,
            &LoopNodeConfig {
                array_variable: Some("urls".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Variable 'urls' is not defined");
    }

    #[tokio::test]
    async fn times_loop_counts_from_zero() {
        let page = page();
        let vars = Map::new();
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "l", "loop");
        let result = execute_loop(
            &mut ctx,
            &LoopNodeConfig {
                loop_type: LoopType::Times,
                count: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(result.array_data, Some(vec![json!(0), json!(1), json!(2)]));
    }

    #[tokio::test]
    async fn response_merges_arrays_and_adds_metadata() {
        let page = page();
        let vars = vars(json!({"a": [1, 2], "b": [3], "title": "t"}));
        let scope = DispatchScope::new("exec-1", "flow-1", CancellationToken::new())
            .with_nodes_executed(4);
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "r", "response");
        let result = execute_response(
            &mut ctx,
            &ResponseConfig {
                merge_arrays: Some(true),
                include_metadata: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(result.is_terminal_node);
        let response = result.response.unwrap();
        assert_eq!(response["items"], json!([1, 2, 3]));
        assert_eq!(response["title"], json!("t"));
        assert!(response.get("a").is_none());
        assert_eq!(response["_metadata"]["executionId"], json!("exec-1"));
        assert_eq!(response["_metadata"]["nodesExecuted"], json!(4));
    }

    #[tokio::test]
    async fn response_text_format_lists_selected_variables() {
        let page = page();
        let vars = vars(json!({"a": "x", "b": "y"}));
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "r", "response");
        let result = execute_response(
            &mut ctx,
            &ResponseConfig {
                variables: vec!["b".into(), "missing".into()],
                format: ResponseFormat::Text,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(result.response, Some(json!("b: y")));
        assert_eq!(ctx.take_warnings().len(), 1);
    }
}
