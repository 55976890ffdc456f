//! Input primitives - click, type, hover, scroll, select, check, key press and explicit waits

use std::time::Duration;

use cdp_adapter::{ScrollTarget, TypeOptions};
use serde_json::json;
use tracing::{debug, info};

use super::{millis, ActionCtx};
use crate::{
    errors::ActionError,
    node::{
        CheckBoxConfig, ClickConfig, HoverConfig, KeyPressConfig, ScrollConfig, ScrollType,
        SelectOptionConfig, TypeConfig, WaitForConfig,
    },
    types::NodeResult,
};

const DEFAULT_ELEMENT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_WAIT_FOR_TIMEOUT_MS: u64 = 30_000;

/// Execute click primitive
pub async fn execute_click(
    ctx: &mut ActionCtx<'_>,
    config: &ClickConfig,
) -> Result<NodeResult, ActionError> {
    let selector = ctx.require(
        "selector",
        config.selector.as_deref(),
        config.selector_variable.as_deref(),
    )?;
    info!(node_id = ctx.node_id, selector = %selector, "Executing click primitive");
    ctx.page
        .click(&selector, millis(config.timeout, DEFAULT_ELEMENT_TIMEOUT_MS))
        .await?;
    Ok(NodeResult::ok().with_data(json!({ "selector": selector })))
}

/// Execute type primitive
///
/// Steps:
/// 1. Resolve selector and text (`textVariable` wins over `text`)
/// 2. Optionally clear the field, then type with the configured per-key delay
pub async fn execute_type(
    ctx: &mut ActionCtx<'_>,
    config: &TypeConfig,
) -> Result<NodeResult, ActionError> {
    // 1. Resolve inputs
    let selector = ctx.selector(config.selector.as_deref())?;
    let text = ctx
        .resolve(config.text.as_deref(), config.text_variable.as_deref())
        .unwrap_or_default();

    // 2. Type
    let options = TypeOptions {
        clear: config.clear.unwrap_or(true),
        delay: Duration::from_millis(config.delay.unwrap_or(0)),
    };
    debug!(node_id = ctx.node_id, selector = %selector, chars = text.chars().count(), "Typing text");
    ctx.page.type_text(&selector, &text, options).await?;
    Ok(NodeResult::ok())
}

/// Execute waitFor primitive
///
/// A selector that never reaches the requested state fails the node.
pub async fn execute_wait_for(
    ctx: &mut ActionCtx<'_>,
    config: &WaitForConfig,
) -> Result<NodeResult, ActionError> {
    let selector = ctx.selector(config.selector.as_deref())?;
    let state = config.state.unwrap_or_default();
    let reached = ctx
        .page
        .wait_for_selector(
            &selector,
            state,
            millis(config.timeout, DEFAULT_WAIT_FOR_TIMEOUT_MS),
        )
        .await?;
    if !reached {
        return Err(ActionError::WaitTimeout(format!(
            "{} (state: {})",
            selector,
            state.as_str()
        )));
    }
    Ok(NodeResult::ok())
}

/// Execute scroll primitive
///
/// Without an explicit `scrollType`, a configured selector means "scroll into view" and
/// anything else scrolls by `(x, y)`.
pub async fn execute_scroll(
    ctx: &mut ActionCtx<'_>,
    config: &ScrollConfig,
) -> Result<NodeResult, ActionError> {
    let has_selector = config
        .selector
        .as_deref()
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false);
    let scroll_type = config.scroll_type.unwrap_or(if has_selector {
        ScrollType::Element
    } else {
        ScrollType::Position
    });
    let target = match scroll_type {
        ScrollType::Element => ScrollTarget::Element(ctx.selector(config.selector.as_deref())?),
        ScrollType::Position => ScrollTarget::By {
            x: config.x.unwrap_or(0),
            y: config.y.unwrap_or(0),
        },
        ScrollType::Top => ScrollTarget::Top,
        ScrollType::Bottom => ScrollTarget::Bottom,
    };
    ctx.page.scroll(target).await?;
    Ok(NodeResult::ok())
}

pub async fn execute_hover(
    ctx: &mut ActionCtx<'_>,
    config: &HoverConfig,
) -> Result<NodeResult, ActionError> {
    let selector = ctx.selector(config.selector.as_deref())?;
    ctx.page
        .hover(&selector, millis(config.timeout, DEFAULT_ELEMENT_TIMEOUT_MS))
        .await?;
    Ok(NodeResult::ok())
}

pub async fn execute_select_option(
    ctx: &mut ActionCtx<'_>,
    config: &SelectOptionConfig,
) -> Result<NodeResult, ActionError> {
    let selector = ctx.selector(config.selector.as_deref())?;
    let value = ctx.require(
        "value",
        config.value.as_deref(),
        config.value_variable.as_deref(),
    )?;
    let selected = ctx.page.select_option(&selector, &value).await?;
    Ok(NodeResult::ok().with_data(json!({ "selected": selected })))
}

pub async fn execute_check_box(
    ctx: &mut ActionCtx<'_>,
    config: &CheckBoxConfig,
) -> Result<NodeResult, ActionError> {
    let selector = ctx.selector(config.selector.as_deref())?;
    let checked = config.checked.unwrap_or(true);
    ctx.page.set_checked(&selector, checked).await?;
    Ok(NodeResult::ok().with_data(json!({ "checked": checked })))
}

pub async fn execute_key_press(
    ctx: &mut ActionCtx<'_>,
    config: &KeyPressConfig,
) -> Result<NodeResult, ActionError> {
    let key = ctx.text(&config.key);
    if key.trim().is_empty() {
        return Err(ActionError::missing(ctx.action, "key"));
    }
    let selector = match config.selector.as_deref() {
        Some(raw) if !raw.trim().is_empty() => Some(ctx.text(raw)),
        _ => None,
    };
    ctx.page.press_key(selector.as_deref(), &key).await?;
    Ok(NodeResult::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DispatchScope;
    use cdp_adapter::{StubDocument, StubElement, StubPage, StubScript};
    use serde_json::{Map, Value};
    use tokio_util::sync::CancellationToken;

    fn page() -> StubPage {
        let doc = StubDocument::new()
            .with_element("#name", StubElement::text(""))
            .with_element("#spinner", StubElement::text("...").hidden());
        StubPage::new(StubScript::new(doc), Default::default())
    }

    fn vars() -> Map<String, Value> {
        json!({"who": "Ada"}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn type_interpolates_and_clears_by_default() {
        let page = page();
        let vars = vars();
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "n1", "type");
        let config = TypeConfig {
            selector: Some("#name".into()),
            text: Some("Hello {{who}}".into()),
            ..Default::default()
        };
        execute_type(&mut ctx, &config).await.unwrap();
        execute_type(&mut ctx, &config).await.unwrap();
        assert_eq!(page.typed_value("#name").as_deref(), Some("Hello Ada"));
    }

    #[tokio::test]
    async fn wait_for_hidden_element_times_out() {
        let page = page();
        let vars = vars();
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "n1", "waitFor");
        let config = WaitForConfig {
            selector: Some("#spinner".into()),
            state: None,
            timeout: Some(10),
        };
        let err = execute_wait_for(&mut ctx, &config).await.unwrap_err();
        assert!(err.to_string().starts_with("Timeout waiting for selector"));
    }

    #[tokio::test]
    async fn scroll_infers_element_target_from_selector() {
        let page = page();
        let vars = vars();
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "n1", "scroll");
        let config = ScrollConfig {
            selector: Some("#name".into()),
            ..Default::default()
        };
        execute_scroll(&mut ctx, &config).await.unwrap();
        assert_eq!(page.calls_to("scroll"), vec!["scroll Element(\"#name\")"]);
    }
}
