//! Session primitives - cookies and JavaScript dialogs

use cdp_adapter::{CookieSpec, DialogResponse};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{millis, variable_name, ActionCtx};
use crate::{
    errors::ActionError,
    node::{AlertAction, AlertConfig, SetCookieConfig},
    types::NodeResult,
};

const DEFAULT_DIALOG_TIMEOUT_MS: u64 = 5_000;

pub async fn execute_clear_cookies(ctx: &mut ActionCtx<'_>) -> Result<NodeResult, ActionError> {
    ctx.page.clear_cookies().await?;
    Ok(NodeResult::ok())
}

/// Execute setCookie primitive
///
/// Accepts one inline cookie or a `cookies` list. Cookies without `url` or `domain` are scoped
/// to the page's current URL.
pub async fn execute_set_cookie(
    ctx: &mut ActionCtx<'_>,
    config: &SetCookieConfig,
) -> Result<NodeResult, ActionError> {
    let mut cookies: Vec<CookieSpec> = config.cookies.clone();
    if let Some(name) = config.name.as_deref().filter(|n| !n.trim().is_empty()) {
        cookies.push(CookieSpec {
            name: ctx.text(name),
            value: config.value.as_deref().map(|v| ctx.text(v)).unwrap_or_default(),
            url: config.url.as_deref().map(|v| ctx.text(v)),
            domain: config.domain.clone(),
            path: config.path.clone(),
            expires: config.expires,
            http_only: config.http_only,
            secure: config.secure,
        });
    }
    if cookies.is_empty() {
        return Err(ActionError::missing(ctx.action, "name"));
    }

    let current = ctx.page.current_url().await?;
    for cookie in cookies.iter_mut() {
        cookie.value = ctx.text(&cookie.value);
        if cookie.url.is_none() && cookie.domain.is_none() {
            cookie.url = current.clone();
        }
    }
    ctx.page.set_cookies(&cookies).await?;
    Ok(NodeResult::ok().with_data(json!({ "count": cookies.len() })))
}

/// Execute alert primitive
///
/// Waits up to `timeout` for the next dialog and answers it. No dialog is not a failure: the node
/// succeeds with a warning and stores `null`.
pub async fn execute_alert(
    ctx: &mut ActionCtx<'_>,
    config: &AlertConfig,
) -> Result<NodeResult, ActionError> {
    let response = match config.action {
        AlertAction::Accept | AlertAction::GetText => DialogResponse::Accept {
            prompt_text: config.prompt_text.as_deref().map(|t| ctx.text(t)),
        },
        AlertAction::Dismiss => DialogResponse::Dismiss,
    };
    let dialog = ctx
        .page
        .wait_for_dialog(response, millis(config.timeout, DEFAULT_DIALOG_TIMEOUT_MS))
        .await?;

    let (value, data) = match dialog {
        Some(info) => {
            info!(node_id = ctx.node_id, kind = %info.kind, "Dialog handled");
            (Value::String(info.message.clone()), json!(info))
        }
        None => {
            warn!(node_id = ctx.node_id, "no dialog appeared before timeout");
            ctx.warn("No dialog appeared before the timeout");
            (Value::Null, Value::Null)
        }
    };

    let mut result = NodeResult::ok().with_data(data);
    let wants_value =
        config.action == AlertAction::GetText || config.variable.as_deref().is_some();
    if wants_value {
        result = result.with_variable(variable_name(config.variable.as_deref(), "alertText"), value);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DispatchScope;
    use cdp_adapter::{StubPage, StubScript};
    use serde_json::Map;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn get_text_returns_dialog_message() {
        let page = StubPage::new(
            StubScript::default().dialog("alert", "Saved!"),
            Default::default(),
        );
        let vars = Map::new();
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "n", "alert");
        let result = execute_alert(
            &mut ctx,
            &AlertConfig {
                action: AlertAction::GetText,
                variable: Some("msg".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(result.output(), Some(&json!("Saved!")));
    }

    #[tokio::test]
    async fn missing_dialog_is_a_warning() {
        let page = StubPage::new(StubScript::default(), Default::default());
        let vars = Map::new();
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "n", "alert");
        let result = execute_alert(
            &mut ctx,
            &AlertConfig {
                action: AlertAction::GetText,
                timeout: Some(5),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(result.success);
        assert_eq!(result.output(), Some(&Value::Null));
        assert_eq!(ctx.take_warnings().len(), 1);
    }

    #[tokio::test]
    async fn inline_cookie_is_interpolated() {
        let page = StubPage::new(StubScript::default(), Default::default());
        let vars = json!({"token": "abc"}).as_object().cloned().unwrap();
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "n", "setCookie");
        execute_set_cookie(
            &mut ctx,
            &SetCookieConfig {
                name: Some("session".into()),
                value: Some("{{token}}".into()),
                domain: Some("site.test".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let cookies = page.cookies();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].value, "abc");
    }
}
