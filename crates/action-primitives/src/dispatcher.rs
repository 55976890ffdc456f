//! Node dispatcher - one node, one primitive, one normalized result

use std::time::Instant;

use async_trait::async_trait;
use cdp_adapter::BrowserPage;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    errors::ActionError,
    metrics,
    node::{FlowNode, NodeAction},
    primitives::*,
    types::{DispatchScope, NodeResult},
};

/// Executes a single node against a page.
///
/// Implementations never return an error: every failure becomes a `NodeResult` with
/// `success: false`, so the traversal engine decides what a failure means for the run.
#[async_trait]
pub trait NodeDispatch: Send + Sync {
    async fn dispatch(
        &self,
        page: &dyn BrowserPage,
        node: &FlowNode,
        variables: &Map<String, Value>,
        scope: &DispatchScope,
    ) -> NodeResult;
}

/// Default dispatcher: parses the node's typed action and runs the matching primitive.
#[derive(Clone, Debug, Default)]
pub struct DefaultNodeDispatcher;

impl DefaultNodeDispatcher {
    pub fn new() -> Self {
        Self
    }

    async fn execute(
        &self,
        page: &dyn BrowserPage,
        node: &FlowNode,
        variables: &Map<String, Value>,
        scope: &DispatchScope,
    ) -> Result<NodeResult, ActionError> {
        let action = node.parse_action()?;
        let mut ctx = ActionCtx::new(page, variables, scope, &node.id, action.kind());
        let result = match &action {
            NodeAction::Navigate(cfg) => execute_navigate(&mut ctx, cfg).await,
            NodeAction::Click(cfg) => execute_click(&mut ctx, cfg).await,
            NodeAction::Type(cfg) => execute_type(&mut ctx, cfg).await,
            NodeAction::WaitFor(cfg) => execute_wait_for(&mut ctx, cfg).await,
            NodeAction::Scroll(cfg) => execute_scroll(&mut ctx, cfg).await,
            NodeAction::ExtractText(cfg) => execute_extract_text(&mut ctx, cfg).await,
            NodeAction::ExtractHtml(cfg) => execute_extract_html(&mut ctx, cfg).await,
            NodeAction::ExtractAttribute(cfg) => execute_extract_attribute(&mut ctx, cfg).await,
            NodeAction::Screenshot(cfg) => execute_screenshot(&mut ctx, cfg).await,
            NodeAction::WaitTime(cfg) => execute_wait_time(&mut ctx, cfg).await,
            NodeAction::SetVariable(cfg) => execute_set_variable(&mut ctx, cfg).await,
            NodeAction::Condition(cfg) => execute_condition(&mut ctx, cfg).await,
            NodeAction::IsVisible(cfg) => execute_is_visible(&mut ctx, cfg).await,
            NodeAction::Hover(cfg) => execute_hover(&mut ctx, cfg).await,
            NodeAction::SelectOption(cfg) => execute_select_option(&mut ctx, cfg).await,
            NodeAction::CheckBox(cfg) => execute_check_box(&mut ctx, cfg).await,
            NodeAction::KeyPress(cfg) => execute_key_press(&mut ctx, cfg).await,
            NodeAction::Iframe(cfg) => execute_iframe(&mut ctx, cfg).await,
            NodeAction::Download(cfg) => execute_download(&mut ctx, cfg).await,
            NodeAction::UploadFile(cfg) => execute_upload_file(&mut ctx, cfg).await,
            NodeAction::ClearCookies(_) => execute_clear_cookies(&mut ctx).await,
            NodeAction::SetCookie(cfg) => execute_set_cookie(&mut ctx, cfg).await,
            NodeAction::Alert(cfg) => execute_alert(&mut ctx, cfg).await,
            NodeAction::Regex(cfg) => execute_regex(&mut ctx, cfg).await,
            NodeAction::ExtractUrls(cfg) => execute_extract_urls(&mut ctx, cfg).await,
            NodeAction::Loop(cfg) => execute_loop(&mut ctx, cfg).await,
            NodeAction::Response(cfg) => execute_response(&mut ctx, cfg).await,
            NodeAction::Start(_) => Ok(NodeResult::ok()),
        };
        let warnings = ctx.take_warnings();
        result.map(|r| r.with_warnings(warnings))
    }
}

#[async_trait]
impl NodeDispatch for DefaultNodeDispatcher {
    async fn dispatch(
        &self,
        page: &dyn BrowserPage,
        node: &FlowNode,
        variables: &Map<String, Value>,
        scope: &DispatchScope,
    ) -> NodeResult {
        let started = Instant::now();
        debug!(
            execution_id = %scope.execution_id,
            node_id = %node.id,
            action = %node.action,
            "Dispatching node"
        );

        let result = match self.execute(page, node, variables, scope).await {
            Ok(result) => result,
            Err(err) if scope.is_cancelled() && err.is_target_closed() => {
                info!(
                    execution_id = %scope.execution_id,
                    node_id = %node.id,
                    %err,
                    "browser closed during stop request; treating node as cancelled"
                );
                NodeResult::cancelled()
            }
            Err(err) => {
                warn!(
                    execution_id = %scope.execution_id,
                    node_id = %node.id,
                    action = %node.action,
                    %err,
                    "Node failed"
                );
                NodeResult::failure(err.to_string())
            }
        };

        metrics::record_dispatch(&node.action, started.elapsed(), result.success);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_adapter::{StubDocument, StubElement, StubPage, StubScript};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn page() -> StubPage {
        StubPage::new(
            StubScript::new(StubDocument::new().with_element("#go", StubElement::text("Go"))),
            Default::default(),
        )
    }

    #[test]
    fn unknown_action_fails_node() {
        tokio_test::block_on(async {
            let page = page();
            let scope = DispatchScope::new("e", "f", CancellationToken::new());
            let node = FlowNode::new("x", "doesNotExist", json!({}));
            let result = DefaultNodeDispatcher::new()
                .dispatch(&page, &node, &Map::new(), &scope)
                .await;
            assert!(!result.success);
            assert!(result.error.unwrap().contains("Unknown action"));
        });
    }

    #[test]
    fn start_node_is_a_no_op() {
        tokio_test::block_on(async {
            let page = page();
            let scope = DispatchScope::new("e", "f", CancellationToken::new());
            let node = FlowNode::new("start-node", "start", Value::Null);
            let result = DefaultNodeDispatcher::new()
                .dispatch(&page, &node, &Map::new(), &scope)
                .await;
            assert!(result.success);
            assert!(page.calls().is_empty());
        });
    }

    #[tokio::test]
    async fn closed_page_is_swallowed_only_when_cancelled() {
        let page = page();
        page.close().await.unwrap();
        let node = FlowNode::new("c", "click", json!({"selector": "#go"}));
        let dispatcher = DefaultNodeDispatcher::new();

        let live = DispatchScope::new("e", "f", CancellationToken::new());
        let failed = dispatcher.dispatch(&page, &node, &Map::new(), &live).await;
        assert!(!failed.success);

        let token = CancellationToken::new();
        token.cancel();
        let stopping = DispatchScope::new("e", "f", token);
        let swallowed = dispatcher.dispatch(&page, &node, &Map::new(), &stopping).await;
        assert!(swallowed.success);
        assert!(swallowed.cancelled);
    }

    #[tokio::test]
    async fn warnings_are_attached_to_result() {
        let page = page();
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let vars = json!({"list": [1, 2]}).as_object().cloned().unwrap();
        let node = FlowNode::new(
            "s",
            "setVariable",
            json!({"variable": "joined", "value": "{{list}}"}),
        );
        let result = DefaultNodeDispatcher::new()
            .dispatch(&page, &node, &vars, &scope)
            .await;
        assert_eq!(result.output(), Some(&json!("1,2")));
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn invalid_config_names_the_action() {
        let page = page();
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let node = FlowNode::new("w", "waitFor", json!({"selector": "#go", "timeout": "later"}));
        let result = DefaultNodeDispatcher::new()
            .dispatch(&page, &node, &Map::new(), &scope)
            .await;
        assert!(result
            .error
            .unwrap()
            .starts_with("Invalid config for waitFor"));
    }
}
