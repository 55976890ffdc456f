//! Flow engine - depth-first traversal of a flow graph

use std::sync::Arc;

use action_primitives::{
    evaluate_variable_condition, DefaultNodeDispatcher, DispatchScope, FlowNode, LoopConfig,
    NodeDispatch, NodeResult,
};
use async_recursion::async_recursion;
use cdp_adapter::{BrowserPage, SessionProvider};
use chrono::Utc;
use flowpilot_core_types::{ExecutionId, ExecutionStatus, FlowId};
use flowpilot_state_center::{
    ExecutionLogEntry, ExecutionRecord, ExecutionStatusRegistry, LogLevel,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::cancellation::CancellationRegistry;
use crate::context::ExecutionContext;
use crate::definition::FlowDefinition;
use crate::errors::FlowError;
use crate::graph::FlowGraph;
use crate::metrics;

pub const LOOP_ITERATION_ACTION: &str = "loop_iteration";

/// Guards against cyclic graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineLimits {
    /// Node dispatches allowed per execution, loop iterations included
    pub max_node_visits: usize,
    /// Maximum traversal depth from the entry node
    pub max_depth: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_node_visits: 10_000,
            max_depth: 512,
        }
    }
}

/// Whether traversal should keep going after a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    /// Terminal node reached or run cancelled
    Halt,
}

/// Graph traversal engine
///
/// Walks one flow per execution, strictly sequentially:
/// - Resolves the entry node and visits successors depth-first
/// - Routes branching nodes by `nextHandle`, fanning out over every matching edge
/// - Expands array-loop nodes into per-item runs of their loop body
/// - Checks cancellation before every node
pub struct FlowEngine {
    provider: Arc<dyn SessionProvider>,
    dispatcher: Arc<dyn NodeDispatch>,
    cancellations: Arc<CancellationRegistry>,
    states: Arc<ExecutionStatusRegistry>,
    limits: EngineLimits,
}

impl FlowEngine {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        cancellations: Arc<CancellationRegistry>,
        states: Arc<ExecutionStatusRegistry>,
        limits: EngineLimits,
    ) -> Self {
        Self {
            provider,
            dispatcher: Arc::new(DefaultNodeDispatcher::new()),
            cancellations,
            states,
            limits,
        }
    }

    /// Replace the node dispatcher
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn NodeDispatch>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn states(&self) -> &Arc<ExecutionStatusRegistry> {
        &self.states
    }

    pub fn cancellations(&self) -> &Arc<CancellationRegistry> {
        &self.cancellations
    }

    pub fn limits(&self) -> EngineLimits {
        self.limits
    }

    /// Register a pending execution of `flow`. The id is known (and stoppable) before the run
    /// starts, so callers can hand it out and execute in the background.
    pub fn create_context(&self, flow: &FlowDefinition) -> ExecutionContext {
        let execution_id = ExecutionId::new();
        let flow_id = FlowId::from(flow.id.as_str());
        let handle = self
            .states
            .register(execution_id.clone(), flow_id.clone(), flow.variables.clone());
        let token = self.cancellations.register(execution_id.as_str());
        ExecutionContext::new(handle, flow_id, token)
    }

    /// Create a context and execute it.
    pub async fn run(
        &self,
        flow: &FlowDefinition,
        variables: Map<String, Value>,
    ) -> Result<ExecutionRecord, FlowError> {
        let context = self.create_context(flow);
        self.execute(flow, context, variables).await
    }

    /// Execute a flow to a terminal status
    ///
    /// Steps:
    /// 1. Seed variables (flow defaults, caller overrides win), mark the run running and persist
    ///    that snapshot
    /// 2. Acquire a page and traverse from the entry node
    /// 3. Settle the status: cancelled when a stop was requested, else completed or failed
    /// 4. Release the page once (unless `keepOpen` and not stopped), drop the cancellation entry
    ///    and persist the final snapshot
    ///
    /// Node failures never surface as `Err`; they end up in the returned record.
    pub async fn execute(
        &self,
        flow: &FlowDefinition,
        mut context: ExecutionContext,
        variables: Map<String, Value>,
    ) -> Result<ExecutionRecord, FlowError> {
        let execution_id = context.execution_id.to_string();

        // 1. Seed
        context.seed(&flow.variables, variables);
        context.started_at = Utc::now();
        context.handle.mark_running();
        context.handle.persist().await;
        metrics::execution_started();
        info!(
            execution_id = %execution_id,
            flow_id = %context.flow_id,
            nodes = flow.nodes.len(),
            "Flow execution started"
        );

        // 2. Traverse
        let mut page = None;
        let outcome = self.traverse(flow, &mut context, &mut page).await;

        // 3. Settle
        let status = if context.is_cancelled() {
            if let Err(err) = &outcome {
                debug!(execution_id = %execution_id, %err, "error after stop request ignored");
            }
            context.handle.cancel();
            ExecutionStatus::Cancelled
        } else {
            match outcome {
                Ok(()) => {
                    context.handle.complete(context.results());
                    ExecutionStatus::Completed
                }
                Err(err) => {
                    warn!(execution_id = %execution_id, %err, "Flow execution failed");
                    context.handle.fail(&err.to_string());
                    ExecutionStatus::Failed
                }
            }
        };
        let status = context.handle.status().unwrap_or(status);

        // 4. Cleanup; a stop request already closed the page
        let keep_open = flow.browser_settings.keep_open
            && status != ExecutionStatus::Cancelled
            && page.is_some();
        if keep_open {
            info!(execution_id = %execution_id, "keepOpen set; leaving browser page open");
            self.cancellations.keep_open(&execution_id);
        } else {
            self.cancellations.release(&execution_id).await;
        }
        self.cancellations.finish(&execution_id);
        context.handle.persist().await;
        metrics::execution_finished(status);

        info!(
            execution_id = %execution_id,
            status = %status,
            nodes_logged = context.logged,
            "Flow execution finished"
        );
        context.handle.snapshot().ok_or_else(|| {
            FlowError::Internal(format!("execution {} is no longer tracked", execution_id))
        })
    }

    /// Request cooperative cancellation; the page is closed immediately.
    pub async fn stop_execution(&self, execution_id: &str) -> bool {
        let stopped = self.cancellations.stop(execution_id).await;
        if stopped {
            if let Some(handle) = self.states.handle(execution_id) {
                handle.log(LogLevel::Info, "Stop requested", None);
            }
        }
        stopped
    }

    pub fn is_running(&self, execution_id: &str) -> bool {
        self.cancellations.is_running(execution_id)
    }

    async fn traverse(
        &self,
        flow: &FlowDefinition,
        ctx: &mut ExecutionContext,
        page_slot: &mut Option<Arc<dyn BrowserPage>>,
    ) -> Result<(), FlowError> {
        if ctx.is_cancelled() {
            return Ok(());
        }
        let graph = FlowGraph::new(flow);
        let entry = graph.entry().ok_or(FlowError::NoEntryNode)?;

        let page = self.provider.create_page(&flow.browser_settings).await?;
        let execution_id = ctx.execution_id.to_string();
        if !self.cancellations.attach_page(&execution_id, page.clone()) {
            debug!(execution_id = %execution_id, "stopped while the page was starting");
            if let Err(err) = page.close().await {
                warn!(execution_id = %execution_id, %err, "failed to close browser page");
            }
            return Ok(());
        }
        *page_slot = Some(page.clone());

        self.visit(&graph, page.as_ref(), entry, ctx, 0).await?;
        Ok(())
    }

    /// Visit one node and, unless it halts traversal, its successors.
    #[async_recursion]
    async fn visit<'g>(
        &self,
        graph: &FlowGraph<'g>,
        page: &dyn BrowserPage,
        node: &'g FlowNode,
        ctx: &mut ExecutionContext,
        depth: usize,
    ) -> Result<Step, FlowError> {
        if ctx.is_cancelled() {
            debug!(
                execution_id = %ctx.execution_id,
                node_id = %node.id,
                "execution cancelled; stopping traversal"
            );
            return Ok(Step::Halt);
        }
        if depth > self.limits.max_depth {
            return Err(FlowError::DepthExceeded(self.limits.max_depth));
        }
        ctx.visits += 1;
        if ctx.visits > self.limits.max_node_visits {
            return Err(FlowError::VisitBudgetExceeded(self.limits.max_node_visits));
        }

        ctx.handle
            .node_started(&node.id, node.display_name(), &node.action);
        let mut scope = DispatchScope::new(
            ctx.execution_id.to_string(),
            ctx.flow_id.to_string(),
            ctx.cancel_token(),
        )
        .with_nodes_executed(ctx.logged);
        scope.started_at = ctx.started_at;

        let result = self
            .dispatcher
            .dispatch(page, node, &ctx.variables, &scope)
            .await;

        let summary = serde_json::to_value(&result).unwrap_or(Value::Null);
        ctx.append_log(ExecutionLogEntry::new(
            &node.id,
            node.display_name(),
            &node.action,
            summary.clone(),
        ));
        for warning in &result.warnings {
            ctx.log_message(LogLevel::Warn, warning.clone(), Some(&node.id));
        }

        if !result.success {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| "Node reported failure".to_string());
            ctx.handle.node_failed(&node.id, &node.action, &error);
            return Err(FlowError::NodeFailed {
                node_id: node.id.clone(),
                error,
            });
        }
        ctx.handle.node_completed(&node.id, &node.action, summary);

        if let Some(write) = &result.variable {
            ctx.record_output(&node.id, &write.name, write.value.clone());
        }

        if result.is_terminal_node {
            info!(
                execution_id = %ctx.execution_id,
                node_id = %node.id,
                "Terminal node reached"
            );
            ctx.response = result.response.clone();
            return Ok(Step::Halt);
        }

        if result.is_array_loop {
            return self.run_loop(graph, page, node, &result, ctx, depth).await;
        }

        for next in graph.successors(&node.id, result.next_handle.as_deref()) {
            if self.visit(graph, page, next, ctx, depth + 1).await? == Step::Halt {
                return Ok(Step::Halt);
            }
        }
        Ok(Step::Continue)
    }

    /// Array-loop mode
    ///
    /// Runs the loop body once per item (or while the condition holds), then restores the
    /// item/index variables and runs the `after` successors once.
    async fn run_loop<'g>(
        &self,
        graph: &FlowGraph<'g>,
        page: &dyn BrowserPage,
        node: &'g FlowNode,
        result: &NodeResult,
        ctx: &mut ExecutionContext,
        depth: usize,
    ) -> Result<Step, FlowError> {
        let config = result.loop_config.clone().ok_or_else(|| {
            FlowError::Internal(format!("loop node {} returned no loop configuration", node.id))
        })?;
        let edges = graph.loop_edges(&node.id);
        let saved_item = ctx.variables.get(&config.item_variable).cloned();
        let saved_index = ctx.variables.get(&config.index_variable).cloned();

        let step = match &result.array_data {
            Some(items) => {
                let total = items.len();
                let mut step = Step::Continue;
                for (index, item) in items.iter().enumerate() {
                    if ctx.is_cancelled() {
                        step = Step::Halt;
                        break;
                    }
                    begin_iteration(node, &config, ctx, index, Some(item), Some(total));
                    step = self.run_body(graph, page, &edges.body, ctx, depth).await?;
                    if step == Step::Halt {
                        break;
                    }
                }
                step
            }
            None => self.run_while(graph, page, node, &config, &edges.body, ctx, depth).await?,
        };

        restore(ctx, &config.item_variable, saved_item);
        restore(ctx, &config.index_variable, saved_index);
        if step == Step::Halt {
            return Ok(Step::Halt);
        }

        for next in &edges.after {
            if self.visit(graph, page, next, ctx, depth + 1).await? == Step::Halt {
                return Ok(Step::Halt);
            }
        }
        Ok(Step::Continue)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_while<'g>(
        &self,
        graph: &FlowGraph<'g>,
        page: &dyn BrowserPage,
        node: &'g FlowNode,
        config: &LoopConfig,
        body: &[&'g FlowNode],
        ctx: &mut ExecutionContext,
        depth: usize,
    ) -> Result<Step, FlowError> {
        let condition = config
            .condition
            .as_ref()
            .ok_or_else(|| FlowError::LoopConditionFailed {
                node_id: node.id.clone(),
                reason: "while loop without condition".to_string(),
            })?;
        let mut index = 0usize;
        loop {
            if ctx.is_cancelled() {
                return Ok(Step::Halt);
            }
            if index as u64 >= config.max_iterations {
                ctx.log_message(
                    LogLevel::Warn,
                    format!("Loop stopped at maxIterations ({})", config.max_iterations),
                    Some(&node.id),
                );
                return Ok(Step::Continue);
            }
            let holds = evaluate_variable_condition(&ctx.variables, condition).map_err(|err| {
                FlowError::LoopConditionFailed {
                    node_id: node.id.clone(),
                    reason: err.to_string(),
                }
            })?;
            if !holds {
                return Ok(Step::Continue);
            }
            begin_iteration(node, config, ctx, index, None, None);
            if self.run_body(graph, page, body, ctx, depth).await? == Step::Halt {
                return Ok(Step::Halt);
            }
            index += 1;
        }
    }

    async fn run_body<'g>(
        &self,
        graph: &FlowGraph<'g>,
        page: &dyn BrowserPage,
        body: &[&'g FlowNode],
        ctx: &mut ExecutionContext,
        depth: usize,
    ) -> Result<Step, FlowError> {
        for next in body {
            if self.visit(graph, page, next, ctx, depth + 1).await? == Step::Halt {
                return Ok(Step::Halt);
            }
        }
        Ok(Step::Continue)
    }
}

fn begin_iteration(
    node: &FlowNode,
    config: &LoopConfig,
    ctx: &mut ExecutionContext,
    index: usize,
    item: Option<&Value>,
    total: Option<usize>,
) {
    if let Some(item) = item {
        ctx.set_variable(&config.item_variable, item.clone());
    }
    ctx.set_variable(&config.index_variable, json!(index));
    ctx.append_log(ExecutionLogEntry::new(
        &node.id,
        node.display_name(),
        LOOP_ITERATION_ACTION,
        json!({ "index": index, "item": item, "total": total }),
    ));
    let progress = match total {
        Some(total) => format!("Loop iteration {}/{}", index + 1, total),
        None => format!("Loop iteration {}", index + 1),
    };
    ctx.log_message(LogLevel::Info, progress, Some(&node.id));
}

fn restore(ctx: &mut ExecutionContext, name: &str, saved: Option<Value>) {
    match saved {
        Some(value) => ctx.set_variable(name, value),
        None => ctx.remove_variable(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::FlowEdge;
    use async_trait::async_trait;
    use cdp_adapter::StubSessionProvider;
    use flowpilot_state_center::{ExecutionStore, InMemoryExecutionStore};
    use parking_lot::Mutex;

    /// Records visits and answers from a fixed table instead of touching the page.
    struct ScriptedDispatcher {
        visited: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NodeDispatch for ScriptedDispatcher {
        async fn dispatch(
            &self,
            _page: &dyn BrowserPage,
            node: &FlowNode,
            _variables: &Map<String, Value>,
            _scope: &DispatchScope,
        ) -> NodeResult {
            self.visited.lock().push(node.id.clone());
            match node.action.as_str() {
                "condition" => NodeResult::ok().with_branch(false),
                _ => NodeResult::ok(),
            }
        }
    }

    fn engine(dispatcher: Arc<ScriptedDispatcher>, limits: EngineLimits) -> FlowEngine {
        FlowEngine::new(
            Arc::new(StubSessionProvider::default()),
            CancellationRegistry::new(),
            Arc::new(ExecutionStatusRegistry::default()),
            limits,
        )
        .with_dispatcher(dispatcher)
    }

    /// Reads the stored snapshot of the run while a node is executing.
    struct StoreProbingDispatcher {
        store: Arc<InMemoryExecutionStore>,
        seen: Mutex<Vec<ExecutionStatus>>,
    }

    #[async_trait]
    impl NodeDispatch for StoreProbingDispatcher {
        async fn dispatch(
            &self,
            _page: &dyn BrowserPage,
            _node: &FlowNode,
            _variables: &Map<String, Value>,
            scope: &DispatchScope,
        ) -> NodeResult {
            if let Ok(Some(record)) = self.store.load(&scope.execution_id).await {
                self.seen.lock().push(record.status);
            }
            NodeResult::ok()
        }
    }

    fn node(id: &str, action: &str) -> FlowNode {
        FlowNode::new(id, action, Value::Null)
    }

    #[tokio::test]
    async fn fan_out_runs_depth_first_in_edge_order() {
        let dispatcher = Arc::new(ScriptedDispatcher {
            visited: Mutex::new(Vec::new()),
        });
        let flow = FlowDefinition {
            id: "fan".into(),
            nodes: vec![
                node("start-node", "start"),
                node("a", "click"),
                node("a1", "click"),
                node("b", "click"),
            ],
            edges: vec![
                FlowEdge::new("start-node", "a"),
                FlowEdge::new("start-node", "b"),
                FlowEdge::new("a", "a1"),
            ],
            ..Default::default()
        };
        let record = engine(dispatcher.clone(), EngineLimits::default())
            .run(&flow, Map::new())
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(
            *dispatcher.visited.lock(),
            vec!["start-node", "a", "a1", "b"]
        );
    }

    #[tokio::test]
    async fn cycle_exhausts_visit_budget() {
        let dispatcher = Arc::new(ScriptedDispatcher {
            visited: Mutex::new(Vec::new()),
        });
        let flow = FlowDefinition {
            id: "cycle".into(),
            nodes: vec![node("start-node", "start"), node("c", "condition"), node("retry", "click")],
            edges: vec![
                FlowEdge::new("start-node", "c"),
                FlowEdge::new("c", "retry").with_handle("false"),
                FlowEdge::new("retry", "c"),
            ],
            ..Default::default()
        };
        let limits = EngineLimits {
            max_node_visits: 25,
            max_depth: 512,
        };
        let record = engine(dispatcher.clone(), limits)
            .run(&flow, Map::new())
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error.unwrap().contains("visit budget"));
        assert_eq!(dispatcher.visited.lock().len(), 25);
    }

    #[tokio::test]
    async fn depth_limit_fails_long_chains() {
        let dispatcher = Arc::new(ScriptedDispatcher {
            visited: Mutex::new(Vec::new()),
        });
        let mut nodes = vec![node("start-node", "start")];
        let mut edges = Vec::new();
        let mut previous = "start-node".to_string();
        for i in 0..10 {
            let id = format!("n{}", i);
            nodes.push(node(&id, "click"));
            edges.push(FlowEdge::new(previous.clone(), id.clone()));
            previous = id;
        }
        let flow = FlowDefinition {
            id: "deep".into(),
            nodes,
            edges,
            ..Default::default()
        };
        let limits = EngineLimits {
            max_node_visits: 100,
            max_depth: 4,
        };
        let record = engine(dispatcher, limits).run(&flow, Map::new()).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error.unwrap().contains("depth limit"));
    }

    #[tokio::test]
    async fn missing_entry_fails_without_opening_a_page() {
        let provider = Arc::new(StubSessionProvider::default());
        let engine = FlowEngine::new(
            provider.clone(),
            CancellationRegistry::new(),
            Arc::new(ExecutionStatusRegistry::default()),
            EngineLimits::default(),
        );
        let flow = FlowDefinition {
            id: "empty".into(),
            ..Default::default()
        };
        let record = engine.run(&flow, Map::new()).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Flow has no entry node"));
        assert!(provider.pages().is_empty());
        assert!(engine.cancellations().is_empty());
    }

    #[tokio::test]
    async fn in_flight_run_is_persisted_as_running() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let dispatcher = Arc::new(StoreProbingDispatcher {
            store: store.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let engine = FlowEngine::new(
            Arc::new(StubSessionProvider::default()),
            CancellationRegistry::new(),
            Arc::new(ExecutionStatusRegistry::new(Some(store.clone()))),
            EngineLimits::default(),
        )
        .with_dispatcher(dispatcher.clone());
        let flow = FlowDefinition {
            id: "persisted".into(),
            nodes: vec![node("start-node", "start"), node("a", "click")],
            edges: vec![FlowEdge::new("start-node", "a")],
            ..Default::default()
        };

        let record = engine.run(&flow, Map::new()).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert!(!dispatcher.seen.lock().is_empty());
        assert!(dispatcher
            .seen
            .lock()
            .iter()
            .all(|status| *status == ExecutionStatus::Running));

        let stored = store.load(&record.execution_id.0).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
    }
}
