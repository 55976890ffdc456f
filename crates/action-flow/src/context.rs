use chrono::{DateTime, Utc};
use flowpilot_core_types::{ExecutionId, FlowId};
use flowpilot_state_center::{ExecutionHandle, ExecutionLogEntry, LogLevel};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

pub const CURRENT_INPUT: &str = "currentInput";

/// Mutable state of one run. Owned by the task executing it; every mutation is mirrored to the
/// execution's status handle so listeners see it in order.
pub struct ExecutionContext {
    pub execution_id: ExecutionId,
    pub flow_id: FlowId,
    pub variables: Map<String, Value>,
    pub started_at: DateTime<Utc>,
    pub(crate) handle: ExecutionHandle,
    pub(crate) token: CancellationToken,
    pub(crate) visits: usize,
    pub(crate) logged: usize,
    pub(crate) response: Option<Value>,
}

impl ExecutionContext {
    pub(crate) fn new(handle: ExecutionHandle, flow_id: FlowId, token: CancellationToken) -> Self {
        Self {
            execution_id: handle.execution_id().clone(),
            flow_id,
            variables: Map::new(),
            started_at: Utc::now(),
            handle,
            token,
            visits: 0,
            logged: 0,
            response: None,
        }
    }

    pub fn handle(&self) -> &ExecutionHandle {
        &self.handle
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn seed(&mut self, defaults: &Map<String, Value>, overrides: Map<String, Value>) {
        self.variables = defaults.clone();
        self.variables.extend(overrides);
        self.handle.seed_variables(&self.variables);
    }

    pub(crate) fn set_variable(&mut self, name: &str, value: Value) {
        self.handle.variable_updated(name, &value);
        self.variables.insert(name.to_string(), value);
    }

    pub(crate) fn remove_variable(&mut self, name: &str) {
        if self.variables.remove(name).is_some() {
            self.handle.variable_removed(name);
        }
    }

    /// Store a node's output under its own name plus `<nodeId>_output` and `currentInput`.
    pub(crate) fn record_output(&mut self, node_id: &str, name: &str, value: Value) {
        self.set_variable(name, value.clone());
        self.set_variable(&format!("{}_output", node_id), value.clone());
        self.set_variable(CURRENT_INPUT, value);
    }

    pub(crate) fn append_log(&mut self, entry: ExecutionLogEntry) {
        self.logged += 1;
        self.handle.append_log_entry(entry);
    }

    pub(crate) fn log_message(&self, level: LogLevel, message: impl Into<String>, node_id: Option<&str>) {
        self.handle.log(level, message, node_id);
    }

    /// Run result: the terminal response when one was reached, else the variable scope.
    pub(crate) fn results(&self) -> Value {
        self.response
            .clone()
            .unwrap_or_else(|| Value::Object(self.variables.clone()))
    }
}
