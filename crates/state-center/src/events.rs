use chrono::{DateTime, Utc};
use flowpilot_core_types::{ExecutionId, ExecutionStatus, FlowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One notification about an execution. Serialized flat:
/// `{ "type": "node-execution", "executionId": .., "flowId": .., "timestamp": .., ... }`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    pub execution_id: ExecutionId,
    pub flow_id: FlowId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventPayload {
    #[serde(rename_all = "camelCase")]
    ExecutionStatus {
        status: ExecutionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    NodeExecution {
        node_id: String,
        node_name: String,
        action: String,
    },
    #[serde(rename_all = "camelCase")]
    NodeCompletion {
        node_id: String,
        action: String,
        result: Value,
    },
    #[serde(rename_all = "camelCase")]
    NodeError {
        node_id: String,
        action: String,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    VariableUpdate { name: String, value: Value },
    #[serde(rename_all = "camelCase")]
    LogMessage {
        level: LogLevel,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ExecutionComplete { results: Value, duration_ms: u64 },
    #[serde(rename_all = "camelCase")]
    ExecutionError { error: String },
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::ExecutionStatus { .. } => "execution-status",
            EventPayload::NodeExecution { .. } => "node-execution",
            EventPayload::NodeCompletion { .. } => "node-completion",
            EventPayload::NodeError { .. } => "node-error",
            EventPayload::VariableUpdate { .. } => "variable-update",
            EventPayload::LogMessage { .. } => "log-message",
            EventPayload::ExecutionComplete { .. } => "execution-complete",
            EventPayload::ExecutionError { .. } => "execution-error",
        }
    }

    /// The last event an execution emits.
    pub fn is_final(&self) -> bool {
        match self {
            EventPayload::ExecutionComplete { .. } | EventPayload::ExecutionError { .. } => true,
            EventPayload::ExecutionStatus { status, .. } => *status == ExecutionStatus::Cancelled,
            _ => false,
        }
    }
}

impl ExecutionEvent {
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

/// An event plus its position in the execution's stream. Ids start at 0 and increase by one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: u64,
    pub event: ExecutionEvent,
}
