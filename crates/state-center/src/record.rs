use chrono::{DateTime, Utc};
use flowpilot_core_types::{ExecutionId, ExecutionStatus, FlowId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One line of an execution log: a node visit or a loop iteration marker.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub node_id: String,
    pub node_name: String,
    pub action: String,
    pub result: Value,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionLogEntry {
    pub fn new(
        node_id: impl Into<String>,
        node_name: impl Into<String>,
        action: impl Into<String>,
        result: Value,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_name: node_name.into(),
            action: action.into(),
            result,
            timestamp: Utc::now(),
        }
    }
}

/// Persisted snapshot of an execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    pub flow_id: FlowId,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_log: Vec<ExecutionLogEntry>,
}

impl ExecutionRecord {
    pub fn new(execution_id: ExecutionId, flow_id: FlowId) -> Self {
        Self {
            execution_id,
            flow_id,
            status: ExecutionStatus::Pending,
            variables: Map::new(),
            results: None,
            error: None,
            current_node_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            execution_log: Vec::new(),
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let finished = self.completed_at.unwrap_or_else(Utc::now);
        Some((finished - started).num_milliseconds().max(0) as u64)
    }
}
