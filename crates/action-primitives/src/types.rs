//! Core data types for node dispatch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::node::{LoopType, VariableCondition};

/// Dispatch context for one node
///
/// Carries what a node needs to know about the run it belongs to:
/// - Execution and flow ids (response metadata, logging)
/// - Cancellation token shared with the cancellation registry
/// - How many nodes the run has logged so far
#[derive(Clone, Debug)]
pub struct DispatchScope {
    pub execution_id: String,
    pub flow_id: String,
    pub cancel_token: CancellationToken,
    pub nodes_executed: usize,
    pub started_at: DateTime<Utc>,
}

impl DispatchScope {
    pub fn new(
        execution_id: impl Into<String>,
        flow_id: impl Into<String>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            flow_id: flow_id.into(),
            cancel_token,
            nodes_executed: 0,
            started_at: Utc::now(),
        }
    }

    pub fn with_nodes_executed(mut self, count: usize) -> Self {
        self.nodes_executed = count;
        self
    }

    /// Check if the run has been asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// A single variable a node wants written into the run's scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableWrite {
    pub name: String,
    pub value: Value,
}

/// Loop parameters handed from a `loop` node to the traversal engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    pub loop_type: LoopType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_variable: Option<String>,
    pub item_variable: String,
    pub index_variable: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<VariableCondition>,
    pub max_iterations: u64,
}

/// Normalized outcome of dispatching one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<VariableWrite>,

    /// Branch decision for `condition`, `isVisible` and regex `test`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_handle: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_array_loop: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_data: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_config: Option<LoopConfig>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_terminal_node: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,

    /// Node-specific details (dialog info, resolved url, element state)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Set when a browser failure was swallowed because the run was being stopped
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

impl NodeResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            success: true,
            cancelled: true,
            ..Self::default()
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variable = Some(VariableWrite {
            name: name.into(),
            value,
        });
        self
    }

    pub fn with_branch(mut self, condition: bool) -> Self {
        self.condition = Some(condition);
        self.next_handle = Some(if condition { "true" } else { "false" }.to_string());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn terminal(response: Value) -> Self {
        Self {
            success: true,
            is_terminal_node: true,
            response: Some(response),
            ..Self::default()
        }
    }

    /// Value this node produced, used for `<nodeId>_output` and `currentInput`.
    pub fn output(&self) -> Option<&Value> {
        self.variable.as_ref().map(|v| &v.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn branch_sets_matching_handle() {
        let result = NodeResult::ok().with_branch(false);
        assert_eq!(result.condition, Some(false));
        assert_eq!(result.next_handle.as_deref(), Some("false"));
    }

    #[test]
    fn serialized_result_omits_unset_fields() {
        let value =
            serde_json::to_value(NodeResult::ok().with_variable("title", json!("Hi"))).unwrap();
        assert_eq!(
            value,
            json!({"success": true, "variable": {"name": "title", "value": "Hi"}})
        );
    }

    #[test]
    fn scope_reflects_token() {
        let token = CancellationToken::new();
        let scope = DispatchScope::new("e", "f", token.clone());
        assert!(!scope.is_cancelled());
        token.cancel();
        assert!(scope.is_cancelled());
    }
}
