//! Flow execution error types

use thiserror::Error;

/// Flow execution errors
#[derive(Debug, Error)]
pub enum FlowError {
    /// Flow validation failed
    #[error("Flow validation failed: {0}")]
    ValidationFailed(String),

    /// Flow file could not be read or parsed
    #[error("Failed to load flow {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// No start node and no node without incoming edges
    #[error("Flow has no entry node")]
    NoEntryNode,

    /// A node reported failure; the run stops here
    #[error("Node {node_id} failed: {error}")]
    NodeFailed { node_id: String, error: String },

    /// Per-run node visit budget exhausted (usually a cycle)
    #[error("Node visit budget of {0} exceeded; the flow graph probably contains a cycle")]
    VisitBudgetExceeded(usize),

    /// Recursion went deeper than the configured limit
    #[error("Traversal depth limit of {0} exceeded; the flow graph probably contains a cycle")]
    DepthExceeded(usize),

    /// Loop condition could not be evaluated
    #[error("Loop condition failed on node {node_id}: {reason}")]
    LoopConditionFailed { node_id: String, reason: String },

    /// Browser session could not be created
    #[error("Failed to start browser session: {0}")]
    Session(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<cdp_adapter::AdapterError> for FlowError {
    fn from(err: cdp_adapter::AdapterError) -> Self {
        FlowError::Session(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_failure_keeps_primitive_message() {
        let err = FlowError::NodeFailed {
            node_id: "n1".into(),
            error: "Unknown action: doesNotExist".into(),
        };
        assert!(err.to_string().contains("Unknown action"));
    }
}
