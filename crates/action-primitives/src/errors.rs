//! Error types for node dispatch

use cdp_adapter::AdapterError;
use thiserror::Error;

/// Everything that can fail a single node.
#[derive(Debug, Error, Clone)]
pub enum ActionError {
    /// Node carried an action kind this dispatcher does not know
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Known action kind whose configuration could not be parsed
    #[error("Invalid config for {action}: {message}")]
    InvalidConfig { action: String, message: String },

    /// A required configuration value was absent or empty after interpolation
    #[error("Missing required field '{field}' for {action}")]
    MissingField { action: String, field: String },

    /// Target element was not present on the page
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// `waitFor` gave up before the selector reached the requested state
    #[error("Timeout waiting for selector: {0}")]
    WaitTimeout(String),

    /// Regex pattern failed to compile
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(String),

    /// Variable did not hold the type the node needs
    #[error("Variable '{name}' {problem}")]
    BadVariable { name: String, problem: String },

    /// Local filesystem failure (screenshots, downloads)
    #[error("I/O error: {0}")]
    Io(String),

    /// Browser-level failure
    #[error("{0}")]
    Adapter(#[from] AdapterError),
}

impl ActionError {
    pub fn invalid_config(action: &str, message: impl ToString) -> Self {
        ActionError::InvalidConfig {
            action: action.to_string(),
            message: message.to_string(),
        }
    }

    pub fn missing(action: &str, field: &str) -> Self {
        ActionError::MissingField {
            action: action.to_string(),
            field: field.to_string(),
        }
    }

    /// True when the browser connection, page or target went away underneath the node.
    pub fn is_target_closed(&self) -> bool {
        match self {
            ActionError::Adapter(err) => err.is_target_closed(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for ActionError {
    fn from(err: std::io::Error) -> Self {
        ActionError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_action_message_names_the_kind() {
        let err = ActionError::UnknownAction("doesNotExist".into());
        assert_eq!(err.to_string(), "Unknown action: doesNotExist");
    }

    #[test]
    fn only_adapter_closures_count_as_closed_target() {
        assert!(ActionError::from(AdapterError::target_closed("gone")).is_target_closed());
        assert!(!ActionError::ElementNotFound("#x".into()).is_target_closed());
    }
}
