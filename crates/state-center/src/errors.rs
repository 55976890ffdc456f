use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Execution {0} already finished")]
    AlreadyFinished(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl StateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::ExecutionNotFound(_))
    }
}
