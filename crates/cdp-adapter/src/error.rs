use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// High-level error categories surfaced by the adapter.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum AdapterErrorKind {
    #[error("navigation timed out")]
    NavTimeout,
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("target element not found")]
    TargetNotFound,
    #[error("option not found")]
    OptionNotFound,
    #[error("target closed")]
    TargetClosed,
    #[error("internal error")]
    Internal,
}

/// Enriched error metadata passed back to higher layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
            data: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn target_closed(hint: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::TargetClosed).with_hint(hint)
    }

    pub fn not_found(selector: &str) -> Self {
        Self::new(AdapterErrorKind::TargetNotFound)
            .with_hint(format!("no element matches selector '{}'", selector))
    }

    /// True when the failure came from a page, context or connection that is gone.
    pub fn is_target_closed(&self) -> bool {
        if self.kind == AdapterErrorKind::TargetClosed {
            return true;
        }
        self.hint
            .as_deref()
            .map(looks_like_closed_target)
            .unwrap_or(false)
    }
}

/// Heuristic over driver messages for connection or target teardown.
pub fn looks_like_closed_target(message: &str) -> bool {
    const MARKERS: &[&str] = &[
        "target closed",
        "target page, context or browser has been closed",
        "session closed",
        "no session with given id",
        "connection closed",
        "channelsenderror",
        "browser has been closed",
        "websocket",
    ];
    let lower = message.to_ascii_lowercase();
    MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_target_detected_from_kind_or_hint() {
        assert!(AdapterError::target_closed("page gone").is_target_closed());
        assert!(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint("Protocol error: Target closed.")
            .is_target_closed());
        assert!(!AdapterError::not_found("#missing").is_target_closed());
    }

    #[test]
    fn display_includes_hint() {
        let err = AdapterError::new(AdapterErrorKind::NavTimeout).with_hint("after 30000ms");
        assert_eq!(err.to_string(), "navigation timed out: after 30000ms");
    }
}
