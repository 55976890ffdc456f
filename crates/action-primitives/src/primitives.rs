//! Node primitives
//!
//! Grouped by what they touch:
//! 1. navigate - page navigation
//! 2. interact - click, type, hover, scroll, select, check, key press, waitFor
//! 3. extract - text, html, attributes, urls, screenshots, iframes
//! 4. files - downloads and uploads
//! 5. session - cookies and dialogs
//! 6. variables - waitTime, setVariable, regex
//! 7. control - condition, isVisible, loop, response, start

mod control;
mod extract;
mod files;
mod interact;
mod navigate;
mod session;
mod variables;

pub use control::*;
pub use extract::*;
pub use files::*;
pub use interact::*;
pub use navigate::*;
pub use session::*;
pub use variables::*;

use std::time::Duration;

use cdp_adapter::BrowserPage;
use serde_json::{Map, Value};

use crate::{
    errors::ActionError,
    interpolate::{interpolate, stringify},
    types::DispatchScope,
};

/// Everything a primitive can see while executing one node.
pub struct ActionCtx<'a> {
    pub page: &'a dyn BrowserPage,
    pub variables: &'a Map<String, Value>,
    pub scope: &'a DispatchScope,
    pub node_id: &'a str,
    pub action: &'static str,
    warnings: Vec<String>,
}

impl<'a> ActionCtx<'a> {
    pub fn new(
        page: &'a dyn BrowserPage,
        variables: &'a Map<String, Value>,
        scope: &'a DispatchScope,
        node_id: &'a str,
        action: &'static str,
    ) -> Self {
        Self {
            page,
            variables,
            scope,
            node_id,
            action,
            warnings: Vec::new(),
        }
    }

    /// Interpolate `{{variables}}` into a configured string.
    pub fn text(&mut self, template: &str) -> String {
        let rendered = interpolate(template, self.variables);
        self.warnings.extend(rendered.warnings);
        rendered.value
    }

    /// Value of a `xVariable` override when it names a non-empty variable, else the interpolated
    /// literal.
    pub fn resolve(&mut self, literal: Option<&str>, variable: Option<&str>) -> Option<String> {
        if let Some(name) = variable.map(str::trim).filter(|n| !n.is_empty()) {
            if let Some(value) = self.variables.get(name).filter(|v| !v.is_null()) {
                let rendered = stringify(value);
                if !rendered.is_empty() {
                    return Some(rendered);
                }
            }
        }
        literal.map(|raw| self.text(raw))
    }

    /// Like [`resolve`](Self::resolve) but the value must end up non-empty.
    pub fn require(
        &mut self,
        field: &str,
        literal: Option<&str>,
        variable: Option<&str>,
    ) -> Result<String, ActionError> {
        self.resolve(literal, variable)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ActionError::missing(self.action, field))
    }

    pub fn selector(&mut self, selector: Option<&str>) -> Result<String, ActionError> {
        self.require("selector", selector, None)
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}

pub(crate) fn millis(value: Option<u64>, default_ms: u64) -> Duration {
    Duration::from_millis(value.unwrap_or(default_ms))
}

/// Name a node writes to: configured name when non-blank, else the action's default.
pub(crate) fn variable_name(configured: Option<&str>, default: &str) -> String {
    configured
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(default)
        .to_string()
}
