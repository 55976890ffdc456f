use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::BrowserSettings;
use crate::error::AdapterError;

/// Lifecycle milestone `goto` waits for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    #[default]
    Load,
    #[serde(alias = "domContentLoaded")]
    DomContentLoaded,
    #[serde(alias = "networkIdle", alias = "networkidle0", alias = "networkidle2")]
    NetworkIdle,
}

/// Element state polled by `wait_for_selector`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementState {
    #[default]
    Visible,
    Attached,
    Hidden,
    Detached,
}

impl ElementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementState::Visible => "visible",
            ElementState::Attached => "attached",
            ElementState::Hidden => "hidden",
            ElementState::Detached => "detached",
        }
    }

    /// Whether an element probe of `(attached, visible)` satisfies this state.
    pub fn is_satisfied(&self, attached: bool, visible: bool) -> bool {
        match self {
            ElementState::Visible => attached && visible,
            ElementState::Attached => attached,
            ElementState::Hidden => !attached || !visible,
            ElementState::Detached => !attached,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScrollTarget {
    Element(String),
    By { x: i64, y: i64 },
    Top,
    Bottom,
}

#[derive(Clone, Debug, Default)]
pub struct TypeOptions {
    pub clear: bool,
    pub delay: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct ScreenshotOptions {
    pub full_page: bool,
    pub selector: Option<String>,
}

/// Cookie accepted by `set_cookies`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
}

/// How a JavaScript dialog should be answered.
#[derive(Clone, Debug, PartialEq)]
pub enum DialogResponse {
    Accept { prompt_text: Option<String> },
    Dismiss,
}

/// Details of a dialog that was observed and answered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogInfo {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_prompt: Option<String>,
}

/// One browser page owned by a single execution.
///
/// Query methods report absence as empty results or `Ok(false)` rather than errors, so callers can
/// treat "not there" as an ordinary value.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration)
        -> Result<(), AdapterError>;
    async fn current_url(&self) -> Result<Option<String>, AdapterError>;
    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), AdapterError>;
    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        options: TypeOptions,
    ) -> Result<(), AdapterError>;
    /// Poll until `selector` reaches `state`. A timeout is `Ok(false)`.
    async fn wait_for_selector(
        &self,
        selector: &str,
        state: ElementState,
        timeout: Duration,
    ) -> Result<bool, AdapterError>;
    async fn scroll(&self, target: ScrollTarget) -> Result<(), AdapterError>;
    /// Visible text of every element matching `selector`.
    async fn query_text(&self, selector: &str) -> Result<Vec<String>, AdapterError>;
    async fn query_html(&self, selector: &str, outer: bool) -> Result<Vec<String>, AdapterError>;
    async fn query_attribute(
        &self,
        selector: &str,
        attribute: &str,
    ) -> Result<Vec<Option<String>>, AdapterError>;
    async fn screenshot(&self, options: ScreenshotOptions) -> Result<Vec<u8>, AdapterError>;
    async fn evaluate(&self, expression: &str) -> Result<Value, AdapterError>;
    async fn hover(&self, selector: &str, timeout: Duration) -> Result<(), AdapterError>;
    /// Select options by value or label; returns the values that ended up selected.
    async fn select_option(&self, selector: &str, value: &str)
        -> Result<Vec<String>, AdapterError>;
    async fn set_checked(&self, selector: &str, checked: bool) -> Result<(), AdapterError>;
    async fn press_key(&self, selector: Option<&str>, key: &str) -> Result<(), AdapterError>;
    async fn set_download_dir(&self, dir: &Path) -> Result<(), AdapterError>;
    async fn upload_files(&self, selector: &str, files: &[PathBuf]) -> Result<(), AdapterError>;
    async fn clear_cookies(&self) -> Result<(), AdapterError>;
    async fn set_cookies(&self, cookies: &[CookieSpec]) -> Result<(), AdapterError>;
    /// Wait up to `timeout` for the next JavaScript dialog and answer it.
    async fn wait_for_dialog(
        &self,
        response: DialogResponse,
        timeout: Duration,
    ) -> Result<Option<DialogInfo>, AdapterError>;
    /// Release the page and any browser it owns. Calling it again is a no-op.
    async fn close(&self) -> Result<(), AdapterError>;
    fn is_closed(&self) -> bool;
}

/// Creates execution-scoped pages.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn create_page(
        &self,
        settings: &BrowserSettings,
    ) -> Result<Arc<dyn BrowserPage>, AdapterError>;

    fn name(&self) -> &'static str;
}
