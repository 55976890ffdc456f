//! In-memory pages used when no real browser is available and throughout the test suites.
//!
//! A [`StubDocument`] maps selectors to scripted elements; navigation swaps in the document
//! registered for the target URL. Every call is recorded so callers can assert on what a flow did.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::sleep;
use tracing::debug;

use crate::config::BrowserSettings;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::page::{
    BrowserPage, CookieSpec, DialogInfo, DialogResponse, ElementState, ScreenshotOptions,
    ScrollTarget, SessionProvider, TypeOptions, WaitUntil,
};

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

#[derive(Clone, Debug)]
pub struct StubElement {
    pub text: String,
    pub html: String,
    pub attributes: BTreeMap<String, String>,
    pub visible: bool,
    pub checked: bool,
    pub value: String,
    pub options: Vec<String>,
}

impl Default for StubElement {
    fn default() -> Self {
        Self {
            text: String::new(),
            html: String::new(),
            attributes: BTreeMap::new(),
            visible: true,
            checked: false,
            value: String::new(),
            options: Vec::new(),
        }
    }
}

impl StubElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            html: text.clone(),
            text,
            ..Self::default()
        }
    }

    pub fn link(href: impl Into<String>) -> Self {
        Self::new().attr("href", href)
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = html.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct StubDocument {
    elements: HashMap<String, Vec<StubElement>>,
    evaluations: HashMap<String, Value>,
}

impl StubDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an element matched by exactly `selector`.
    pub fn with_element(mut self, selector: impl Into<String>, element: StubElement) -> Self {
        self.elements.entry(selector.into()).or_default().push(element);
        self
    }

    pub fn with_evaluation(mut self, expression: impl Into<String>, result: Value) -> Self {
        self.evaluations.insert(expression.into(), result);
        self
    }

    fn matches(&self, selector: &str) -> &[StubElement] {
        self.elements
            .get(selector.trim())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Shared script for every page a [`StubSessionProvider`] creates.
#[derive(Clone, Debug, Default)]
pub struct StubScript {
    pub start: StubDocument,
    pub routes: HashMap<String, StubDocument>,
    pub dialogs: VecDeque<DialogInfo>,
    pub navigation_delay: Duration,
    pub failing_urls: Vec<String>,
}

impl StubScript {
    pub fn new(start: StubDocument) -> Self {
        Self {
            start,
            ..Self::default()
        }
    }

    pub fn route(mut self, url: impl Into<String>, document: StubDocument) -> Self {
        self.routes.insert(url.into(), document);
        self
    }

    pub fn dialog(mut self, kind: &str, message: &str) -> Self {
        self.dialogs.push_back(DialogInfo {
            kind: kind.to_string(),
            message: message.to_string(),
            default_prompt: None,
        });
        self
    }

    pub fn navigation_delay(mut self, delay: Duration) -> Self {
        self.navigation_delay = delay;
        self
    }

    pub fn failing_url(mut self, url: impl Into<String>) -> Self {
        self.failing_urls.push(url.into());
        self
    }
}

struct StubState {
    url: Option<String>,
    document: StubDocument,
    dialogs: VecDeque<DialogInfo>,
    cookies: Vec<CookieSpec>,
    download_dir: Option<PathBuf>,
    typed: HashMap<String, String>,
}

pub struct StubPage {
    script: StubScript,
    state: Mutex<StubState>,
    calls: Mutex<Vec<String>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    settings: BrowserSettings,
}

impl StubPage {
    pub fn new(script: StubScript, settings: BrowserSettings) -> Self {
        let state = StubState {
            url: None,
            document: script.start.clone(),
            dialogs: script.dialogs.clone(),
            cookies: Vec::new(),
            download_dir: None,
            typed: HashMap::new(),
        };
        Self {
            script,
            state: Mutex::new(state),
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            settings,
        }
    }

    /// Every recorded call, formatted as `"<method> <args>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<String> {
        let prefix = format!("{} ", method);
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(&prefix) || call.as_str() == method)
            .cloned()
            .collect()
    }

    /// Number of times `close` actually released the page.
    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn cookies(&self) -> Vec<CookieSpec> {
        self.state.lock().cookies.clone()
    }

    pub fn typed_value(&self, selector: &str) -> Option<String> {
        self.state.lock().typed.get(selector).cloned()
    }

    pub fn settings(&self) -> &BrowserSettings {
        &self.settings
    }

    fn record(&self, call: String) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::target_closed(
                "Target page, context or browser has been closed",
            ));
        }
        debug!(target: "cdp-adapter", %call, "stub page call");
        self.calls.lock().push(call);
        Ok(())
    }

    fn first(&self, selector: &str) -> Option<StubElement> {
        self.state.lock().document.matches(selector).first().cloned()
    }

    fn require(&self, selector: &str) -> Result<StubElement, AdapterError> {
        self.first(selector)
            .filter(|el| el.visible)
            .ok_or_else(|| AdapterError::not_found(selector))
    }
}

#[async_trait]
impl BrowserPage for StubPage {
    async fn goto(
        &self,
        url: &str,
        _wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<(), AdapterError> {
        self.record(format!("goto {}", url))?;
        if !self.script.navigation_delay.is_zero() {
            if self.script.navigation_delay > timeout {
                sleep(timeout).await;
                return Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                    .with_hint(format!("navigation to {} exceeded {:?}", url, timeout)));
            }
            sleep(self.script.navigation_delay).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::target_closed(
                "Navigation failed because page was closed",
            ));
        }
        if self.script.failing_urls.iter().any(|u| u == url) {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("net::ERR_NAME_NOT_RESOLVED at {}", url)));
        }
        let mut state = self.state.lock();
        state.url = Some(url.to_string());
        state.document = self
            .script
            .routes
            .get(url)
            .cloned()
            .unwrap_or_else(|| self.script.start.clone());
        Ok(())
    }

    async fn current_url(&self) -> Result<Option<String>, AdapterError> {
        Ok(self.state.lock().url.clone())
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<(), AdapterError> {
        self.record(format!("click {}", selector))?;
        self.require(selector).map(|_| ())
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        options: TypeOptions,
    ) -> Result<(), AdapterError> {
        self.record(format!("type {} {}", selector, text))?;
        self.require(selector)?;
        let mut state = self.state.lock();
        let entry = state.typed.entry(selector.to_string()).or_default();
        if options.clear {
            entry.clear();
        }
        entry.push_str(text);
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: ElementState,
        timeout: Duration,
    ) -> Result<bool, AdapterError> {
        self.record(format!("wait {} {}", selector, state.as_str()))?;
        let (attached, visible) = match self.first(selector) {
            Some(el) => (true, el.visible),
            None => (false, false),
        };
        if state.is_satisfied(attached, visible) {
            return Ok(true);
        }
        sleep(timeout.min(Duration::from_millis(50))).await;
        Ok(false)
    }

    async fn scroll(&self, target: ScrollTarget) -> Result<(), AdapterError> {
        self.record(format!("scroll {:?}", target))?;
        if let ScrollTarget::Element(selector) = &target {
            self.first(selector)
                .ok_or_else(|| AdapterError::not_found(selector))?;
        }
        Ok(())
    }

    async fn query_text(&self, selector: &str) -> Result<Vec<String>, AdapterError> {
        self.record(format!("text {}", selector))?;
        Ok(self
            .state
            .lock()
            .document
            .matches(selector)
            .iter()
            .map(|el| el.text.clone())
            .collect())
    }

    async fn query_html(&self, selector: &str, outer: bool) -> Result<Vec<String>, AdapterError> {
        self.record(format!("html {}", selector))?;
        Ok(self
            .state
            .lock()
            .document
            .matches(selector)
            .iter()
            .map(|el| {
                if outer {
                    format!("<div>{}</div>", el.html)
                } else {
                    el.html.clone()
                }
            })
            .collect())
    }

    async fn query_attribute(
        &self,
        selector: &str,
        attribute: &str,
    ) -> Result<Vec<Option<String>>, AdapterError> {
        self.record(format!("attribute {} {}", selector, attribute))?;
        Ok(self
            .state
            .lock()
            .document
            .matches(selector)
            .iter()
            .map(|el| el.attributes.get(attribute).cloned())
            .collect())
    }

    async fn screenshot(&self, options: ScreenshotOptions) -> Result<Vec<u8>, AdapterError> {
        self.record(format!("screenshot full_page={}", options.full_page))?;
        if let Some(selector) = options.selector.as_deref() {
            self.require(selector)?;
        }
        Ok(PNG_SIGNATURE.to_vec())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, AdapterError> {
        self.record(format!("evaluate {}", expression))?;
        Ok(self
            .state
            .lock()
            .document
            .evaluations
            .get(expression)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn hover(&self, selector: &str, _timeout: Duration) -> Result<(), AdapterError> {
        self.record(format!("hover {}", selector))?;
        self.require(selector).map(|_| ())
    }

    async fn select_option(
        &self,
        selector: &str,
        value: &str,
    ) -> Result<Vec<String>, AdapterError> {
        self.record(format!("select {} {}", selector, value))?;
        let element = self.require(selector)?;
        if element.options.iter().any(|opt| opt == value) {
            Ok(vec![value.to_string()])
        } else {
            Err(AdapterError::new(AdapterErrorKind::OptionNotFound)
                .with_hint(format!("no option '{}' in '{}'", value, selector)))
        }
    }

    async fn set_checked(&self, selector: &str, checked: bool) -> Result<(), AdapterError> {
        self.record(format!("check {} {}", selector, checked))?;
        self.first(selector)
            .map(|_| ())
            .ok_or_else(|| AdapterError::not_found(selector))
    }

    async fn press_key(&self, selector: Option<&str>, key: &str) -> Result<(), AdapterError> {
        self.record(format!("key {} {}", selector.unwrap_or("-"), key))?;
        if let Some(selector) = selector {
            self.require(selector)?;
        }
        Ok(())
    }

    async fn set_download_dir(&self, dir: &Path) -> Result<(), AdapterError> {
        self.record(format!("download_dir {}", dir.display()))?;
        self.state.lock().download_dir = Some(dir.to_path_buf());
        Ok(())
    }

    async fn upload_files(&self, selector: &str, files: &[PathBuf]) -> Result<(), AdapterError> {
        let names: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
        self.record(format!("upload {} {}", selector, names.join(",")))?;
        self.first(selector)
            .map(|_| ())
            .ok_or_else(|| AdapterError::not_found(selector))
    }

    async fn clear_cookies(&self) -> Result<(), AdapterError> {
        self.record("clear_cookies".to_string())?;
        self.state.lock().cookies.clear();
        Ok(())
    }

    async fn set_cookies(&self, cookies: &[CookieSpec]) -> Result<(), AdapterError> {
        self.record(format!("set_cookies {}", cookies.len()))?;
        self.state.lock().cookies.extend_from_slice(cookies);
        Ok(())
    }

    async fn wait_for_dialog(
        &self,
        response: DialogResponse,
        timeout: Duration,
    ) -> Result<Option<DialogInfo>, AdapterError> {
        self.record(format!("dialog {:?}", response))?;
        let next = self.state.lock().dialogs.pop_front();
        if next.is_none() {
            sleep(timeout.min(Duration::from_millis(50))).await;
        }
        Ok(next)
    }

    async fn close(&self) -> Result<(), AdapterError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Hands out [`StubPage`]s that all follow the same script.
pub struct StubSessionProvider {
    script: StubScript,
    pages: Mutex<Vec<Arc<StubPage>>>,
}

impl StubSessionProvider {
    pub fn new(script: StubScript) -> Self {
        Self {
            script,
            pages: Mutex::new(Vec::new()),
        }
    }

    pub fn pages(&self) -> Vec<Arc<StubPage>> {
        self.pages.lock().clone()
    }

    pub fn last_page(&self) -> Option<Arc<StubPage>> {
        self.pages.lock().last().cloned()
    }
}

impl Default for StubSessionProvider {
    fn default() -> Self {
        Self::new(StubScript::default())
    }
}

#[async_trait]
impl SessionProvider for StubSessionProvider {
    async fn create_page(
        &self,
        settings: &BrowserSettings,
    ) -> Result<Arc<dyn BrowserPage>, AdapterError> {
        let page = Arc::new(StubPage::new(self.script.clone(), settings.clone()));
        self.pages.lock().push(page.clone());
        Ok(page)
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
