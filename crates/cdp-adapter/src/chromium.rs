//! Real browser pages driven through chromiumoxide. Each page owns its own browser process so
//! executions never share cookies, storage or dialogs.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCookiesParams, CookieParam, SetUserAgentOverrideParams, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, EventJavascriptDialogOpening,
    HandleJavaScriptDialogParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport as CdpViewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::{BrowserSettings, LaunchConfig};
use crate::error::{looks_like_closed_target, AdapterError, AdapterErrorKind};
use crate::metrics;
use crate::page::{
    BrowserPage, CookieSpec, DialogInfo, DialogResponse, ElementState, ScreenshotOptions,
    ScrollTarget, SessionProvider, TypeOptions, WaitUntil,
};
use crate::scripts;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn map_cdp(err: CdpError) -> AdapterError {
    let message = err.to_string();
    if looks_like_closed_target(&message) {
        return AdapterError::target_closed(message);
    }
    match err {
        CdpError::Timeout => AdapterError::new(AdapterErrorKind::NavTimeout)
            .with_hint(message)
            .retriable(true),
        _ => AdapterError::new(AdapterErrorKind::CdpIo).with_hint(message),
    }
}

fn internal(hint: impl Into<String>) -> AdapterError {
    AdapterError::new(AdapterErrorKind::Internal).with_hint(hint)
}

async fn timed<T, F>(method: &'static str, fut: F) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    let started = Instant::now();
    let result = fut.await;
    metrics::record_command(method, started.elapsed(), result.is_ok());
    if let Err(err) = &result {
        debug!(target: "cdp-adapter", method, %err, "browser command failed");
    }
    result
}

#[derive(Debug, Deserialize)]
struct ElementProbe {
    attached: bool,
    visible: bool,
}

/// Launches one Chromium instance per created page.
pub struct ChromiumSessionProvider {
    launch: LaunchConfig,
}

impl ChromiumSessionProvider {
    pub fn new(launch: LaunchConfig) -> Self {
        Self { launch }
    }

    fn browser_config(
        &self,
        settings: &BrowserSettings,
        profile_dir: &Path,
    ) -> Result<BrowserConfig, AdapterError> {
        let executable = self.launch.executable_for(settings).ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint("chrome executable not found")
                .with_data(json!({
                    "hint": "Set FLOWPILOT_CHROME to the full path of chrome/chromium."
                }))
        })?;

        let viewport = CdpViewport {
            width: settings.viewport.width,
            height: settings.viewport.height,
            ..CdpViewport::default()
        };

        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_millis(self.launch.request_timeout_ms))
            .launch_timeout(Duration::from_millis(self.launch.launch_timeout_ms))
            .window_size(settings.viewport.width, settings.viewport.height)
            .viewport(viewport)
            .chrome_executable(executable)
            .user_data_dir(profile_dir);

        if !settings.headless {
            builder = builder.with_head();
        }
        if self.launch.no_sandbox {
            builder = builder.no_sandbox();
        }

        let mut args = vec![
            "--disable-background-networking",
            "--disable-breakpad",
            "--disable-default-apps",
            "--disable-dev-shm-usage",
            "--disable-popup-blocking",
            "--disable-sync",
            "--no-first-run",
            "--no-default-browser-check",
            "--password-store=basic",
            "--use-mock-keychain",
        ];
        if settings.headless {
            args.push("--headless=new");
            args.push("--hide-scrollbars");
            args.push("--mute-audio");
        }
        if settings.stealth {
            args.push("--disable-blink-features=AutomationControlled");
        }
        builder = builder.args(args);

        builder
            .build()
            .map_err(|err| internal(format!("browser config error: {err}")))
    }
}

#[async_trait]
impl SessionProvider for ChromiumSessionProvider {
    async fn create_page(
        &self,
        settings: &BrowserSettings,
    ) -> Result<Arc<dyn BrowserPage>, AdapterError> {
        let profile_dir = self
            .launch
            .profile_root
            .join(format!("profile-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&profile_dir)
            .map_err(|err| internal(format!("failed to create profile dir: {err}")))?;

        let launched = match self.browser_config(settings, &profile_dir) {
            Ok(config) => Browser::launch(config).await.map_err(map_cdp),
            Err(err) => Err(err),
        };
        let (browser, mut handler) = match launched {
            Ok(launched) => launched,
            Err(err) => {
                teardown(None, None, &profile_dir).await;
                return Err(err);
            }
        };
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(target: "cdp-adapter", %err, "browser handler event error");
                }
            }
        });

        let (page, dialogs) = match prepare_page(&browser, settings).await {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!(target: "cdp-adapter", %err, "page setup failed; tearing down browser");
                teardown(Some(browser), Some(handler_task), &profile_dir).await;
                return Err(err);
            }
        };
        metrics::record_page_opened();
        info!(
            target: "cdp-adapter",
            headless = settings.headless,
            stealth = settings.stealth,
            profile = %profile_dir.display(),
            "chromium page ready"
        );

        Ok(Arc::new(ChromiumPage {
            page,
            browser: Mutex::new(Some(browser)),
            handler_task: parking_lot::Mutex::new(Some(handler_task)),
            dialogs: Mutex::new(dialogs),
            profile_dir,
            closed: AtomicBool::new(false),
        }))
    }

    fn name(&self) -> &'static str {
        "chromium"
    }
}

/// Open the working tab and apply per-flow overrides.
async fn prepare_page(
    browser: &Browser,
    settings: &BrowserSettings,
) -> Result<(Page, mpsc::UnboundedReceiver<DialogInfo>), AdapterError> {
    let page = browser.new_page("about:blank").await.map_err(map_cdp)?;
    if settings.stealth {
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            scripts::STEALTH_INIT,
        ))
        .await
        .map_err(map_cdp)?;
    }
    if let Some(user_agent) = settings.user_agent.as_deref() {
        page.execute(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map_err(map_cdp)?;
    }
    let dialogs = spawn_dialog_listener(&page).await?;
    Ok((page, dialogs))
}

/// Shut down the browser process, stop its handler and delete the throwaway profile.
async fn teardown(
    browser: Option<Browser>,
    handler_task: Option<JoinHandle<()>>,
    profile_dir: &Path,
) {
    if let Some(mut browser) = browser {
        if let Err(err) = browser.close().await {
            warn!(target: "cdp-adapter", %err, "browser close failed");
        }
        let _ = browser.wait().await;
    }
    if let Some(task) = handler_task {
        task.abort();
    }
    if let Err(err) = std::fs::remove_dir_all(profile_dir) {
        debug!(target: "cdp-adapter", %err, "profile cleanup skipped");
    }
}

async fn spawn_dialog_listener(
    page: &Page,
) -> Result<mpsc::UnboundedReceiver<DialogInfo>, AdapterError> {
    let mut events = page
        .event_listener::<EventJavascriptDialogOpening>()
        .await
        .map_err(map_cdp)?;
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let info = DialogInfo {
                kind: format!("{:?}", event.r#type).to_ascii_lowercase(),
                message: event.message.clone(),
                default_prompt: event.default_prompt.clone(),
            };
            if tx.send(info).is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

pub struct ChromiumPage {
    page: Page,
    browser: Mutex<Option<Browser>>,
    handler_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    dialogs: Mutex<mpsc::UnboundedReceiver<DialogInfo>>,
    profile_dir: PathBuf,
    closed: AtomicBool,
}

impl ChromiumPage {
    fn ensure_open(&self) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::target_closed("page already closed"));
        }
        Ok(())
    }

    async fn eval_value(&self, expression: &str) -> Result<Value, AdapterError> {
        self.ensure_open()?;
        let result = self.page.evaluate(expression).await.map_err(map_cdp)?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn eval_as<T: serde::de::DeserializeOwned>(
        &self,
        expression: &str,
    ) -> Result<T, AdapterError> {
        let value = self.eval_value(expression).await?;
        serde_json::from_value(value)
            .map_err(|err| internal(format!("unexpected script result: {err}")))
    }

    async fn require_element(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<chromiumoxide::Element, AdapterError> {
        if !self
            .wait_for_selector(selector, ElementState::Visible, timeout)
            .await?
        {
            return Err(AdapterError::not_found(selector));
        }
        self.page.find_element(selector).await.map_err(map_cdp)
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(
        &self,
        url: &str,
        wait_until: WaitUntil,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        self.ensure_open()?;
        timed("goto", async {
            let navigation = async {
                self.page.goto(url).await.map_err(map_cdp)?;
                if wait_until == WaitUntil::NetworkIdle {
                    self.page.wait_for_navigation().await.map_err(map_cdp)?;
                    sleep(Duration::from_millis(500)).await;
                }
                Ok::<(), AdapterError>(())
            };
            timeout(deadline, navigation).await.map_err(|_| {
                AdapterError::new(AdapterErrorKind::NavTimeout)
                    .with_hint(format!("navigation to {} exceeded {:?}", url, deadline))
                    .retriable(true)
            })?
        })
        .await
    }

    async fn current_url(&self) -> Result<Option<String>, AdapterError> {
        self.ensure_open()?;
        self.page.url().await.map_err(map_cdp)
    }

    async fn click(&self, selector: &str, deadline: Duration) -> Result<(), AdapterError> {
        timed("click", async {
            let element = self.require_element(selector, deadline).await?;
            element.scroll_into_view().await.map_err(map_cdp)?;
            element.click().await.map_err(map_cdp)?;
            Ok(())
        })
        .await
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        options: TypeOptions,
    ) -> Result<(), AdapterError> {
        timed("type", async {
            let element = self
                .require_element(selector, Duration::from_secs(5))
                .await?;
            element.click().await.map_err(map_cdp)?;
            if options.clear {
                self.eval_value(&scripts::clear_input(selector)).await?;
            }
            if options.delay.is_zero() {
                element.type_str(text).await.map_err(map_cdp)?;
            } else {
                let mut buf = [0u8; 4];
                for ch in text.chars() {
                    element
                        .type_str(ch.encode_utf8(&mut buf))
                        .await
                        .map_err(map_cdp)?;
                    sleep(options.delay).await;
                }
            }
            Ok(())
        })
        .await
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: ElementState,
        deadline: Duration,
    ) -> Result<bool, AdapterError> {
        let started = Instant::now();
        let script = scripts::element_state(selector);
        loop {
            let probe: ElementProbe = self.eval_as(&script).await?;
            if state.is_satisfied(probe.attached, probe.visible) {
                return Ok(true);
            }
            if started.elapsed() >= deadline {
                return Ok(false);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn scroll(&self, target: ScrollTarget) -> Result<(), AdapterError> {
        let found: bool = self.eval_as(&scripts::scroll(&target)).await?;
        match (found, &target) {
            (false, ScrollTarget::Element(selector)) => Err(AdapterError::not_found(selector)),
            _ => Ok(()),
        }
    }

    async fn query_text(&self, selector: &str) -> Result<Vec<String>, AdapterError> {
        timed("query_text", self.eval_as(&scripts::query_text(selector))).await
    }

    async fn query_html(&self, selector: &str, outer: bool) -> Result<Vec<String>, AdapterError> {
        timed("query_html", self.eval_as(&scripts::query_html(selector, outer))).await
    }

    async fn query_attribute(
        &self,
        selector: &str,
        attribute: &str,
    ) -> Result<Vec<Option<String>>, AdapterError> {
        timed(
            "query_attribute",
            self.eval_as(&scripts::query_attribute(selector, attribute)),
        )
        .await
    }

    async fn screenshot(&self, options: ScreenshotOptions) -> Result<Vec<u8>, AdapterError> {
        self.ensure_open()?;
        timed("screenshot", async {
            match options.selector.as_deref() {
                Some(selector) => {
                    let element = self
                        .require_element(selector, Duration::from_secs(5))
                        .await?;
                    element
                        .screenshot(CaptureScreenshotFormat::Png)
                        .await
                        .map_err(map_cdp)
                }
                None => self
                    .page
                    .screenshot(
                        ScreenshotParams::builder()
                            .format(CaptureScreenshotFormat::Png)
                            .full_page(options.full_page)
                            .build(),
                    )
                    .await
                    .map_err(map_cdp),
            }
        })
        .await
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, AdapterError> {
        timed("evaluate", self.eval_value(expression)).await
    }

    async fn hover(&self, selector: &str, deadline: Duration) -> Result<(), AdapterError> {
        timed("hover", async {
            let element = self.require_element(selector, deadline).await?;
            element.hover().await.map_err(map_cdp)?;
            Ok(())
        })
        .await
    }

    async fn select_option(
        &self,
        selector: &str,
        value: &str,
    ) -> Result<Vec<String>, AdapterError> {
        let selected: Option<Vec<String>> =
            self.eval_as(&scripts::select_option(selector, value)).await?;
        let selected = selected.ok_or_else(|| AdapterError::not_found(selector))?;
        if selected.is_empty() {
            return Err(AdapterError::new(AdapterErrorKind::OptionNotFound)
                .with_hint(format!("no option '{}' in '{}'", value, selector)));
        }
        Ok(selected)
    }

    async fn set_checked(&self, selector: &str, checked: bool) -> Result<(), AdapterError> {
        let found: bool = self
            .eval_as(&scripts::set_checked(selector, checked))
            .await?;
        if found {
            Ok(())
        } else {
            Err(AdapterError::not_found(selector))
        }
    }

    async fn press_key(&self, selector: Option<&str>, key: &str) -> Result<(), AdapterError> {
        self.ensure_open()?;
        if let Some(selector) = selector {
            let element = self
                .require_element(selector, Duration::from_secs(5))
                .await?;
            element.focus().await.map_err(map_cdp)?;
            element.press_key(key).await.map_err(map_cdp)?;
            return Ok(());
        }
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let params = DispatchKeyEventParams::builder()
                .r#type(kind)
                .key(key)
                .build()
                .map_err(internal)?;
            self.page.execute(params).await.map_err(map_cdp)?;
        }
        Ok(())
    }

    async fn set_download_dir(&self, dir: &Path) -> Result<(), AdapterError> {
        self.ensure_open()?;
        std::fs::create_dir_all(dir)
            .map_err(|err| internal(format!("failed to create download dir: {err}")))?;
        let absolute = dir
            .canonicalize()
            .map_err(|err| internal(format!("failed to resolve download dir: {err}")))?;
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(absolute.to_string_lossy().to_string())
            .build()
            .map_err(internal)?;
        self.page.execute(params).await.map_err(map_cdp)?;
        Ok(())
    }

    async fn upload_files(&self, selector: &str, files: &[PathBuf]) -> Result<(), AdapterError> {
        let element = self
            .require_element(selector, Duration::from_secs(5))
            .await?;
        let params = SetFileInputFilesParams::builder()
            .files(
                files
                    .iter()
                    .map(|path| path.to_string_lossy().to_string())
                    .collect::<Vec<_>>(),
            )
            .backend_node_id(element.backend_node_id)
            .build()
            .map_err(internal)?;
        self.page.execute(params).await.map_err(map_cdp)?;
        Ok(())
    }

    async fn clear_cookies(&self) -> Result<(), AdapterError> {
        self.ensure_open()?;
        self.page
            .execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(map_cdp)?;
        Ok(())
    }

    async fn set_cookies(&self, cookies: &[CookieSpec]) -> Result<(), AdapterError> {
        self.ensure_open()?;
        let current = self.current_url().await?;
        let mut params = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            let mut builder = CookieParam::builder()
                .name(cookie.name.clone())
                .value(cookie.value.clone());
            match (&cookie.url, &cookie.domain) {
                (Some(url), _) => builder = builder.url(url.clone()),
                (None, Some(domain)) => builder = builder.domain(domain.clone()),
                (None, None) => {
                    if let Some(url) = current.as_ref().filter(|u| u.starts_with("http")) {
                        builder = builder.url(url.clone());
                    }
                }
            }
            if let Some(path) = &cookie.path {
                builder = builder.path(path.clone());
            }
            if let Some(expires) = cookie.expires {
                builder = builder.expires(TimeSinceEpoch::new(expires));
            }
            if let Some(http_only) = cookie.http_only {
                builder = builder.http_only(http_only);
            }
            if let Some(secure) = cookie.secure {
                builder = builder.secure(secure);
            }
            params.push(builder.build().map_err(internal)?);
        }
        self.page.set_cookies(params).await.map_err(map_cdp)?;
        Ok(())
    }

    async fn wait_for_dialog(
        &self,
        response: DialogResponse,
        deadline: Duration,
    ) -> Result<Option<DialogInfo>, AdapterError> {
        self.ensure_open()?;
        let mut dialogs = self.dialogs.lock().await;
        let info = match timeout(deadline, dialogs.recv()).await {
            Ok(Some(info)) => info,
            Ok(None) => return Err(AdapterError::target_closed("dialog listener ended")),
            Err(_) => return Ok(None),
        };
        let params = match response {
            DialogResponse::Accept { prompt_text } => {
                let mut params = HandleJavaScriptDialogParams::new(true);
                params.prompt_text = prompt_text;
                params
            }
            DialogResponse::Dismiss => HandleJavaScriptDialogParams::new(false),
        };
        self.page.execute(params).await.map_err(map_cdp)?;
        Ok(Some(info))
    }

    async fn close(&self) -> Result<(), AdapterError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = self.page.clone().close().await {
            debug!(target: "cdp-adapter", %err, "page close failed; closing browser anyway");
        }
        let browser = self.browser.lock().await.take();
        let handler_task = self.handler_task.lock().take();
        teardown(browser, handler_task, &self.profile_dir).await;
        info!(target: "cdp-adapter", "chromium page closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
