//! Browser session provider for FlowPilot.
//!
//! Exposes the [`BrowserPage`] primitives the node dispatcher drives, a Chromium implementation
//! backed by chromiumoxide, and a scripted in-memory stub used for dry runs and tests.

use std::{env, sync::Arc};

use tracing::{info, warn};

pub mod chromium;
pub mod config;
mod detect;
pub mod error;
pub mod metrics;
pub mod page;
pub mod scripts;
pub mod stub;

pub use chromium::{ChromiumPage, ChromiumSessionProvider};
pub use config::{BrowserSettings, LaunchConfig, Viewport};
pub use error::{AdapterError, AdapterErrorKind};
pub use page::{
    BrowserPage, CookieSpec, DialogInfo, DialogResponse, ElementState, ScreenshotOptions,
    ScrollTarget, SessionProvider, TypeOptions, WaitUntil,
};
pub use stub::{StubDocument, StubElement, StubPage, StubScript, StubSessionProvider};
pub use scripts::FrameOperation;

pub(crate) use detect::detect_chrome_executable;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdapterMode {
    Real,
    Stub,
}

impl AdapterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterMode::Real => "real",
            AdapterMode::Stub => "stub",
        }
    }

    pub fn is_stub(&self) -> bool {
        matches!(self, AdapterMode::Stub)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ChromeMode {
    Auto,
    ForceReal,
    ForceStub,
}

fn chrome_mode() -> ChromeMode {
    match env::var("FLOWPILOT_USE_REAL_CHROME")
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "1" | "true" | "yes" | "on" => ChromeMode::ForceReal,
        "0" | "false" | "no" | "off" => ChromeMode::ForceStub,
        _ => ChromeMode::Auto,
    }
}

/// Pick the session provider for this process.
///
/// `FLOWPILOT_USE_REAL_CHROME=1` forces Chromium, `0` forces the stub; otherwise Chromium is used
/// whenever an executable can be found.
pub fn select_provider(launch: LaunchConfig) -> (Arc<dyn SessionProvider>, AdapterMode) {
    let mode = chrome_mode();
    let detected = !launch.executable.as_os_str().is_empty() && launch.executable.exists()
        || detect_chrome_executable().is_some();
    let use_real = match mode {
        ChromeMode::ForceReal => true,
        ChromeMode::ForceStub => false,
        ChromeMode::Auto => detected,
    };

    if use_real {
        if !detected {
            warn!(
                target: "cdp-adapter",
                "FLOWPILOT_USE_REAL_CHROME is set but no Chrome executable was found; launches will fail"
            );
        }
        info!(target: "cdp-adapter", "using real Chromium session provider");
        (
            Arc::new(ChromiumSessionProvider::new(launch)),
            AdapterMode::Real,
        )
    } else {
        let reason = if mode == ChromeMode::ForceStub {
            "forced_stub_mode"
        } else {
            "chrome_not_found"
        };
        warn!(
            target: "cdp-adapter",
            event = "cdp_adapter.stub_mode",
            mode = %AdapterMode::Stub.as_str(),
            reason,
            remediation = "Install Chrome/Chromium and set FLOWPILOT_USE_REAL_CHROME=1 with FLOWPILOT_CHROME=/path/to/chrome",
            "session provider initialized without a real browser; pages are in-memory stubs"
        );
        (
            Arc::new(StubSessionProvider::default()),
            AdapterMode::Stub,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_mode_reports_stub() {
        assert!(AdapterMode::Stub.is_stub());
        assert_eq!(AdapterMode::Real.as_str(), "real");
    }
}
