//! Contract tests for the Chromium session provider. They need a local Chrome/Chromium and are
//! ignored by default.
//!
//! ```bash
//! export FLOWPILOT_CDP_CONTRACT=1
//! export FLOWPILOT_CHROME=/usr/bin/chromium
//! cargo test -p cdp-adapter --test chromium_contract -- --ignored --nocapture
//! ```

use std::env;
use std::time::Duration;

use cdp_adapter::{
    BrowserPage, BrowserSettings, ChromiumSessionProvider, ElementState, LaunchConfig,
    SessionProvider, TypeOptions, WaitUntil,
};

const FORM_PAGE: &str = "data:text/html,<html><body><h1 id='title'>Hello</h1>\
<input id='q'/><a class='link' href='https://example.test/a'>a</a>\
<a class='link' href='/b'>b</a></body></html>";

fn contract_enabled() -> bool {
    env::var("FLOWPILOT_CDP_CONTRACT")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn provider(profile: &tempfile::TempDir) -> ChromiumSessionProvider {
    let launch = LaunchConfig {
        profile_root: profile.path().to_path_buf(),
        ..LaunchConfig::default()
    };
    ChromiumSessionProvider::new(launch)
}

fn headless() -> BrowserSettings {
    BrowserSettings {
        headless: true,
        ..BrowserSettings::default()
    }
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium; set FLOWPILOT_CDP_CONTRACT=1"]
async fn contract_navigate_query_and_type() {
    if !contract_enabled() {
        eprintln!("skipping CDP contract test (FLOWPILOT_CDP_CONTRACT not enabled)");
        return;
    }
    let profile = tempfile::tempdir().expect("profile dir");
    let page = provider(&profile)
        .create_page(&headless())
        .await
        .expect("page");

    page.goto(FORM_PAGE, WaitUntil::Load, Duration::from_secs(10))
        .await
        .expect("navigate");
    assert!(page
        .wait_for_selector("#title", ElementState::Visible, Duration::from_secs(5))
        .await
        .expect("wait"));
    assert_eq!(page.query_text("#title").await.expect("text"), vec!["Hello"]);

    let hrefs = page
        .query_attribute("a.link", "href")
        .await
        .expect("attributes");
    assert_eq!(hrefs.len(), 2);

    page.type_text("#q", "flowpilot", TypeOptions::default())
        .await
        .expect("type");
    let value = page
        .evaluate("document.querySelector('#q').value")
        .await
        .expect("evaluate");
    assert_eq!(value, serde_json::json!("flowpilot"));

    page.close().await.expect("close");
    assert!(page.is_closed());
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium; set FLOWPILOT_CDP_CONTRACT=1"]
async fn contract_close_is_idempotent_and_poisons_the_page() {
    if !contract_enabled() {
        eprintln!("skipping CDP contract test (FLOWPILOT_CDP_CONTRACT not enabled)");
        return;
    }
    let profile = tempfile::tempdir().expect("profile dir");
    let page = provider(&profile)
        .create_page(&headless())
        .await
        .expect("page");

    page.close().await.expect("first close");
    page.close().await.expect("second close");
    let err = page
        .goto(FORM_PAGE, WaitUntil::Load, Duration::from_secs(5))
        .await
        .expect_err("closed page refuses navigation");
    assert!(err.is_target_closed());
}
