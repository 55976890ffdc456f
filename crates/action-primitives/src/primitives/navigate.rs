//! Navigate primitive - load a URL into the execution's page

use std::time::Instant;

use serde_json::json;
use tracing::{info, warn};
use url::Url;

use super::{millis, ActionCtx};
use crate::{errors::ActionError, node::NavigateConfig, types::NodeResult};

const DEFAULT_NAV_TIMEOUT_MS: u64 = 30_000;

/// Execute navigate primitive
///
/// Steps:
/// 1. Resolve the target from `urlVariable` or the interpolated `url`
/// 2. Resolve relative targets against the page's current URL
/// 3. Navigate and wait for the configured lifecycle milestone
pub async fn execute_navigate(
    ctx: &mut ActionCtx<'_>,
    config: &NavigateConfig,
) -> Result<NodeResult, ActionError> {
    let started = Instant::now();

    // 1. Resolve target
    let raw = ctx.require("url", config.url.as_deref(), config.url_variable.as_deref())?;

    // 2. Absolute URL
    let current = ctx.page.current_url().await?;
    let target = match absolutize(raw.trim(), current.as_deref()) {
        Some(url) => url,
        None => {
            warn!(node_id = ctx.node_id, url = %raw, "navigating to a relative URL without a base");
            ctx.warn(format!("'{}' is not an absolute URL and the page has no URL yet", raw));
            raw.trim().to_string()
        }
    };

    info!(
        execution_id = %ctx.scope.execution_id,
        node_id = ctx.node_id,
        url = %target,
        "Executing navigate primitive"
    );

    // 3. Navigate
    let wait_until = config.wait_until.unwrap_or_default();
    ctx.page
        .goto(&target, wait_until, millis(config.timeout, DEFAULT_NAV_TIMEOUT_MS))
        .await?;

    info!(
        node_id = ctx.node_id,
        latency_ms = started.elapsed().as_millis() as u64,
        "Navigate completed successfully"
    );
    Ok(NodeResult::ok().with_data(json!({ "url": target })))
}

/// Turn `raw` into an absolute URL, joining onto `base` when it is relative.
pub fn absolutize(raw: &str, base: Option<&str>) -> Option<String> {
    if let Ok(url) = Url::parse(raw) {
        return Some(url.to_string());
    }
    let base = Url::parse(base?).ok()?;
    base.join(raw).ok().map(|url| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_urls_join_the_current_page() {
        assert_eq!(
            absolutize("/b?q=1", Some("https://site.test/a/page")).as_deref(),
            Some("https://site.test/b?q=1")
        );
        assert_eq!(
            absolutize("next", Some("https://site.test/a/page")).as_deref(),
            Some("https://site.test/a/next")
        );
    }

    #[test]
    fn absolute_urls_pass_through() {
        assert_eq!(
            absolutize("https://other.test/", Some("https://site.test/")).as_deref(),
            Some("https://other.test/")
        );
        assert_eq!(absolutize("/relative", None), None);
    }
}
