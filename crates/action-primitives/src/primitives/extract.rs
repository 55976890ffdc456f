//! Extraction primitives - read text, markup, attributes, links and pixels off the page

use std::collections::HashSet;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use cdp_adapter::{FrameOperation, ScreenshotOptions};
use serde_json::{json, Value};
use tokio::fs;
use tracing::{debug, info};

use super::{navigate::absolutize, variable_name, ActionCtx};
use crate::{
    errors::ActionError,
    node::{
        ExtractAttributeConfig, ExtractConfig, ExtractUrlsConfig, IframeConfig, IframeOperation,
        ScreenshotConfig,
    },
    types::NodeResult,
};

fn pick(values: Vec<Value>, multiple: bool, selector: &str) -> Result<Value, ActionError> {
    if values.is_empty() {
        return Err(ActionError::ElementNotFound(selector.to_string()));
    }
    if multiple {
        Ok(Value::Array(values))
    } else {
        Ok(values.into_iter().next().unwrap_or(Value::Null))
    }
}

/// Execute extractText primitive
///
/// Stores the first match's text, or every match's text with `multiple`.
pub async fn execute_extract_text(
    ctx: &mut ActionCtx<'_>,
    config: &ExtractConfig,
) -> Result<NodeResult, ActionError> {
    let selector = ctx.selector(config.selector.as_deref())?;
    let texts = ctx.page.query_text(&selector).await?;
    let value = pick(
        texts.into_iter().map(Value::String).collect(),
        config.multiple.unwrap_or(false),
        &selector,
    )?;
    let name = variable_name(config.variable.as_deref(), "extractedText");
    debug!(node_id = ctx.node_id, selector = %selector, variable = %name, "Extracted text");
    Ok(NodeResult::ok().with_variable(name, value))
}

pub async fn execute_extract_html(
    ctx: &mut ActionCtx<'_>,
    config: &ExtractConfig,
) -> Result<NodeResult, ActionError> {
    let selector = ctx.selector(config.selector.as_deref())?;
    let html = ctx
        .page
        .query_html(&selector, config.outer.unwrap_or(false))
        .await?;
    let value = pick(
        html.into_iter().map(Value::String).collect(),
        config.multiple.unwrap_or(false),
        &selector,
    )?;
    Ok(NodeResult::ok().with_variable(variable_name(config.variable.as_deref(), "extractedHtml"), value))
}

/// Execute extractAttribute primitive
///
/// Matched elements without the attribute contribute `null`.
pub async fn execute_extract_attribute(
    ctx: &mut ActionCtx<'_>,
    config: &ExtractAttributeConfig,
) -> Result<NodeResult, ActionError> {
    let selector = ctx.selector(config.selector.as_deref())?;
    let attribute = ctx.text(&config.attribute);
    if attribute.trim().is_empty() {
        return Err(ActionError::missing(ctx.action, "attribute"));
    }
    let values = ctx.page.query_attribute(&selector, &attribute).await?;
    let value = pick(
        values
            .into_iter()
            .map(|v| v.map(Value::String).unwrap_or(Value::Null))
            .collect(),
        config.multiple.unwrap_or(false),
        &selector,
    )?;
    Ok(NodeResult::ok().with_variable(
        variable_name(config.variable.as_deref(), "extractedAttribute"),
        value,
    ))
}

/// Execute screenshot primitive
///
/// Steps:
/// 1. Capture the page, full page or a single element
/// 2. Write to `path` when configured (value is the path), else keep a base64 PNG as the value
pub async fn execute_screenshot(
    ctx: &mut ActionCtx<'_>,
    config: &ScreenshotConfig,
) -> Result<NodeResult, ActionError> {
    // 1. Capture
    let selector = match config.selector.as_deref() {
        Some(raw) if !raw.trim().is_empty() => Some(ctx.text(raw)),
        _ => None,
    };
    let bytes = ctx
        .page
        .screenshot(ScreenshotOptions {
            full_page: config.full_page.unwrap_or(false),
            selector,
        })
        .await?;

    // 2. Store
    let name = variable_name(config.variable.as_deref(), "screenshot");
    let value = match config.path.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(raw) => {
            let path = ctx.text(raw);
            if let Some(parent) = Path::new(&path).parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&path, &bytes).await?;
            info!(node_id = ctx.node_id, path = %path, bytes = bytes.len(), "Screenshot saved");
            Value::String(path)
        }
        None => Value::String(STANDARD.encode(&bytes)),
    };
    Ok(NodeResult::ok().with_variable(name, value))
}

/// Execute extractUrls primitive
///
/// Collects `href` from anchors under the container, in document order.
pub async fn execute_extract_urls(
    ctx: &mut ActionCtx<'_>,
    config: &ExtractUrlsConfig,
) -> Result<NodeResult, ActionError> {
    let container = match config.selector.as_deref() {
        Some(raw) if !raw.trim().is_empty() => ctx.text(raw),
        _ => "body".to_string(),
    };
    let base = config
        .base_url
        .as_deref()
        .filter(|b| !b.trim().is_empty())
        .map(|raw| ctx.text(raw));
    let hrefs = ctx
        .page
        .query_attribute(&format!("{} a", container.trim()), "href")
        .await?;

    let urls = collect_urls(
        hrefs.into_iter().flatten(),
        base.as_deref(),
        config.remove_duplicates.unwrap_or(true),
        config.exclude_empty.unwrap_or(true),
    );
    info!(node_id = ctx.node_id, container = %container, count = urls.len(), "Extracted urls");
    Ok(NodeResult::ok().with_variable(
        variable_name(config.variable.as_deref(), "extractedUrls"),
        Value::Array(urls.into_iter().map(Value::String).collect()),
    ))
}

pub fn collect_urls<I>(hrefs: I, base: Option<&str>, dedupe: bool, exclude_empty: bool) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for href in hrefs {
        let href = href.trim().to_string();
        if exclude_empty && (href.is_empty() || href == "#") {
            continue;
        }
        let url = match base {
            Some(base) => absolutize(&href, Some(base)).unwrap_or(href),
            None => href,
        };
        if dedupe && !seen.insert(url.clone()) {
            continue;
        }
        urls.push(url);
    }
    urls
}

/// Execute iframe primitive
///
/// Works on same-origin frames only; a missing frame or inner element fails the node.
pub async fn execute_iframe(
    ctx: &mut ActionCtx<'_>,
    config: &IframeConfig,
) -> Result<NodeResult, ActionError> {
    let frame = ctx.selector(config.selector.as_deref())?;
    let inner = ctx.require("innerSelector", config.inner_selector.as_deref(), None)?;
    let operation = match config.operation {
        IframeOperation::ExtractText => FrameOperation::ExtractText,
        IframeOperation::ExtractHtml => FrameOperation::ExtractHtml,
        IframeOperation::Click => FrameOperation::Click,
    };
    let script = cdp_adapter::scripts::frame_operation(&frame, &inner, operation);
    let value = ctx.page.evaluate(&script).await?;
    if value.is_null() {
        return Err(ActionError::ElementNotFound(format!("{} >> {}", frame, inner)));
    }
    let mut result = NodeResult::ok().with_data(json!({ "frame": frame, "selector": inner }));
    if config.operation != IframeOperation::Click {
        let default = if config.operation == IframeOperation::ExtractHtml {
            "extractedHtml"
        } else {
            "extractedText"
        };
        result = result.with_variable(variable_name(config.variable.as_deref(), default), value);
    }
    Ok(result)
}
