//! File primitives - downloads and uploads

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tokio::fs;
use tracing::info;

use super::{millis, ActionCtx};
use crate::{
    errors::ActionError,
    interpolate::stringify,
    node::{DownloadConfig, UploadFileConfig},
    types::NodeResult,
};

const DEFAULT_DOWNLOAD_DIR: &str = "./downloads";
const DEFAULT_DOWNLOAD_WAIT_MS: u64 = 3_000;
const TRIGGER_TIMEOUT_MS: u64 = 5_000;

/// Execute download primitive
///
/// Steps:
/// 1. Create the download directory and point the browser at it
/// 2. Click the trigger element when one is configured
/// 3. Give the download `waitTime` to land, then store the directory path
pub async fn execute_download(
    ctx: &mut ActionCtx<'_>,
    config: &DownloadConfig,
) -> Result<NodeResult, ActionError> {
    // 1. Directory
    let dir = match config.download_path.as_deref() {
        Some(raw) if !raw.trim().is_empty() => ctx.text(raw),
        _ => DEFAULT_DOWNLOAD_DIR.to_string(),
    };
    fs::create_dir_all(&dir).await?;
    let dir_path = fs::canonicalize(&dir)
        .await
        .unwrap_or_else(|_| PathBuf::from(&dir));
    ctx.page.set_download_dir(&dir_path).await?;

    // 2. Trigger
    if let Some(raw) = config.selector.as_deref().filter(|s| !s.trim().is_empty()) {
        let selector = ctx.text(raw);
        ctx.page
            .click(&selector, millis(None, TRIGGER_TIMEOUT_MS))
            .await?;
    }

    // 3. Settle
    let wait = millis(config.wait_time, DEFAULT_DOWNLOAD_WAIT_MS);
    tokio::select! {
        _ = tokio::time::sleep(wait) => {}
        _ = ctx.scope.cancel_token.cancelled() => {}
    }

    let stored = Value::String(dir_path.display().to_string());
    info!(node_id = ctx.node_id, dir = %dir_path.display(), "Download directory ready");
    let mut result = NodeResult::ok().with_data(json!({ "downloadPath": stored }));
    if let Some(name) = config.variable.as_deref().filter(|n| !n.trim().is_empty()) {
        result = result.with_variable(name.trim(), stored);
    }
    Ok(result)
}

/// Execute uploadFile primitive
///
/// Files come from `filePathVariable` (string or list), else `filePaths`, else `filePath`.
pub async fn execute_upload_file(
    ctx: &mut ActionCtx<'_>,
    config: &UploadFileConfig,
) -> Result<NodeResult, ActionError> {
    let selector = ctx.selector(config.selector.as_deref())?;

    let mut files: Vec<String> = Vec::new();
    if let Some(name) = config
        .file_path_variable
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
    {
        match ctx.variables.get(name) {
            Some(Value::Array(items)) => files.extend(items.iter().map(stringify)),
            Some(Value::Null) | None => {}
            Some(other) => files.push(stringify(other)),
        }
    }
    if files.is_empty() {
        files.extend(config.file_paths.iter().map(|p| ctx.text(p)));
    }
    if files.is_empty() {
        if let Some(raw) = config.file_path.as_deref() {
            files.push(ctx.text(raw));
        }
    }
    files.retain(|f| !f.trim().is_empty());
    if files.is_empty() {
        return Err(ActionError::missing(ctx.action, "filePath"));
    }

    let mut paths = Vec::with_capacity(files.len());
    for file in &files {
        let path = Path::new(file.trim());
        if fs::metadata(path).await.is_err() {
            return Err(ActionError::Io(format!("file not found: {}", path.display())));
        }
        paths.push(path.to_path_buf());
    }
    ctx.page.upload_files(&selector, &paths).await?;
    Ok(NodeResult::ok().with_data(json!({ "files": files })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DispatchScope;
    use cdp_adapter::{StubDocument, StubElement, StubPage, StubScript};
    use serde_json::Map;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn upload_prefers_variable_list() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();

        let page = StubPage::new(
            StubScript::new(StubDocument::new().with_element("#file", StubElement::new())),
            Default::default(),
        );
        let vars: Map<String, Value> = json!({
            "files": [a.display().to_string(), b.display().to_string()]
        })
        .as_object()
        .cloned()
        .unwrap();
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "n", "uploadFile");
        execute_upload_file(
            &mut ctx,
            &UploadFileConfig {
                selector: Some("#file".into()),
                file_path: Some("/ignored".into()),
                file_path_variable: Some("files".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(page.calls_to("upload").len(), 1);
    }

    #[tokio::test]
    async fn upload_rejects_missing_files() {
        let page = StubPage::new(StubScript::default(), Default::default());
        let vars = Map::new();
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "n", "uploadFile");
        let err = execute_upload_file(
            &mut ctx,
            &UploadFileConfig {
                selector: Some("#file".into()),
                file_path: Some("/definitely/not/here.txt".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ActionError::Io(_)));
    }

    #[tokio::test]
    async fn download_stores_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("dl");
        let page = StubPage::new(StubScript::default(), Default::default());
        let vars = Map::new();
        let scope = DispatchScope::new("e", "f", CancellationToken::new());
        let mut ctx = ActionCtx::new(&page, &vars, &scope, "n", "download");
        let result = execute_download(
            &mut ctx,
            &DownloadConfig {
                download_path: Some(target.display().to_string()),
                wait_time: Some(0),
                variable: Some("saved".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(target.is_dir());
        assert_eq!(result.variable.unwrap().name, "saved");
        assert_eq!(page.calls_to("download_dir").len(), 1);
    }
}
