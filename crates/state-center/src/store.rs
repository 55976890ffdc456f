use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::warn;

use crate::record::ExecutionRecord;

/// Persistence collaborator for execution snapshots. Callers treat it as best-effort.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn save(&self, record: &ExecutionRecord) -> Result<()>;
    async fn load(&self, execution_id: &str) -> Result<Option<ExecutionRecord>>;
    async fn list(&self) -> Result<Vec<ExecutionRecord>>;
}

#[derive(Default)]
pub struct InMemoryExecutionStore {
    records: DashMap<String, ExecutionRecord>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn save(&self, record: &ExecutionRecord) -> Result<()> {
        self.records
            .insert(record.execution_id.0.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        Ok(self.records.get(execution_id).map(|r| r.value().clone()))
    }

    async fn list(&self) -> Result<Vec<ExecutionRecord>> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

/// Filesystem-backed store writing `<root>/executions/<id>.json`.
pub struct FsExecutionStore {
    root: PathBuf,
}

impl FsExecutionStore {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            root: base_dir.into(),
        }
    }

    fn executions_dir(&self) -> PathBuf {
        self.root.join("executions")
    }

    fn execution_path(&self, execution_id: &str) -> PathBuf {
        self.executions_dir().join(format!("{}.json", execution_id))
    }

    async fn load_path(path: &PathBuf) -> Result<ExecutionRecord> {
        let mut file = fs::File::open(path)
            .await
            .with_context(|| format!("opening execution {}", path.display()))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        let record = serde_json::from_slice(&buf)
            .with_context(|| format!("parsing execution {}", path.display()))?;
        Ok(record)
    }

    /// Remove finished executions completed before `cutoff`.
    pub async fn prune_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0usize;
        for record in self.list().await? {
            let expired = record.status.is_terminal()
                && record.completed_at.map(|at| at < cutoff).unwrap_or(false);
            if !expired {
                continue;
            }
            let path = self.execution_path(&record.execution_id.0);
            match fs::remove_file(&path).await {
                Ok(_) => removed += 1,
                Err(err) => warn!(
                    ?err,
                    path = %path.display(),
                    "failed to remove expired execution file"
                ),
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl ExecutionStore for FsExecutionStore {
    async fn save(&self, record: &ExecutionRecord) -> Result<()> {
        let dir = self.executions_dir();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating execution directory {}", dir.display()))?;
        let path = self.execution_path(&record.execution_id.0);
        let payload = serde_json::to_vec_pretty(record)?;
        fs::write(&path, payload)
            .await
            .with_context(|| format!("writing execution to {}", path.display()))?;
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        let path = self.execution_path(execution_id);
        if fs::metadata(&path).await.is_err() {
            return Ok(None);
        }
        Self::load_path(&path).await.map(Some)
    }

    async fn list(&self) -> Result<Vec<ExecutionRecord>> {
        let dir = self.executions_dir();
        if fs::metadata(&dir).await.is_err() {
            return Ok(Vec::new());
        }
        let mut entries = fs::read_dir(&dir)
            .await
            .with_context(|| format!("reading execution directory {}", dir.display()))?;
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match Self::load_path(&path).await {
                Ok(record) => records.push(record),
                Err(err) => warn!(?err, path = %path.display(), "failed to read execution file"),
            }
        }
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}
