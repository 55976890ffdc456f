//! Process-wide cancellation registry
//!
//! One entry per live execution, keyed by execution id. A stop request cancels the run's token and
//! closes its page right away; the run's own cleanup path races with it safely because the page is
//! closed at most once per entry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cdp_adapter::BrowserPage;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct RunEntry {
    token: CancellationToken,
    page: Mutex<Option<Arc<dyn BrowserPage>>>,
    cleaned: AtomicBool,
}

impl RunEntry {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            page: Mutex::new(None),
            cleaned: AtomicBool::new(false),
        }
    }
}

#[derive(Default)]
pub struct CancellationRegistry {
    entries: DashMap<String, Arc<RunEntry>>,
    kept_open: DashMap<String, Arc<dyn BrowserPage>>,
}

impl CancellationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark an execution as running and hand back its token.
    pub fn register(&self, execution_id: &str) -> CancellationToken {
        let entry = Arc::new(RunEntry::new());
        let token = entry.token.clone();
        self.entries.insert(execution_id.to_string(), entry);
        token
    }

    /// Associate the run's page with its entry. Returns false when the run was already stopped and
    /// cleaned; the caller then owns closing the page.
    pub fn attach_page(&self, execution_id: &str, page: Arc<dyn BrowserPage>) -> bool {
        let Some(entry) = self.entry(execution_id) else {
            return false;
        };
        let mut slot = entry.page.lock();
        if entry.cleaned.load(Ordering::SeqCst) {
            return false;
        }
        *slot = Some(page);
        true
    }

    pub fn is_running(&self, execution_id: &str) -> bool {
        self.entry(execution_id)
            .map(|entry| !entry.token.is_cancelled())
            .unwrap_or(false)
    }

    pub fn is_cancelled(&self, execution_id: &str) -> bool {
        self.entry(execution_id)
            .map(|entry| entry.token.is_cancelled())
            .unwrap_or(false)
    }

    /// Request a stop: cancel the token and close the page now.
    ///
    /// Returns false for unknown ids. Repeated calls are harmless.
    pub async fn stop(&self, execution_id: &str) -> bool {
        if let Some((_, page)) = self.kept_open.remove(execution_id) {
            info!(execution_id, "closing page kept open after the run");
            close_page(execution_id, page.as_ref()).await;
            return true;
        }
        let Some(entry) = self.entry(execution_id) else {
            debug!(execution_id, "stop requested for unknown execution");
            return false;
        };
        if !entry.token.is_cancelled() {
            info!(execution_id, "stop requested");
            entry.token.cancel();
        }
        cleanup(execution_id, &entry).await;
        true
    }

    /// Close the run's page unless a stop request already did.
    pub async fn release(&self, execution_id: &str) {
        if let Some(entry) = self.entry(execution_id) {
            cleanup(execution_id, &entry).await;
        }
    }

    /// Keep the page alive past the run; a later stop request closes it.
    pub fn keep_open(&self, execution_id: &str) {
        let Some(entry) = self.entry(execution_id) else {
            return;
        };
        if entry.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        let page = entry.page.lock().take();
        if let Some(page) = page {
            self.kept_open.insert(execution_id.to_string(), page);
        }
    }

    /// Drop the entry once the run reached a terminal status.
    pub fn finish(&self, execution_id: &str) {
        self.entries.remove(execution_id);
    }

    pub fn running_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.value().token.is_cancelled())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, execution_id: &str) -> Option<Arc<RunEntry>> {
        self.entries.get(execution_id).map(|e| e.value().clone())
    }
}

async fn cleanup(execution_id: &str, entry: &RunEntry) {
    let page = {
        let mut slot = entry.page.lock();
        if entry.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        slot.take()
    };
    if let Some(page) = page {
        close_page(execution_id, page.as_ref()).await;
    }
}

async fn close_page(execution_id: &str, page: &dyn BrowserPage) {
    if let Err(err) = page.close().await {
        warn!(execution_id, %err, "failed to close browser page");
    } else {
        debug!(execution_id, "browser page closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_adapter::{BrowserSettings, SessionProvider, StubSessionProvider};

    #[tokio::test]
    async fn stop_twice_closes_once() {
        let provider = StubSessionProvider::default();
        let page = provider.create_page(&BrowserSettings::default()).await.unwrap();
        let registry = CancellationRegistry::new();
        let token = registry.register("e1");
        assert!(registry.attach_page("e1", page));
        assert!(registry.is_running("e1"));

        assert!(registry.stop("e1").await);
        assert!(registry.stop("e1").await);
        registry.release("e1").await;

        assert!(token.is_cancelled());
        assert!(!registry.is_running("e1"));
        assert_eq!(provider.last_page().unwrap().close_count(), 1);

        registry.finish("e1");
        assert!(registry.is_empty());
        assert!(!registry.stop("e1").await);
    }

    #[tokio::test]
    async fn attach_after_stop_is_refused() {
        let provider = StubSessionProvider::default();
        let registry = CancellationRegistry::new();
        registry.register("e2");
        registry.stop("e2").await;
        let page = provider.create_page(&BrowserSettings::default()).await.unwrap();
        assert!(!registry.attach_page("e2", page));
    }

    #[tokio::test]
    async fn kept_open_page_closes_on_later_stop() {
        let provider = StubSessionProvider::default();
        let page = provider.create_page(&BrowserSettings::default()).await.unwrap();
        let registry = CancellationRegistry::new();
        registry.register("e3");
        registry.attach_page("e3", page);
        registry.keep_open("e3");
        registry.release("e3").await;
        registry.finish("e3");
        assert_eq!(provider.last_page().unwrap().close_count(), 0);

        assert!(registry.stop("e3").await);
        assert_eq!(provider.last_page().unwrap().close_count(), 1);
    }
}
