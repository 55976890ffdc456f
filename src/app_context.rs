//! Process-wide wiring: session provider, status registry, cancellation registry and engine.

use std::sync::Arc;

use action_flow::{CancellationRegistry, FlowEngine};
use cdp_adapter::{select_provider, AdapterMode, SessionProvider};
use flowpilot_state_center::{ExecutionStatusRegistry, ExecutionStore, FsExecutionStore};
use tracing::info;

use crate::config::Config;

#[derive(Clone)]
pub struct AppContext {
    engine: Arc<FlowEngine>,
    mode: AdapterMode,
}

impl AppContext {
    /// Wire the engine against the provider picked for this machine and a file-backed store.
    pub fn from_config(config: &Config) -> Self {
        let (provider, mode) = select_provider(config.browser.launch_config());
        let store: Arc<dyn ExecutionStore> =
            Arc::new(FsExecutionStore::new(config.data_dir.clone()));
        info!(
            provider = provider.name(),
            data_dir = %config.data_dir.display(),
            "application context ready"
        );
        Self::build(provider, mode, Some(store), config)
    }

    /// Wire the engine against an explicit provider; used by tests and dry runs.
    pub fn with_provider(
        provider: Arc<dyn SessionProvider>,
        store: Option<Arc<dyn ExecutionStore>>,
        config: &Config,
    ) -> Self {
        Self::build(provider, AdapterMode::Stub, store, config)
    }

    fn build(
        provider: Arc<dyn SessionProvider>,
        mode: AdapterMode,
        store: Option<Arc<dyn ExecutionStore>>,
        config: &Config,
    ) -> Self {
        let states = Arc::new(ExecutionStatusRegistry::new(store));
        let engine = FlowEngine::new(
            provider,
            CancellationRegistry::new(),
            states,
            config.engine,
        );
        Self {
            engine: Arc::new(engine),
            mode,
        }
    }

    pub fn engine(&self) -> &Arc<FlowEngine> {
        &self.engine
    }

    pub fn states(&self) -> &Arc<ExecutionStatusRegistry> {
        self.engine.states()
    }

    pub fn mode(&self) -> AdapterMode {
        self.mode
    }
}
