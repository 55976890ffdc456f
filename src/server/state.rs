use std::sync::Arc;
use std::time::Instant;

use action_flow::FlowEngine;
use flowpilot_state_center::ExecutionStatusRegistry;

use crate::app_context::AppContext;

use super::flows::FlowCatalog;
use super::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub(crate) context: AppContext,
    pub(crate) flows: Arc<FlowCatalog>,
    pub(crate) rate_limiter: Arc<RateLimiter>,
    started_at: Instant,
}

impl AppState {
    pub fn new(context: AppContext, flows: FlowCatalog) -> Self {
        Self {
            context,
            flows: Arc::new(flows),
            rate_limiter: Arc::new(RateLimiter::new()),
            started_at: Instant::now(),
        }
    }

    pub fn engine(&self) -> &Arc<FlowEngine> {
        self.context.engine()
    }

    pub fn states(&self) -> &Arc<ExecutionStatusRegistry> {
        self.context.states()
    }

    pub fn flows(&self) -> &FlowCatalog {
        &self.flows
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
