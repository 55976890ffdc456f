//! FlowPilot application library
//!
//! CLI commands, configuration and the HTTP server around the flow engine. Exposed as a library
//! for integration testing.

pub mod app_context;
pub mod cli;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod server;

pub use app_context::AppContext;
pub use config::Config;
pub use errors::{ApiError, ApiResult};
