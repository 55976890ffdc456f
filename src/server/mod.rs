//! HTTP surface: execution API, event streams and flow routes.

pub mod auth;
pub mod flows;
pub mod rate_limit;
mod router;
mod state;

pub use flows::{bind_parameters, FlowCatalog};
pub use router::build_router;
pub use state::AppState;
