use axum::{extract::State, http::Method, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::metrics;

mod executions;
mod ws;

use super::flows;
use super::state::AppState;

/// Built-in routes; flow routes may not shadow them.
const RESERVED_ROUTES: &[(&str, &str)] = &[
    ("GET", "/health"),
    ("GET", "/metrics"),
    ("GET", "/ws"),
    ("POST", "/api/executions"),
    ("GET", "/api/executions/:id"),
    ("POST", "/api/executions/:id/stop"),
    ("GET", "/api/executions/:id/events"),
];

pub fn build_router(state: AppState) -> Router {
    let flow_routes = flows::routes(state.flows(), RESERVED_ROUTES);
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .merge(executions::router())
        .merge(ws::router())
        .merge(flow_routes)
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.context.mode().as_str(),
        "flows": state.flows().len(),
        "running": state.engine().cancellations().running_count(),
        "uptimeSecs": state.uptime_secs(),
    }))
}
