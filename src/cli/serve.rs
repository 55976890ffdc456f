use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::Args;
use tokio::net::TcpListener;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::{build_router, AppState, FlowCatalog};

use super::context::CliContext;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);
const RATE_LIMIT_BUCKET_TTL: Duration = Duration::from_secs(600);

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Interface to bind (defaults to the configured host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (defaults to the configured port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory of flow definitions to expose as HTTP routes
    #[arg(long, value_name = "DIR")]
    pub flows_dir: Option<PathBuf>,
}

pub async fn cmd_serve(args: ServeArgs, cli: &CliContext) -> Result<()> {
    let config = cli.config();
    let host = args.host.unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);
    let flows_dir = args.flows_dir.unwrap_or_else(|| config.flows_dir.clone());

    let flows = FlowCatalog::load_dir(&flows_dir).await?;
    let app = cli.app_context();
    info!(provider = app.mode().as_str(), flows = flows.len(), "server context ready");
    let state = AppState::new(app, flows);
    let shutdown = CancellationToken::new();
    spawn_maintenance(
        state.clone(),
        Duration::from_secs(config.retention_secs),
        shutdown.clone(),
    );

    let router = build_router(state);
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;
    info!(addr = %listener.local_addr()?, "FlowPilot server listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await
    .context("HTTP server error")?;
    shutdown.cancel();
    info!("server stopped");
    Ok(())
}

/// Evicts finished executions from memory and drops idle rate-limit buckets.
fn spawn_maintenance(state: AppState, retention: Duration, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = interval(MAINTENANCE_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !retention.is_zero() {
                let keep = ChronoDuration::from_std(retention).unwrap_or(ChronoDuration::hours(1));
                let pruned = state.states().prune_finished_before(Utc::now() - keep);
                if pruned > 0 {
                    debug!(pruned, "evicted finished executions from memory");
                }
            }
            let removed = state.rate_limiter().prune_idle(RATE_LIMIT_BUCKET_TTL);
            if removed > 0 {
                debug!(removed, "Pruned stale rate limit buckets");
            }
        }
    });
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
    shutdown.cancel();
}
