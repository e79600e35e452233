mod handlers;
mod metrics;
mod routes;

use anyhow::{Context, Result};
use kata_common::config::SandboxConfig;
use kata_engine::Judge;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub judge: Arc<Judge>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining in-flight submissions");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Kata API booting...");

    let config = SandboxConfig::load_default().context("Failed to load sandbox configuration")?;
    info!(
        image = %config.image,
        timeout_ms = config.timeout_ms,
        max_concurrent = config.max_concurrent_executions,
        fallback_enabled = config.fallback.enabled,
        "Sandbox configuration loaded"
    );

    if config.fallback.enabled {
        warn!("Fallback executor enabled: submissions run WITHOUT sandbox isolation while Docker is unreachable");
    }

    let judge = Judge::from_config(&config).context("Failed to initialise executors")?;

    // Startup probe is informational; availability is re-checked per submission
    match judge.primary().probe().await {
        Ok(()) => info!("Docker sandbox reachable"),
        Err(e) => warn!(error = %e, "Docker sandbox unreachable at startup"),
    }

    metrics::register_metrics();

    let state = AppState {
        judge: Arc::new(judge),
    };
    let app = routes::routes().with_state(state);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Kata API stopped");
    Ok(())
}
