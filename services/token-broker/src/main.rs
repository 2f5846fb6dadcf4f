//! Site Token Broker
//!
//! Single-binary service that:
//! 1. Loads site credentials and the durable token/history store
//! 2. Builds the token pool around an HTTP login sidecar
//! 3. Warms the cache and keeps it fresh in the background
//! 4. Serves `/health` and `/metrics` for operators

mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;
use site_auth::{FileCredentialStore, HttpLoginExecutor};
use token_pool::{Coordinator, HealthStatus, JsonFileStore, spawn_maintenance_task};

use crate::config::Config;

/// How long in-flight HTTP requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    coordinator: Coordinator,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting token-broker");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.service.listen_addr,
        login_endpoint = %config.login.endpoint,
        sidecar_auth = config.login.auth_token.is_some(),
        sites = config.maintenance.sites.len(),
        "configuration loaded"
    );

    let credentials = FileCredentialStore::load(config.storage.credentials_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load credentials from {}",
                config.storage.credentials_path.display()
            )
        })?;
    let durable = JsonFileStore::open(config.storage.state_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to open token store at {}",
                config.storage.state_path.display()
            )
        })?;

    let client = reqwest::Client::builder()
        .timeout(config.login.timeout())
        .build()
        .context("failed to build login HTTP client")?;
    let login = HttpLoginExecutor::new(
        client,
        config.login.endpoint.clone(),
        config.login.auth_token.clone(),
    );

    let coordinator = Coordinator::new(
        config.pool.clone(),
        Arc::new(credentials),
        Arc::new(durable),
        Arc::new(login),
    );

    for site in &config.maintenance.sites {
        match coordinator.warm_up_cache(site).await {
            Ok(count) => info!(site = %site, count, "cache warmed"),
            Err(e) => warn!(site = %site, error = %e, "cache warm-up failed"),
        }
    }

    let maintenance = spawn_maintenance_task(coordinator.clone(), config.maintenance.clone());

    let app_state = AppState {
        coordinator,
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };
    let app = build_router(app_state, config.service.max_connections);

    let listen_addr = config.service.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts at signal receipt, not at server start
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    maintenance.abort();
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: the pool's health report plus its live counters.
/// Returns 200 unless the pool is unhealthy, then 503.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.coordinator.health();
    let snapshot = state.coordinator.metrics().await;

    let status_code = if report.status == HealthStatus::Unhealthy {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    } else {
        axum::http::StatusCode::OK
    };
    let body = serde_json::json!({
        "status": report.status.label(),
        "alerts": report.alerts,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "metrics": snapshot,
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
