//! Viessmann login service
//!
//! Single-binary Rust service that:
//! 1. Restores the session from the stored refresh token, or runs the
//!    browser authorization flow when there is none
//! 2. Optionally probes the API with the new session
//! 3. Keeps the access token fresh in the background
//! 4. Serves /health and /metrics until SIGINT/SIGTERM

mod config;
mod metrics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vicare_auth::{
    Authenticator, CredentialState, LogPrompt, Refresher, SettingsStore, TokenClient,
};
use vicare_client::{AuthorizedClient, spawn_refresh_task};

use crate::config::Config;

/// How long in-flight /health and /metrics requests get after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    credentials: Arc<CredentialState>,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
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

    info!("starting vicare-login");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
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
        storage = %config.storage.path.display(),
        host = ?config.auth.host,
        listen_addr = ?config.service.listen_addr,
        "configuration loaded"
    );

    let http = reqwest::Client::new();
    let auth_config = config.auth_config();
    let store = Arc::new(SettingsStore::load(config.storage.path.clone()).await);
    let credentials = Arc::new(CredentialState::new());
    let refresher = Arc::new(Refresher::new(
        TokenClient::new(http.clone(), &auth_config),
        credentials.clone(),
    ));
    let authenticator =
        Authenticator::new(auth_config, refresher.clone(), store, Arc::new(LogPrompt));

    match authenticator
        .authenticate(config.auth.host, shutdown_signal())
        .await
    {
        Ok(()) => {}
        Err(vicare_auth::Error::Cancelled) => {
            info!("authorization cancelled, shutting down");
            return Ok(());
        }
        Err(e) => return Err(e).context("authorization failed"),
    }
    metrics::set_authenticated(true);

    if let Some(url) = &config.service.probe_url {
        let client = AuthorizedClient::new(http.clone(), refresher.clone());
        match client.get(url).await {
            Ok(response) => info!(status = response.status().as_u16(), "probe request succeeded"),
            Err(e) => warn!(error = %e, "probe request failed"),
        }
    }

    let refresh_task = spawn_refresh_task(
        refresher.clone(),
        config.refresh_interval(),
        config.refresh_threshold(),
    );

    match config.service.listen_addr {
        Some(listen_addr) => {
            let app = build_router(AppState {
                credentials,
                started_at: Instant::now(),
                prometheus: prometheus_handle,
            });
            let listener = TcpListener::bind(listen_addr)
                .await
                .with_context(|| format!("failed to bind to {listen_addr}"))?;
            info!(addr = %listen_addr, "serving health and metrics");

            let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
            let server_handle = tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await
            });

            shutdown_signal().await;
            let _ = shutdown_tx.send(());

            // Drain timer starts at signal receipt
            match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
                Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
                Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
                Ok(Err(e)) => error!(error = %e, "server task panicked"),
                Err(_) => warn!(
                    drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                    "drain timeout exceeded, forcing shutdown"
                ),
            }
        }
        None => shutdown_signal().await,
    }

    refresh_task.abort();
    metrics::set_authenticated(false);

    info!("shutdown complete");
    Ok(())
}

/// Returns 200 while an access token is held, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let authenticated = state.credentials.is_authenticated().await;

    let (status_code, status) = if authenticated {
        (axum::http::StatusCode::OK, "healthy")
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    let body = serde_json::json!({
        "status": status,
        "authenticated": authenticated,
        "uptime_seconds": uptime,
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

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
