// HTTP server for the notifier
//
// Receives Radarr and Sonarr webhooks and coalesces them into Jellyfin
// library refreshes:
// - Axum HTTP server (HTTP/1.1, HTTP/2)
// - Request guard (IP allowlist, per-address rate limit)
// - Structured logging with tracing
// - Graceful shutdown that discards pending batches

use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use jellyfin_notifier_batch::CoalescingEngine;
use jellyfin_notifier_client::{JellyfinError, JellyfinFlusher};
use jellyfin_notifier_config::{JellyfinConfig, KeyGrouping, RuntimeConfig};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

mod guard;
mod handlers;
mod init;
mod normalize;

use guard::RequestGuard;
use handlers::{handle_radarr, handle_sonarr, health_check, list_libraries, ready_check};
use init::{build_http_client, client_settings, engine_config, init_tracing};

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    pub(crate) engine: Arc<CoalescingEngine<JellyfinFlusher>>,
    pub(crate) jellyfin: Arc<JellyfinConfig>,
    pub(crate) grouping: KeyGrouping,
    pub(crate) guard: Arc<RequestGuard>,
}

impl AppState {
    /// Build the state and start the coalescing engine. Must be called from
    /// inside a tokio runtime.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let guard = RequestGuard::from_config(&config.security)
            .context("Invalid security configuration")?;
        let http = build_http_client()?;
        let flusher = JellyfinFlusher::new(http, client_settings(&config.jellyfin));
        let engine = CoalescingEngine::start(engine_config(&config.batch), flusher);

        Ok(Self {
            engine: Arc::new(engine),
            jellyfin: Arc::new(config.jellyfin.clone()),
            grouping: config.batch.group_by,
            guard: Arc::new(guard),
        })
    }

    pub fn pending_batches(&self) -> usize {
        self.engine.pending_batches()
    }

    /// Stop the engine, discarding pending batches. Returns how many were
    /// dropped.
    pub async fn shutdown(&self) -> usize {
        self.engine.shutdown().await
    }
}

/// Error type that implements IntoResponse
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), "Request error: {:?}", self.error);
        } else {
            warn!(status = self.status.as_u16(), "Request rejected: {}", self.error);
        }
        (
            self.status,
            Json(json!({
                "error": self.error.to_string(),
            })),
        )
            .into_response()
    }
}

/// Jellyfin failures keep their own status; anything else is a 500.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let error = err.into();
        let status = error
            .downcast_ref::<JellyfinError>()
            .map(JellyfinError::status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self { status, error }
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("status", &self.status)
            .field("error", &self.error.to_string())
            .finish()
    }
}

impl AppError {
    pub fn with_status(status: StatusCode, error: anyhow::Error) -> Self {
        Self { status, error }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, anyhow::anyhow!(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

/// Build the router. Webhook and library routes sit behind the request guard;
/// health checks do not.
pub fn router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/radarr-webhook", post(handle_radarr))
        .route("/sonarr-webhook", post(handle_sonarr))
        .route("/libraries", get(list_libraries))
        .route_layer(middleware::from_fn_with_state(state.clone(), guard::enforce));

    Router::new()
        .merge(guarded)
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

/// Entry point with a fully resolved configuration
pub async fn run_with_config(config: RuntimeConfig) -> Result<()> {
    init_tracing(&config)?;
    config.validate()?;

    let addr = config
        .server
        .as_ref()
        .map(|server| server.listen_addr.clone())
        .unwrap_or_else(|| "0.0.0.0:5001".to_string());

    info!(
        debounce_secs = config.batch.debounce_secs,
        max_wait_secs = config.batch.max_wait_secs,
        group_by = %config.batch.group_by,
        default_jellyfin = config.jellyfin.url.as_deref().unwrap_or("-"),
        "jellyfin-notifier starting"
    );

    let state = AppState::new(&config)?;
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Webhook endpoint listening on http://{}", addr);
    info!("Routes:");
    info!("  POST http://{}/radarr-webhook - Radarr webhook", addr);
    info!("  POST http://{}/sonarr-webhook - Sonarr webhook", addr);
    info!("  GET  http://{}/libraries      - Jellyfin libraries", addr);
    info!("  GET  http://{}/health         - Health check", addr);
    info!("  GET  http://{}/ready          - Readiness check", addr);
    info!("Press Ctrl+C or send SIGTERM to stop");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    state.shutdown().await;
    info!("Server shutdown complete");

    Ok(())
}
