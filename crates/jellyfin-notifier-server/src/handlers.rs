// HTTP request handlers for server mode
//
// Radarr/Sonarr webhooks, library discovery and health endpoints

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use jellyfin_notifier_batch::RecordOutcome;
use jellyfin_notifier_client::{
    merge_ids, select_library_ids_by_collection, JellyfinError, LibrarySummary,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tracing::{debug, info};

use crate::normalize::{CredentialSources, RefreshRequest};
use crate::{AppError, AppState};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Source {
    Radarr,
    Sonarr,
}

impl Source {
    fn as_str(&self) -> &'static str {
        match self {
            Source::Radarr => "radarr",
            Source::Sonarr => "sonarr",
        }
    }

    fn endpoint(&self) -> &'static str {
        match self {
            Source::Radarr => "/radarr-webhook",
            Source::Sonarr => "/sonarr-webhook",
        }
    }
}

/// The parts of a Radarr/Sonarr webhook body the notifier looks at. Every
/// field is optional; anything unparsable is treated as an empty payload.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WebhookPayload {
    event_type: Option<String>,
    movie: Option<Movie>,
    movie_file: Option<MediaFile>,
    series: Option<Series>,
    episode_file: Option<MediaFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Movie {
    title: Option<String>,
    year: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Series {
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MediaFile {
    relative_path: Option<String>,
    path: Option<String>,
}

impl MediaFile {
    fn display_path(&self) -> Option<&str> {
        self.relative_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .or(self.path.as_deref())
    }
}

impl WebhookPayload {
    fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    fn is_test(&self) -> bool {
        self.event_type
            .as_deref()
            .is_some_and(|event| event.eq_ignore_ascii_case("test"))
    }

    fn log(&self, source: Source, remote: Option<SocketAddr>) {
        let event_type = self.event_type.as_deref().unwrap_or("-");
        let remote_addr = remote
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        match source {
            Source::Radarr => {
                let movie = self.movie.as_ref();
                let year = movie
                    .and_then(|m| m.year.as_ref())
                    .map(|y| y.to_string())
                    .unwrap_or_else(|| "-".to_string());
                info!(
                    source = source.as_str(),
                    endpoint = source.endpoint(),
                    %remote_addr,
                    event_type,
                    title = movie.and_then(|m| m.title.as_deref()).unwrap_or("-"),
                    %year,
                    path = self
                        .movie_file
                        .as_ref()
                        .and_then(MediaFile::display_path)
                        .unwrap_or("-"),
                    "Radarr event"
                );
            }
            Source::Sonarr => {
                info!(
                    source = source.as_str(),
                    endpoint = source.endpoint(),
                    %remote_addr,
                    event_type,
                    series = self
                        .series
                        .as_ref()
                        .and_then(|s| s.title.as_deref())
                        .unwrap_or("-"),
                    episode_path = self
                        .episode_file
                        .as_ref()
                        .and_then(MediaFile::display_path)
                        .unwrap_or("-"),
                    "Sonarr event"
                );
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct QueuedResponse {
    message: &'static str,
    batch_id: u64,
    pending_events: usize,
}

/// POST /radarr-webhook
pub(crate) async fn handle_radarr(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let remote = connect_info.map(|ConnectInfo(addr)| addr);
    handle_webhook(Source::Radarr, &state, remote, &headers, &body).await
}

/// POST /sonarr-webhook
pub(crate) async fn handle_sonarr(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let remote = connect_info.map(|ConnectInfo(addr)| addr);
    handle_webhook(Source::Sonarr, &state, remote, &headers, &body).await
}

async fn handle_webhook(
    source: Source,
    state: &AppState,
    remote: Option<SocketAddr>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, AppError> {
    let payload = WebhookPayload::parse(body);
    payload.log(source, remote);

    let request = RefreshRequest::from_headers(headers, &state.jellyfin)?;

    if payload.is_test() {
        return handle_test_event(source, state, &request).await;
    }

    let scope = request.scope();
    let key = request.key(state.grouping, &scope);

    let outcome = state
        .engine
        .record_event(key, scope)
        .await
        .map_err(|e| AppError::with_status(StatusCode::SERVICE_UNAVAILABLE, e))?;

    match outcome {
        RecordOutcome::Queued {
            batch_id,
            pending_events,
        } => Ok((
            StatusCode::ACCEPTED,
            Json(QueuedResponse {
                message: "Refresh queued",
                batch_id,
                pending_events,
            }),
        )
            .into_response()),
        RecordOutcome::Flushed(Ok(report)) => {
            Ok((StatusCode::OK, Json(json!({"message": report.message}))).into_response())
        }
        RecordOutcome::Flushed(Err(e)) => Err(e.into()),
    }
}

/// Connectivity check requested from the Radarr/Sonarr UI. Never touches the
/// engine.
async fn handle_test_event(
    source: Source,
    state: &AppState,
    request: &RefreshRequest,
) -> Result<Response, AppError> {
    let client = state.engine.flusher().client_for(&request.credentials);

    let ping_message = client.ping().await?;
    info!(source = source.as_str(), "Test event: Jellyfin reachable");

    let folders = client.fetch_virtual_folders().await?;

    let mut selected = Vec::new();
    if !request.collection_types.is_empty() {
        let selection =
            select_library_ids_by_collection(&folders, request.collection_types.as_slice());
        if !selection.missing.is_empty() {
            return Err(JellyfinError::UnknownCollectionTypes {
                missing: selection.missing,
                available: selection.available,
            }
            .into());
        }
        let resolved = if selection.selected.is_empty() {
            "(none)".to_string()
        } else {
            selection.selected.join(", ")
        };
        info!(
            source = source.as_str(),
            collection_types = %request.collection_types.join(", "),
            resolved_libraries = %resolved,
            "Test event: collection types resolved"
        );
        selected = selection.selected;
    }

    let targets = merge_ids([request.library_ids.clone(), selected]);
    if !targets.is_empty() {
        info!(
            source = source.as_str(),
            libraries = %targets.join(", "),
            "Test event: target libraries"
        );
    }

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": format!("{}; Jellyfin virtual folders listed", ping_message),
            "targets": targets,
        })),
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LibrariesQuery {
    url: Option<String>,
    api_key: Option<String>,
}

/// GET /libraries - Jellyfin virtual folders for the resolved server
pub(crate) async fn list_libraries(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LibrariesQuery>,
) -> Result<Response, AppError> {
    let credentials = CredentialSources::listing(
        &headers,
        query.url.as_deref(),
        query.api_key.as_deref(),
        &state.jellyfin,
    )?
    .resolve()?;

    let client = state.engine.flusher().client_for(&credentials);
    let folders = client.fetch_virtual_folders().await?;
    let libraries: Vec<LibrarySummary> = folders.iter().map(|f| f.summary()).collect();

    let body = serde_json::to_string_pretty(&json!({ "libraries": libraries }))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response())
}

/// GET /health - Basic health check
pub(crate) async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// GET /ready - Readiness check with the number of pending batches
pub(crate) async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    let pending_batches = state.pending_batches();
    if pending_batches > 0 {
        debug!(pending_batches, "Readiness check");
    }
    (
        StatusCode::OK,
        Json(json!({"status": "ready", "pending_batches": pending_batches})),
    )
}
