// End-to-end router tests against a mocked Jellyfin server

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{header, HeaderValue, Request, StatusCode},
    Router,
};
use httpmock::prelude::*;
use jellyfin_notifier_config::RuntimeConfig;
use jellyfin_notifier_server::{router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn config_for(server: &MockServer) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.jellyfin.url = Some(server.base_url());
    config.jellyfin.api_key = Some("test-key".to_string());
    config
}

fn app(state: &AppState, remote: [u8; 4]) -> Router {
    router(state.clone()).layer(MockConnectInfo(SocketAddr::from((remote, 40000))))
}

fn webhook(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn download() -> Value {
    json!({
        "eventType": "Download",
        "movie": {"title": "Heat", "year": 1995},
        "movieFile": {"relativePath": "Heat (1995).mkv"}
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn mock_folders(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET).path("/Library/VirtualFolders");
            then.status(200).json_body(json!([
                {"Name": "Shows", "ItemId": "s1", "CollectionType": "tvshows", "Locations": ["/tv"]},
                {"Name": "Movies", "ItemId": "m1", "CollectionType": "movies", "Locations": ["/movies"]}
            ]));
        })
        .await;
}

#[tokio::test]
async fn webhooks_are_queued_into_one_batch() {
    let jellyfin = MockServer::start_async().await;
    let state = AppState::new(&config_for(&jellyfin)).unwrap();
    let app = app(&state, [10, 0, 0, 1]);

    let (status, body) = send(&app, webhook("/radarr-webhook", download())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["message"], "Refresh queued");
    assert_eq!(body["batch_id"], 1);
    assert_eq!(body["pending_events"], 1);

    let (status, body) = send(
        &app,
        webhook("/sonarr-webhook", json!({"eventType": "Download"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["batch_id"], 1);
    assert_eq!(body["pending_events"], 2);

    let ready = Request::get("/ready").body(Body::empty()).unwrap();
    let (status, body) = send(&app, ready).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ready", "pending_batches": 1}));

    assert_eq!(state.shutdown().await, 1);
}

#[tokio::test]
async fn different_scopes_get_different_batches() {
    let jellyfin = MockServer::start_async().await;
    let state = AppState::new(&config_for(&jellyfin)).unwrap();
    let app = app(&state, [10, 0, 0, 1]);

    let mut request = webhook("/radarr-webhook", download());
    request
        .headers_mut()
        .insert("x-jellyfin-library-ids", "lib-a".parse().unwrap());
    let (_, first) = send(&app, request).await;
    let (_, second) = send(&app, webhook("/radarr-webhook", download())).await;

    assert_ne!(first["batch_id"], second["batch_id"]);
    assert_eq!(state.pending_batches(), 2);
    state.shutdown().await;
}

#[tokio::test]
async fn immediate_mode_refreshes_before_responding() {
    let jellyfin = MockServer::start_async().await;
    let refresh = jellyfin
        .mock_async(|when, then| {
            when.method(POST)
                .path("/Library/Refresh")
                .header("X-Emby-Token", "test-key");
            then.status(204);
        })
        .await;

    let mut config = config_for(&jellyfin);
    config.batch.debounce_secs = 0;
    let state = AppState::new(&config).unwrap();
    let app = app(&state, [10, 0, 0, 1]);

    let (status, body) = send(&app, webhook("/radarr-webhook", download())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Triggered Jellyfin refresh");
    refresh.assert_async().await;
}

#[tokio::test]
async fn immediate_mode_surfaces_jellyfin_status() {
    let jellyfin = MockServer::start_async().await;
    jellyfin
        .mock_async(|when, then| {
            when.method(POST).path("/Library/Refresh");
            then.status(503);
        })
        .await;

    let mut config = config_for(&jellyfin);
    config.batch.debounce_secs = 0;
    let state = AppState::new(&config).unwrap();
    let app = app(&state, [10, 0, 0, 1]);

    let (status, body) = send(&app, webhook("/radarr-webhook", download())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to trigger Jellyfin (503)");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn debounced_batch_refreshes_once() {
    let jellyfin = MockServer::start_async().await;
    let refresh = jellyfin
        .mock_async(|when, then| {
            when.method(POST).path("/Items/lib-a/Refresh");
            then.status(204);
        })
        .await;

    let mut config = config_for(&jellyfin);
    config.batch.debounce_secs = 1;
    config.batch.max_wait_secs = 0;
    let state = AppState::new(&config).unwrap();
    let app = app(&state, [10, 0, 0, 1]);

    for _ in 0..3 {
        let mut request = webhook("/sonarr-webhook", json!({"eventType": "Download"}));
        request
            .headers_mut()
            .insert("x-jellyfin-library-ids", "lib-a".parse().unwrap());
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    for _ in 0..50 {
        if refresh.hits_async().await > 0 && state.pending_batches() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(refresh.hits_async().await, 1);
    assert_eq!(state.pending_batches(), 0);
}

#[tokio::test]
async fn missing_credentials_are_rejected() {
    let state = AppState::new(&RuntimeConfig::default()).unwrap();
    let app = app(&state, [10, 0, 0, 1]);

    let (status, body) = send(&app, webhook("/radarr-webhook", download())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Missing credentials: X-Jellyfin-Url"));
    assert_eq!(state.pending_batches(), 0);
}

#[tokio::test]
async fn header_credentials_need_no_config() {
    let state = AppState::new(&RuntimeConfig::default()).unwrap();
    let app = app(&state, [10, 0, 0, 1]);

    let mut request = webhook("/radarr-webhook", download());
    let headers = request.headers_mut();
    headers.insert("x-jellyfin-url", "http://jellyfin:8096".parse().unwrap());
    headers.insert("x-jellyfin-api-key", "header-key".parse().unwrap());

    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    state.shutdown().await;
}

#[tokio::test]
async fn invalid_scope_hints_are_rejected() {
    let jellyfin = MockServer::start_async().await;
    let state = AppState::new(&config_for(&jellyfin)).unwrap();
    let app = app(&state, [10, 0, 0, 1]);

    let mut request = webhook("/radarr-webhook", download());
    request
        .headers_mut()
        .insert("x-jellyfin-library-ids", "good,bad/id".parse().unwrap());
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid library id: bad/id");

    let mut request = webhook("/radarr-webhook", download());
    request
        .headers_mut()
        .insert("x-jellyfin-collection-types", "home_videos".parse().unwrap());
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_ascii_scope_header_is_rejected_not_widened() {
    let jellyfin = MockServer::start_async().await;
    let state = AppState::new(&config_for(&jellyfin)).unwrap();
    let app = app(&state, [10, 0, 0, 1]);

    let mut request = webhook("/radarr-webhook", download());
    request.headers_mut().insert(
        "x-jellyfin-library-ids",
        HeaderValue::from_bytes("lib-é".as_bytes()).unwrap(),
    );
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid x-jellyfin-library-ids header");
    assert_eq!(state.pending_batches(), 0);

    let mut request = webhook("/radarr-webhook", download());
    request.headers_mut().insert(
        "x-jellyfin-url",
        HeaderValue::from_bytes(b"http://jellyfin\xff").unwrap(),
    );
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(state.pending_batches(), 0);
}

#[tokio::test]
async fn unparsable_body_is_treated_as_an_event() {
    let jellyfin = MockServer::start_async().await;
    let state = AppState::new(&config_for(&jellyfin)).unwrap();
    let app = app(&state, [10, 0, 0, 1]);

    let request = Request::builder()
        .method("POST")
        .uri("/radarr-webhook")
        .body(Body::from("not json"))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    state.shutdown().await;
}

#[tokio::test]
async fn test_event_checks_jellyfin_without_queueing() {
    let jellyfin = MockServer::start_async().await;
    jellyfin
        .mock_async(|when, then| {
            when.method(GET).path("/");
            then.status(200);
        })
        .await;
    jellyfin
        .mock_async(|when, then| {
            when.method(GET).path("/System/Info");
            then.status(200).json_body(json!({"Version": "10.9.0"}));
        })
        .await;
    mock_folders(&jellyfin).await;

    let state = AppState::new(&config_for(&jellyfin)).unwrap();
    let app = app(&state, [10, 0, 0, 1]);

    let mut request = webhook("/sonarr-webhook", json!({"eventType": "Test"}));
    let headers = request.headers_mut();
    headers.insert("x-jellyfin-library-ids", "extra".parse().unwrap());
    headers.insert("x-jellyfin-collection-types", "TVShows".parse().unwrap());

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        "Jellyfin connection and API key OK; Jellyfin virtual folders listed"
    );
    assert_eq!(body["targets"], json!(["extra", "s1"]));
    assert_eq!(state.pending_batches(), 0);

    let mut request = webhook("/radarr-webhook", json!({"eventType": "test"}));
    request
        .headers_mut()
        .insert("x-jellyfin-collection-types", "music".parse().unwrap());
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Unknown collection types: music. Available: movies, tvshows"
    );
}

#[tokio::test]
async fn test_event_reports_rejected_key() {
    let jellyfin = MockServer::start_async().await;
    jellyfin
        .mock_async(|when, then| {
            when.method(GET).path("/");
            then.status(200);
        })
        .await;
    jellyfin
        .mock_async(|when, then| {
            when.method(GET).path("/System/Info");
            then.status(401);
        })
        .await;

    let state = AppState::new(&config_for(&jellyfin)).unwrap();
    let app = app(&state, [10, 0, 0, 1]);

    let (status, _) = send(
        &app,
        webhook("/radarr-webhook", json!({"eventType": "Test"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn libraries_lists_sorted_folders() {
    let jellyfin = MockServer::start_async().await;
    mock_folders(&jellyfin).await;

    let state = AppState::new(&RuntimeConfig::default()).unwrap();
    let app = app(&state, [10, 0, 0, 1]);

    let uri = format!(
        "/libraries?url={}&api_key=test-key",
        jellyfin.base_url()
    );
    let (status, body) = send(&app, Request::get(uri).body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"libraries": [
            {"name": "Movies", "itemId": "m1", "collectionType": "movies", "locations": ["/movies"]},
            {"name": "Shows", "itemId": "s1", "collectionType": "tvshows", "locations": ["/tv"]}
        ]})
    );
}

#[tokio::test]
async fn libraries_requires_credentials() {
    let state = AppState::new(&RuntimeConfig::default()).unwrap();
    let app = app(&state, [10, 0, 0, 1]);

    let (status, body) = send(
        &app,
        Request::get("/libraries").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("url query param"));
}

#[tokio::test]
async fn allowlist_guards_webhooks_but_not_health() {
    let jellyfin = MockServer::start_async().await;
    let mut config = config_for(&jellyfin);
    config.security.allowlist = vec!["10.0.0.0/8".to_string()];
    let state = AppState::new(&config).unwrap();

    let outsider = app(&state, [192, 168, 1, 5]);
    let (status, body) = send(&outsider, webhook("/radarr-webhook", download())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Forbidden");

    let (status, body) = send(
        &outsider,
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));

    let insider = app(&state, [10, 1, 2, 3]);
    let (status, _) = send(&insider, webhook("/radarr-webhook", download())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    state.shutdown().await;
}

#[tokio::test]
async fn rate_limit_returns_retry_after() {
    let jellyfin = MockServer::start_async().await;
    let mut config = config_for(&jellyfin);
    config.security.rate_limit_per_minute = 1;
    let state = AppState::new(&config).unwrap();
    let first = app(&state, [10, 0, 0, 1]);

    let (status, _) = send(&first, webhook("/radarr-webhook", download())).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let response = first
        .clone()
        .oneshot(webhook("/radarr-webhook", download()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "60");

    let other = app(&state, [10, 0, 0, 2]);
    let (status, _) = send(&other, webhook("/radarr-webhook", download())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    state.shutdown().await;
}

#[tokio::test]
async fn webhooks_after_shutdown_are_unavailable() {
    let jellyfin = MockServer::start_async().await;
    let state = AppState::new(&config_for(&jellyfin)).unwrap();
    let app = app(&state, [10, 0, 0, 1]);

    let (status, _) = send(&app, webhook("/radarr-webhook", download())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(state.shutdown().await, 1);

    let (status, body) = send(&app, webhook("/radarr-webhook", download())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "refresh engine is shut down");
}
