//! Integration tests for the HTTP API.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use std::io::Write;
use std::sync::Arc;
use tower::ServiceExt;

use merkmal::MerkmalConfig;
use merkmal::api::{HealthResponse, InfoResponse, build_server, create_router};

fn router_for(config: MerkmalConfig) -> axum::Router {
    create_router(Arc::new(build_server(&config, None).unwrap()))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = router_for(MerkmalConfig::default());
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(health.status, "healthy");
    assert!(!health.version.is_empty());
}

#[tokio::test]
async fn test_info_lists_registered_actions() {
    let app = router_for(MerkmalConfig::default());
    let response = app
        .oneshot(Request::builder().uri("/info").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let info: InfoResponse = serde_json::from_slice(&bytes).unwrap();
    assert!(info.actions.contains(&"checksum".to_string()));
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = router_for(MerkmalConfig::default());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unparseable_url_is_bad_request() {
    let app = router_for(MerkmalConfig::default());
    let body = json!({ "url": "not a url at all" }).to_string();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_file_url_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut f = std::fs::File::create(dir.path().join("note.txt")).unwrap();
    f.write_all(b"hello from the api").unwrap();

    let mut config = MerkmalConfig::default();
    config
        .file_map
        .insert("data".to_string(), dir.path().to_string_lossy().to_string());
    let app = router_for(config);

    let body = json!({
        "url": "file://data/note.txt",
        "actions": ["checksum"],
    })
    .to_string();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let value = body_json(response).await;
    assert_eq!(value["size"], 18);
    assert_eq!(value["mimetype"], "text/plain");
    assert!(value["checksum"]["sha512"].is_string());
    assert!(value.get("errors").is_none());
}

#[tokio::test]
async fn test_index_failure_is_data_not_http_error() {
    let app = router_for(MerkmalConfig::default());
    let body = json!({ "url": "file://unmapped/x.bin" }).to_string();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert!(
        value["errors"]["index"]
            .as_str()
            .unwrap()
            .contains("no mapping")
    );
}

#[tokio::test]
async fn test_unknown_action_reported_per_name() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("x.bin"), b"\x00\x01\x02").unwrap();
    let mut config = MerkmalConfig::default();
    config
        .file_map
        .insert("data".to_string(), dir.path().to_string_lossy().to_string());
    let app = router_for(config);

    let body = json!({
        "url": "file://data/x.bin",
        "actions": ["ghost", "checksum"],
    })
    .to_string();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value["errors"]["ghost"], "action not available");
    assert!(value["checksum"]["sha512"].is_string());
}
