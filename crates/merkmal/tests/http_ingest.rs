//! Integration tests for HTTP source resolution.
//!
//! Spins up a local fixture server and drives the ingestion path against
//! it: HEAD-derived mime, forcedownload decision, ranged prefix staging
//! and the max-download-size cap.

use axum::Router;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use std::collections::HashMap;
use std::net::SocketAddr;

use merkmal::MerkmalConfig;
use merkmal::api::{IndexRequest, IndexServer, build_server};

const PDF_BODY_LEN: usize = 100 * 1024;
const DOWNLOAD_CAP: u64 = 64 * 1024;

fn pdf_body() -> Vec<u8> {
    let mut body = b"%PDF-1.4\n".to_vec();
    body.extend((body.len()..PDF_BODY_LEN).map(|i| (i % 89) as u8 + 32));
    body
}

async fn pdf_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/pdf")], pdf_body())
}

async fn page_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        "<html><body>fixture page</body></html>".to_string(),
    )
}

async fn spawn_fixture() -> SocketAddr {
    let app = Router::new()
        .route("/doc.pdf", get(pdf_handler))
        .route("/page.html", get(page_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn server() -> IndexServer {
    let mut config = MerkmalConfig::default();
    config.forcedownload = "^application/pdf$".to_string();
    config.max_download_size = DOWNLOAD_CAP;
    config.header_size = 4096;
    build_server(&config, None).unwrap()
}

fn request(url: String) -> IndexRequest {
    IndexRequest {
        url,
        actions: vec!["checksum".to_string()],
        forcedownload: None,
        headersize: None,
        checksums: HashMap::new(),
    }
}

#[tokio::test]
async fn test_forced_download_truncated_at_cap() {
    let addr = spawn_fixture().await;
    let server = server();

    let result = server
        .index(&request(format!("http://{addr}/doc.pdf")))
        .await
        .unwrap();

    // the body is larger than the cap: staged exactly cap bytes, with the
    // truncation recorded
    assert_eq!(result.size, DOWNLOAD_CAP);
    assert!(result.errors["download"].contains("truncated"));
    assert!(result.checksums.contains_key("sha512"));
    assert_eq!(result.mimetype, "application/pdf");
    assert_eq!(result.kind, "application");
}

#[tokio::test]
async fn test_forced_download_within_cap() {
    let addr = spawn_fixture().await;
    let mut config = MerkmalConfig::default();
    config.forcedownload = "^application/pdf$".to_string();
    config.max_download_size = 10 * 1024 * 1024;
    let server = build_server(&config, None).unwrap();

    let result = server
        .index(&request(format!("http://{addr}/doc.pdf")))
        .await
        .unwrap();

    assert_eq!(result.size, PDF_BODY_LEN as u64);
    assert!(result.errors.is_empty(), "errors: {:?}", result.errors);
    assert_eq!(result.mimetype, "application/pdf");
}

#[tokio::test]
async fn test_unforced_mime_stages_header_prefix_only() {
    let addr = spawn_fixture().await;
    let server = server();

    let result = server
        .index(&request(format!("http://{addr}/page.html")))
        .await
        .unwrap();

    // text/html does not match the forcedownload pattern; the fixture body
    // is smaller than the header size, so the whole thing lands anyway
    assert_eq!(result.size, 38);
    assert_eq!(result.mimetype, "text/html");
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn test_per_request_forcedownload_override() {
    let addr = spawn_fixture().await;
    let server = server();

    let mut req = request(format!("http://{addr}/doc.pdf"));
    // the override matches nothing: only a prefix is staged
    req.forcedownload = Some("^video/".to_string());
    req.headersize = Some(1024);
    let result = server.index(&req).await.unwrap();

    assert_eq!(result.size, 1024);
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn test_unreachable_host_is_index_error() {
    let server = server();
    let err = server
        .index(&request("http://127.0.0.1:1/doc.pdf".to_string()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("head"));
}
