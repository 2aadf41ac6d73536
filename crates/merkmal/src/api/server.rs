//! API server setup.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::core::config::MerkmalConfig;
use crate::core::init::build_dispatcher;
use crate::error::{MerkmalError, Result};
use crate::mapper::FileMapper;
use crate::sftp::SftpTransport;

use super::handlers::{health_handler, index_handler, info_handler};
use super::ingest::IndexServer;
use super::types::ApiState;

/// Request bodies are small JSON descriptors; anything bigger is abuse.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Create the API router around an existing [`IndexServer`].
///
/// Public so the router can be nested into a larger application.
pub fn create_router(server: Arc<IndexServer>) -> Router {
    let state = ApiState { server };
    Router::new()
        .route("/", post(index_handler))
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build dispatcher, mapper and ingestion server from one config.
pub fn build_server(
    config: &MerkmalConfig,
    sftp: Option<Arc<dyn SftpTransport>>,
) -> Result<IndexServer> {
    let mapper = Arc::new(FileMapper::new(config.file_map.clone()));
    let dispatcher = Arc::new(build_dispatcher(config, Arc::clone(&mapper))?);
    IndexServer::new(config, dispatcher, mapper, sftp)
}

/// Start the API server.
pub async fn serve(
    host: impl AsRef<str>,
    port: u16,
    config: MerkmalConfig,
    sftp: Option<Arc<dyn SftpTransport>>,
) -> Result<()> {
    let ip: IpAddr = host
        .as_ref()
        .parse()
        .map_err(|e| MerkmalError::validation(format!("invalid host address: {e}")))?;
    let addr = SocketAddr::new(ip, port);

    let server = Arc::new(build_server(&config, sftp)?);
    let app = create_router(server);

    tracing::info!("starting identification server at http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(MerkmalError::Io)?;
    axum::serve(listener, app)
        .await
        .map_err(|e| MerkmalError::Other(e.to_string()))?;
    Ok(())
}
