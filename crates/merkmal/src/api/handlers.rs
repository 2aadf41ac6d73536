//! API request handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use serde_json::{Value, json};
use url::Url;

use crate::error::MerkmalError;

use super::error::ApiError;
use super::types::{ApiState, HealthResponse, IndexRequest, InfoResponse};

/// Index endpoint handler.
///
/// POST / with a JSON [`IndexRequest`] body. Malformed JSON and unparseable
/// URLs are 400; a failure while indexing is data, not an HTTP error: the
/// response is 200 with `{"errors": {"index": "..."}}` so callers can
/// always pipeline results.
pub async fn index_handler(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: IndexRequest = serde_json::from_slice(&body).map_err(|e| {
        ApiError::validation(MerkmalError::validation_with_source(
            format!("cannot unmarshal json - {}", String::from_utf8_lossy(&body)),
            e,
        ))
    })?;
    Url::parse(&request.url).map_err(|e| {
        ApiError::validation(MerkmalError::validation_with_source(
            format!("cannot parse url {}", request.url),
            e,
        ))
    })?;

    match state.server.index(&request).await {
        Ok(result) => {
            let value = serde_json::to_value(&result)
                .map_err(|e| ApiError::internal(e.into()))?;
            Ok(Json(value))
        }
        Err(e) => {
            tracing::error!("error on indexing: {}", e);
            Ok(Json(json!({ "errors": { "index": e.to_string() } })))
        }
    }
}

/// Health check endpoint handler.
///
/// GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Server info endpoint handler.
///
/// GET /info
pub async fn info_handler(State(state): State<ApiState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        actions: state.server.dispatcher().names(),
    })
}
