//! API request and response types.

use crate::api::ingest::IndexServer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Body of `POST /`.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexRequest {
    /// Source URL; schemes `file`, `http`, `https`, `sftp`.
    pub url: String,
    /// Action names to run; empty means all registered actions.
    #[serde(default)]
    pub actions: Vec<String>,
    /// Regex over mime strings; match forces a full download. Absent means
    /// the server default.
    #[serde(default)]
    pub forcedownload: Option<String>,
    /// Prefix length for partial downloads; absent or zero means the server
    /// default.
    #[serde(default)]
    pub headersize: Option<u64>,
    /// Pre-computed digests keyed by algorithm name; seeded into the result.
    #[serde(default)]
    pub checksums: HashMap<String, String>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Server information response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub version: String,
    /// Registered action names.
    pub actions: Vec<String>,
}

/// Error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_type: String,
    pub message: String,
    pub status_code: u16,
}

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub server: Arc<IndexServer>,
}
