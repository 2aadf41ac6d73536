//! HTTP ingestion front-end.
//!
//! One endpoint does the work: `POST /` takes a JSON descriptor naming a
//! URL and the probe actions to run, resolves the URL to a local byte
//! source, calls the dispatcher and returns the merged result as JSON.
//!
//! # Endpoints
//!
//! - `POST /` - index one object
//! - `GET /health` - health check
//! - `GET /info` - version and registered actions
//!
//! # cURL example
//!
//! ```bash
//! curl -X POST -d '{"url": "file://media/folder/image.tif", \
//!      "actions": ["siegfried", "checksum", "identify"]}' \
//!      http://localhost:8083/
//! ```

mod error;
mod handlers;
mod ingest;
mod server;
mod types;

pub use error::ApiError;
pub use ingest::IndexServer;
pub use server::{build_server, create_router, serve};
pub use types::{ApiState, ErrorResponse, HealthResponse, IndexRequest, InfoResponse};
