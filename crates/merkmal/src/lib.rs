//! Merkmal - File Characterisation for Digital Preservation
//!
//! Merkmal identifies and characterises arbitrary files: mime type, PRONOM
//! format fingerprint, coarse structural type, dimensions and duration,
//! content hashes and tool-specific metadata. A preservation pipeline gets
//! one authoritative record per object, assembled from a heterogeneous set
//! of probes in a single pass over the bytes.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use merkmal::{MerkmalConfig, build_dispatcher, FileMapper};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> merkmal::Result<()> {
//! let config = MerkmalConfig::default();
//! let mapper = Arc::new(FileMapper::new(config.file_map.clone()));
//! let dispatcher = build_dispatcher(&config, mapper)?;
//!
//! let file = tokio::fs::File::open("scan.tif").await?;
//! let result = dispatcher
//!     .stream(file, &["scan.tif".to_string()], &["checksum".to_string()])
//!     .await?;
//! println!("{} ({} bytes)", result.mimetype, result.size);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Dispatcher** (`core::dispatcher`): reads the source exactly once and
//!   fans the bytes out to all applicable probe actions through bounded
//!   pipes; partial results merge into one [`IndexResult`]
//! - **Actions** (`actions`): signature matcher, streaming hasher, XML
//!   classifier, and wrappers around external probes (ffprobe, ImageMagick,
//!   Tika, clamscan, configured endpoints)
//! - **Mime ranker** (`core::relevance`): weighted first-match regex rules
//!   elect the authoritative mime from the candidate set
//! - **API** (`api`): axum server translating JSON requests into dispatcher
//!   calls, with URL resolution and scoped download staging

#![deny(unsafe_code)]

pub mod actions;
pub mod api;
pub mod core;
pub mod error;
pub mod mapper;
pub mod sftp;
pub mod types;
pub mod util;

pub use error::{MerkmalError, Result};
pub use types::IndexResult;

pub use crate::core::config::{MerkmalConfig, MimeWeightRule};
pub use crate::core::dispatcher::ActionDispatcher;
pub use crate::core::init::build_dispatcher;
pub use crate::core::relevance::MimeRelevance;
pub use crate::core::sniff::{clear_mime, detect_content_type};

pub use actions::{Action, Capabilities};
pub use mapper::FileMapper;
pub use sftp::SftpTransport;
pub use util::index_with_copy;
