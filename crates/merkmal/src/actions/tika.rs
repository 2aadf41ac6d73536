//! Content-extractor wrapper (Apache Tika protocol).
//!
//! Uploads the stream to a remote extraction server via HTTP PUT and reads
//! back a JSON metadata report. The server replies with a single object for
//! one document and an array for containers; a single object is normalised
//! into a one-element array before parsing. The reply's `Content-Type`
//! field becomes a mime candidate and, for the fulltext variant, a
//! configured field carries the extracted text.
//!
//! Two instances are usually registered: `tika` (metadata endpoint) and
//! `fulltext` (text endpoint with a content field).

use crate::actions::{Action, ActionReader, Capabilities};
use crate::error::{MerkmalError, Result};
use crate::types::IndexResult;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;

pub struct ActionTika {
    name: String,
    url: String,
    timeout: Duration,
    mime_regexp: Regex,
    mime_not_regexp: Option<Regex>,
    content_field: Option<String>,
    caps: Capabilities,
    client: reqwest::Client,
}

impl ActionTika {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
        mime_regexp: &str,
        mime_not_regexp: &str,
        content_field: Option<String>,
        online: bool,
        insecure_cert: bool,
    ) -> Result<Self> {
        let mut caps = Capabilities::FILE_HEAD | Capabilities::STREAM;
        if online {
            caps = caps | Capabilities::ALL_PROTO;
        }
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                MerkmalError::validation_with_source(
                    format!("invalid mime pattern '{pattern}'"),
                    e,
                )
            })
        };
        let mime_not_regexp = if mime_not_regexp.is_empty() {
            None
        } else {
            Some(compile(mime_not_regexp)?)
        };
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure_cert)
            .build()?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            timeout,
            mime_regexp: compile(mime_regexp)?,
            mime_not_regexp,
            content_field,
            caps,
            client,
        })
    }

    fn result_from_reply(&self, body: &[u8]) -> Result<IndexResult> {
        // one document comes back as a bare object, containers as an array
        let normalized: Vec<u8> = if body.first() == Some(&b'{') {
            let mut wrapped = Vec::with_capacity(body.len() + 2);
            wrapped.push(b'[');
            wrapped.extend_from_slice(body);
            wrapped.push(b']');
            wrapped
        } else {
            body.to_vec()
        };
        let meta: Vec<serde_json::Map<String, Value>> = serde_json::from_slice(&normalized)?;

        let mut result = IndexResult::new();
        if let Some(first) = meta.first() {
            if let Some(Value::String(mime)) = first.get("Content-Type") {
                result.mimetypes.push(mime.clone());
            }
        }
        if let Some(field) = &self.content_field {
            let content: Vec<&str> = meta
                .iter()
                .filter_map(|m| m.get(field.as_str()).and_then(Value::as_str))
                .collect();
            result.metadata.insert(
                self.name.clone(),
                serde_json::json!({
                    "meta": meta,
                    "content": content.join("\n"),
                }),
            );
        } else {
            result
                .metadata
                .insert(self.name.clone(), serde_json::to_value(&meta)?);
        }
        Ok(result)
    }
}

#[async_trait]
impl Action for ActionTika {
    fn name(&self) -> &str {
        &self.name
    }

    fn caps(&self) -> Capabilities {
        self.caps
    }

    fn weight(&self) -> u32 {
        50
    }

    fn can_handle(&self, content_type: &str, _filename: &str) -> bool {
        if content_type.starts_with("audio/")
            || content_type.starts_with("video/")
            || content_type.starts_with("image/")
        {
            return false;
        }
        if let Some(not) = &self.mime_not_regexp {
            if not.is_match(content_type) {
                return false;
            }
        }
        self.mime_regexp.is_match(content_type)
    }

    async fn stream(
        &self,
        _content_type: &str,
        reader: ActionReader<'_>,
        _filename: &str,
    ) -> Result<IndexResult> {
        // the request body must be 'static; bridge the borrowed reader
        // through an owned duplex pipe
        let (mut feeder, body_reader) = tokio::io::duplex(64 * 1024);
        let request = self
            .client
            .put(&self.url)
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(body_reader)))
            .send();

        let feed = async {
            let _ = tokio::io::copy(reader, &mut feeder).await;
            drop(feeder);
        };
        let (_, response) = tokio::join!(feed, request);
        let response = response.map_err(|e| {
            if e.is_timeout() {
                MerkmalError::Timeout {
                    command: format!("PUT {}", self.url),
                    seconds: self.timeout.as_secs(),
                }
            } else {
                MerkmalError::http_with_source(format!("error in request to {}", self.url), e)
            }
        })?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(MerkmalError::http(format!(
                "status not ok - {} -> {}: {}",
                self.url,
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        self.result_from_reply(&body)
    }

    async fn run_file(&self, path: &Path) -> Result<IndexResult> {
        let mut file = tokio::fs::File::open(path).await?;
        self.stream("", &mut file, &path.to_string_lossy()).await
    }
}
