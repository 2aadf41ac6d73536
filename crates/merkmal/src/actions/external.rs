//! Configured external probe endpoints.
//!
//! An external action substitutes the resolved file path into a URL
//! template (`[[PATH]]` placeholder), performs a GET and stores the parsed
//! JSON reply as opaque metadata. It never consumes the stream; the
//! dispatcher's streaming path skips it and the ingestion server routes it
//! a URL instead.

use crate::actions::{Action, ActionReader, Capabilities};
use crate::error::{MerkmalError, Result};
use crate::mapper::FileMapper;
use crate::types::IndexResult;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// How the remote endpoint is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExternalCallType {
    /// URL template with a `[[PATH]]` placeholder for the full path.
    #[default]
    Url,
    /// Reserved: POST a JSON description of the object.
    JsonPost,
}

pub struct ActionExternal {
    name: String,
    url: String,
    capability: Capabilities,
    call_type: ExternalCallType,
    mimetype: Regex,
    mapper: Arc<FileMapper>,
    client: reqwest::Client,
    timeout: Duration,
}

impl ActionExternal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        capability: Capabilities,
        call_type: ExternalCallType,
        mimetype: &str,
        timeout: Duration,
        mapper: Arc<FileMapper>,
        insecure_cert: bool,
    ) -> Result<Self> {
        let mimetype = Regex::new(mimetype).map_err(|e| {
            MerkmalError::validation_with_source(format!("invalid mime pattern '{mimetype}'"), e)
        })?;
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure_cert)
            .build()?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            capability,
            call_type,
            mimetype,
            mapper,
            client,
            timeout,
        })
    }

    fn substituted_url(&self, uri: &Url) -> Result<String> {
        let filename = self.mapper.resolve(uri)?;
        let path = filename.to_string_lossy().replace('\\', "/");
        let escaped: String = path
            .bytes()
            .map(|b| match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                    (b as char).to_string()
                }
                other => format!("%{other:02X}"),
            })
            .collect();
        Ok(self.url.replace("[[PATH]]", &escaped))
    }
}

#[async_trait]
impl Action for ActionExternal {
    fn name(&self) -> &str {
        &self.name
    }

    fn caps(&self) -> Capabilities {
        self.capability
    }

    fn weight(&self) -> u32 {
        100
    }

    fn can_handle(&self, content_type: &str, _filename: &str) -> bool {
        self.mimetype.is_match(content_type)
    }

    async fn stream(
        &self,
        _content_type: &str,
        _reader: ActionReader<'_>,
        _filename: &str,
    ) -> Result<IndexResult> {
        Err(MerkmalError::Other(
            "external actions do not support streaming".to_string(),
        ))
    }

    async fn run_url(&self, uri: &Url, content_type: &str) -> Result<IndexResult> {
        if !self.capability.accepts_scheme(uri.scheme()) {
            return Err(MerkmalError::validation(format!(
                "invalid capability for {} url scheme",
                uri.scheme()
            )));
        }
        if !self.mimetype.is_match(content_type) {
            return Err(MerkmalError::NotApplicable);
        }

        let urlstring = match self.call_type {
            ExternalCallType::Url => self.substituted_url(uri)?,
            ExternalCallType::JsonPost => {
                return Err(MerkmalError::Other(
                    "jsonpost call type not implemented".to_string(),
                ));
            }
        };

        let response = self
            .client
            .get(&urlstring)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                MerkmalError::http_with_source(format!("cannot query {} - {urlstring}", self.name), e)
            })?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(MerkmalError::http(format!(
                "status not ok - {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }

        let value: serde_json::Value = serde_json::from_slice(&body)?;
        let mut result = IndexResult::new();
        result.metadata.insert(self.name.clone(), value);
        Ok(result)
    }
}
