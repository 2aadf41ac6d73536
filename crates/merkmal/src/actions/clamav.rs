//! Virus-scan action wrapping `clamscan`.
//!
//! Needs the complete object on disk, so it is file-only: the dispatcher's
//! streaming path skips it and the server refuses to run it on a header
//! prefix. The scanner's `key: value` report lines become the action
//! metadata.

use crate::actions::{Action, ActionReader, Capabilities};
use crate::error::{MerkmalError, Result};
use crate::mapper::FileMapper;
use crate::types::IndexResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use url::Url;

pub struct ActionClamav {
    name: String,
    clamscan: String,
    timeout: Duration,
    mapper: Arc<FileMapper>,
}

impl ActionClamav {
    pub fn new(clamscan: impl Into<String>, timeout: Duration, mapper: Arc<FileMapper>) -> Self {
        Self {
            name: "clamav".to_string(),
            clamscan: clamscan.into(),
            timeout,
            mapper,
        }
    }
}

#[async_trait]
impl Action for ActionClamav {
    fn name(&self) -> &str {
        &self.name
    }

    fn caps(&self) -> Capabilities {
        Capabilities::LOCAL_FILE
    }

    fn weight(&self) -> u32 {
        100
    }

    fn can_handle(&self, _content_type: &str, _filename: &str) -> bool {
        true
    }

    async fn stream(
        &self,
        _content_type: &str,
        _reader: ActionReader<'_>,
        _filename: &str,
    ) -> Result<IndexResult> {
        Err(MerkmalError::Other(
            "clamav does not support streaming".to_string(),
        ))
    }

    async fn run_file(&self, path: &Path) -> Result<IndexResult> {
        let command_line = format!("{} --no-summary {}", self.clamscan, path.display());
        let child = Command::new(&self.clamscan)
            .arg("--no-summary")
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MerkmalError::MissingDependency(format!(
                    "cannot execute '{}': {e}",
                    self.clamscan
                ))
            })?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(MerkmalError::internal_with_source(
                    format!("cannot wait for '{command_line}'"),
                    e,
                ));
            }
            Err(_) => {
                return Err(MerkmalError::Timeout {
                    command: command_line,
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        // clamscan exits 1 when it finds something; the report still parses
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut report: HashMap<String, String> = HashMap::new();
        for line in stdout.lines() {
            if let Some((key, value)) = line.rsplit_once(':') {
                report.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        if report.is_empty() && !output.status.success() {
            return Err(MerkmalError::Other(format!(
                "'{command_line}' failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut result = IndexResult::new();
        result
            .metadata
            .insert(self.name.clone(), serde_json::to_value(&report)?);
        Ok(result)
    }

    async fn run_url(&self, url: &Url, _content_type: &str) -> Result<IndexResult> {
        let path = self.mapper.resolve(url)?;
        self.run_file(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_refused() {
        let action = ActionClamav::new("clamscan", Duration::from_secs(5), Arc::default());
        let mut data: &[u8] = b"x";
        assert!(action.stream("", &mut data, "").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let action = ActionClamav::new("merkmal-no-such-scanner", Duration::from_secs(1), Arc::default());
        let err = action.run_file(Path::new("/tmp/x")).await.unwrap_err();
        assert!(matches!(err, MerkmalError::MissingDependency(_)));
    }
}
