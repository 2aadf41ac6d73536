//! Streaming digest action.
//!
//! Computes a configured set of digests in a single pass over the stream
//! and reports them both in the dedicated `checksums` field and under the
//! action's metadata key.

use crate::actions::{Action, ActionReader, Capabilities};
use crate::error::{MerkmalError, Result};
use crate::types::IndexResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tokio::io::AsyncReadExt;

const CHUNK_SIZE: usize = 64 * 1024;

/// Digest algorithms supported by [`ActionChecksum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
    Blake3,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
            DigestAlgorithm::Blake3 => "blake3",
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = MerkmalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(DigestAlgorithm::Sha512),
            "blake3" => Ok(DigestAlgorithm::Blake3),
            other => Err(MerkmalError::validation(format!(
                "unknown digest algorithm '{other}'"
            ))),
        }
    }
}

enum DigestState {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl DigestState {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha256 => DigestState::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => DigestState::Sha512(Sha512::new()),
            DigestAlgorithm::Blake3 => DigestState::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            DigestState::Sha256(h) => h.update(data),
            DigestState::Sha512(h) => h.update(data),
            DigestState::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            DigestState::Sha256(h) => hex::encode(h.finalize()),
            DigestState::Sha512(h) => hex::encode(h.finalize()),
            DigestState::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// A set of running digests fed from one pass over the bytes.
pub struct DigestSet {
    states: Vec<(DigestAlgorithm, DigestState)>,
}

impl DigestSet {
    pub fn new(algorithms: &[DigestAlgorithm]) -> Self {
        Self {
            states: algorithms
                .iter()
                .map(|&alg| (alg, DigestState::new(alg)))
                .collect(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        for (_, state) in self.states.iter_mut() {
            state.update(data);
        }
    }

    /// Algorithm name to lowercase hex.
    pub fn finalize(self) -> HashMap<String, String> {
        self.states
            .into_iter()
            .map(|(alg, state)| (alg.as_str().to_string(), state.finalize_hex()))
            .collect()
    }
}

/// Streaming hasher over a configured digest set.
pub struct ActionChecksum {
    name: String,
    digests: Vec<DigestAlgorithm>,
}

impl ActionChecksum {
    pub fn new(name: impl Into<String>, digests: Vec<DigestAlgorithm>) -> Self {
        Self {
            name: name.into(),
            digests,
        }
    }

    async fn digest_reader(&self, reader: ActionReader<'_>) -> Result<HashMap<String, String>> {
        let mut digests = DigestSet::new(&self.digests);
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            digests.update(&buf[..n]);
        }
        Ok(digests.finalize())
    }
}

#[async_trait]
impl Action for ActionChecksum {
    fn name(&self) -> &str {
        &self.name
    }

    fn caps(&self) -> Capabilities {
        Capabilities::STREAM
    }

    fn weight(&self) -> u32 {
        10
    }

    fn can_handle(&self, _content_type: &str, _filename: &str) -> bool {
        true
    }

    async fn stream(
        &self,
        _content_type: &str,
        reader: ActionReader<'_>,
        _filename: &str,
    ) -> Result<IndexResult> {
        let checksums = self.digest_reader(reader).await?;
        let mut result = IndexResult::new();
        result.metadata.insert(
            self.name.clone(),
            serde_json::to_value(&checksums)?,
        );
        result.checksums = checksums;
        Ok(result)
    }

    async fn run_file(&self, path: &Path) -> Result<IndexResult> {
        let mut file = tokio::fs::File::open(path).await?;
        self.stream("", &mut file, &path.to_string_lossy()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_known_vectors() {
        let action = ActionChecksum::new(
            "checksum",
            vec![
                DigestAlgorithm::Sha256,
                DigestAlgorithm::Sha512,
                DigestAlgorithm::Blake3,
            ],
        );
        let mut data: &[u8] = b"abc";
        let result = action.stream("", &mut data, "abc.txt").await.unwrap();

        assert_eq!(
            result.checksums["sha256"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            result.checksums["sha512"],
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
        assert_eq!(result.checksums.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let action = ActionChecksum::new("checksum", vec![DigestAlgorithm::Sha256, DigestAlgorithm::Blake3]);
        let mut data: &[u8] = b"";
        let result = action.stream("", &mut data, "").await.unwrap();
        assert_eq!(
            result.checksums["sha256"],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            result.checksums["blake3"],
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[tokio::test]
    async fn test_metadata_mirrors_checksums() {
        let action = ActionChecksum::new("checksum", vec![DigestAlgorithm::Sha256]);
        let mut data: &[u8] = b"payload";
        let result = action.stream("", &mut data, "").await.unwrap();
        let meta = result.metadata.get("checksum").unwrap();
        assert_eq!(
            meta.get("sha256").unwrap().as_str().unwrap(),
            result.checksums["sha256"]
        );
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(
            DigestAlgorithm::from_str("SHA-512").unwrap(),
            DigestAlgorithm::Sha512
        );
        assert_eq!(
            DigestAlgorithm::from_str("blake3").unwrap(),
            DigestAlgorithm::Blake3
        );
        assert!(DigestAlgorithm::from_str("md5").is_err());
    }
}
