//! Format-signature identification (PRONOM).
//!
//! The signature database is treated as an opaque classifier: it is loaded
//! once at construction from serialized bytes and queried per stream. Each
//! entry carries the PRONOM identifier and mime of a format plus one or
//! more magic-byte patterns anchored at fixed offsets. Identification runs
//! against a bounded head window of the stream; the remainder is left to
//! the dispatcher to drain.

use crate::actions::{Action, ActionReader, Capabilities};
use crate::error::{MerkmalError, Result};
use crate::types::IndexResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Bytes of the stream head considered during identification.
const HEAD_WINDOW: usize = 128 * 1024;

/// One magic-byte pattern anchored at a fixed offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignaturePattern {
    #[serde(default)]
    pub offset: usize,
    /// Hex-encoded byte sequence.
    pub hex: String,
}

/// One format entry of the signature database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub name: String,
    pub pronom: String,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub signatures: Vec<SignaturePattern>,
}

#[derive(Debug, Clone, Serialize)]
struct SignatureMatch<'a> {
    id: &'a str,
    format: &'a str,
    mime: &'a str,
}

/// Opaque signature database: a list of entries with pre-decoded patterns.
pub struct SignatureDb {
    entries: Vec<SignatureEntry>,
    decoded: Vec<Vec<(usize, Vec<u8>)>>,
}

impl SignatureDb {
    /// Load from serialized database bytes.
    pub fn load(data: &[u8]) -> Result<Self> {
        let entries: Vec<SignatureEntry> = serde_json::from_slice(data).map_err(|e| {
            MerkmalError::validation_with_source("cannot parse signature database", e)
        })?;
        let mut decoded = Vec::with_capacity(entries.len());
        for entry in &entries {
            let mut patterns = Vec::with_capacity(entry.signatures.len());
            for pattern in &entry.signatures {
                let bytes = decode_hex(&pattern.hex).ok_or_else(|| {
                    MerkmalError::validation(format!(
                        "invalid hex pattern '{}' for {}",
                        pattern.hex, entry.pronom
                    ))
                })?;
                patterns.push((pattern.offset, bytes));
            }
            decoded.push(patterns);
        }
        Ok(Self { entries, decoded })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries whose every pattern matches at its offset.
    pub fn identify(&self, head: &[u8]) -> Vec<&SignatureEntry> {
        self.entries
            .iter()
            .zip(self.decoded.iter())
            .filter(|(_, patterns)| {
                !patterns.is_empty()
                    && patterns.iter().all(|(offset, bytes)| {
                        head.len() >= offset + bytes.len()
                            && &head[*offset..offset + bytes.len()] == bytes.as_slice()
                    })
            })
            .map(|(entry, _)| entry)
            .collect()
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    hex::decode(s.trim()).ok()
}

/// Signature-matching action; registered under the name `siegfried`.
pub struct ActionSignature {
    name: String,
    db: SignatureDb,
    /// PRONOM id to supplementary mime candidates.
    pronom_mime_map: HashMap<String, String>,
}

impl ActionSignature {
    pub fn new(
        name: impl Into<String>,
        signature_data: &[u8],
        pronom_mime_map: HashMap<String, String>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            db: SignatureDb::load(signature_data)?,
            pronom_mime_map,
        })
    }

    fn result_from_matches(&self, matches: Vec<&SignatureEntry>) -> Result<IndexResult> {
        let mut result = IndexResult::new();
        let mut reported: Vec<SignatureMatch<'_>> = Vec::with_capacity(matches.len());
        for entry in matches {
            if !entry.mime.is_empty() && !result.mimetypes.contains(&entry.mime) {
                result.mimetypes.push(entry.mime.clone());
            }
            if !result.pronoms.contains(&entry.pronom) {
                result.pronoms.push(entry.pronom.clone());
            }
            if let Some(extra) = self.pronom_mime_map.get(&entry.pronom) {
                if !result.mimetypes.contains(extra) {
                    result.mimetypes.push(extra.clone());
                }
            }
            reported.push(SignatureMatch {
                id: &entry.pronom,
                format: &entry.name,
                mime: &entry.mime,
            });
        }
        result
            .metadata
            .insert(self.name.clone(), serde_json::to_value(&reported)?);
        Ok(result)
    }
}

#[async_trait]
impl Action for ActionSignature {
    fn name(&self) -> &str {
        &self.name
    }

    fn caps(&self) -> Capabilities {
        Capabilities::FILE_HEAD | Capabilities::STREAM
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
        let mut head = Vec::with_capacity(8 * 1024);
        let mut buf = [0u8; 8 * 1024];
        while head.len() < HEAD_WINDOW {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let take = n.min(HEAD_WINDOW - head.len());
            head.extend_from_slice(&buf[..take]);
            if take < n {
                break;
            }
        }
        self.result_from_matches(self.db.identify(&head))
    }

    async fn run_file(&self, path: &Path) -> Result<IndexResult> {
        let mut file = tokio::fs::File::open(path).await?;
        self.stream("", &mut file, &path.to_string_lossy()).await
    }
}
