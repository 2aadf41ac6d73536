//! The per-object result record and its merge law.
//!
//! A single [`IndexResult`] is produced for every indexed object. The
//! dispatcher creates it empty, folds the partial results of every probe
//! action into it, finalises it (mime election, size stamp, type inference)
//! and hands it to the caller. It is never mutated afterwards.
//!
//! The merge law is associative and commutative on the set-valued fields
//! (`mimetypes`, `pronoms`) and last-write-wins on scalars. Scalars are
//! re-elected after all merges, so the order in which actions happen to
//! finish never leaks into the final record.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// Merged technical metadata for one indexed object.
///
/// Wire format matches the JSON consumed by downstream preservation
/// pipelines: the checksum map serialises under `checksum`, dimensional
/// fields are omitted when zero, `errors` is omitted when empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IndexResult {
    /// Per-action failure messages. An entry here never fails the request.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub errors: HashMap<String, String>,
    /// The elected mime type; highest-ranked element of `mimetypes`.
    #[serde(default)]
    pub mimetype: String,
    /// Deduplicated mime candidates, ranked on finalisation.
    #[serde(default)]
    pub mimetypes: Vec<String>,
    /// First PRONOM identifier after deterministic sort.
    #[serde(default)]
    pub pronom: String,
    /// Deduplicated PRONOM identifiers.
    #[serde(default)]
    pub pronoms: Vec<String>,
    /// Digest-algorithm name to lowercase hex.
    #[serde(default, rename = "checksum")]
    pub checksums: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub width: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub height: u64,
    /// Whole seconds.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub duration: u64,
    /// Bytes pulled from the source stream. Authoritative, set by the
    /// dispatcher; actions must not fill it.
    #[serde(default)]
    pub size: u64,
    /// Opaque per-action payloads keyed by action name.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Coarse classification, e.g. `image`, `audio`, `text`.
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: String,
}

impl IndexResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for a named action.
    pub fn with_error(name: &str, message: impl Into<String>) -> Self {
        let mut result = Self::new();
        result.errors.insert(name.to_string(), message.into());
        result
    }

    /// Fold `other` into `self`.
    ///
    /// Set fields take the union (deduplicated, first occurrence keeps its
    /// position), map fields let `other` win on key collisions, numeric
    /// fields take the maximum, and non-empty scalars overwrite. `kind` and
    /// `subtype` travel together: a classifier that sets the type owns the
    /// subtype as well.
    pub fn merge(&mut self, other: IndexResult) {
        for mimetype in other.mimetypes {
            if !self.mimetypes.contains(&mimetype) {
                self.mimetypes.push(mimetype);
            }
        }
        for pronom in other.pronoms {
            if !self.pronoms.contains(&pronom) {
                self.pronoms.push(pronom);
            }
        }
        self.checksums.extend(other.checksums);
        if !other.mimetype.is_empty() {
            self.mimetype = other.mimetype;
        }
        if !other.pronom.is_empty() {
            self.pronom = other.pronom;
        }
        self.width = self.width.max(other.width);
        self.height = self.height.max(other.height);
        self.duration = self.duration.max(other.duration);
        self.size = self.size.max(other.size);
        self.metadata.extend(other.metadata);
        self.errors.extend(other.errors);
        if !other.kind.is_empty() {
            self.kind = other.kind;
            self.subtype = other.subtype;
        }
    }
}
