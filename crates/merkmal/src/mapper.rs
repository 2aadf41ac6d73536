//! Mapping of `file://` URLs onto the local filesystem.
//!
//! A `file://HOST/PATH` URL addresses a configured alias: HOST is looked up
//! (case-insensitively) in the alias-to-folder mapping and PATH, after
//! percent-decoding, is joined under the resolved folder. A URL without a
//! host resolves the decoded path as-is. On Windows the leading separator
//! left over from the URL form is stripped.

use crate::error::{MerkmalError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use url::Url;

/// Read-only filename resolver handed to actions and the ingestion server.
#[derive(Debug, Clone, Default)]
pub struct FileMapper {
    mapping: HashMap<String, String>,
}

/// Decode percent-escapes; `+` is left alone (paths, not query strings).
fn percent_decode(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s
                .get(i + 1..i + 3)
                .ok_or_else(|| MerkmalError::validation(format!("truncated escape in '{s}'")))?;
            let value = u8::from_str_radix(hex, 16).map_err(|e| {
                MerkmalError::validation_with_source(format!("invalid escape '%{hex}' in '{s}'"), e)
            })?;
            out.push(value);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|e| MerkmalError::validation_with_source(format!("non-utf8 path '{s}'"), e))
}

impl FileMapper {
    pub fn new(mapping: HashMap<String, String>) -> Self {
        let mapping = mapping
            .into_iter()
            .map(|(alias, folder)| (alias.to_ascii_lowercase(), folder))
            .collect();
        Self { mapping }
    }

    /// Resolve a `file://` URL to a local path.
    pub fn resolve(&self, uri: &Url) -> Result<PathBuf> {
        if uri.scheme() != "file" {
            return Err(MerkmalError::validation(format!(
                "cannot handle scheme {}: need file scheme",
                uri.scheme()
            )));
        }
        let mut base = String::new();
        if let Some(host) = uri.host_str() {
            if !host.is_empty() {
                base = self
                    .mapping
                    .get(&host.to_ascii_lowercase())
                    .cloned()
                    .ok_or_else(|| {
                        MerkmalError::validation(format!("no mapping for {host}"))
                    })?;
            }
        }
        let decoded = percent_decode(uri.path())?;
        let mut filename = if base.is_empty() {
            PathBuf::from(decoded)
        } else {
            Path::new(&base).join(decoded.trim_start_matches('/'))
        };
        #[cfg(windows)]
        {
            let s = filename.to_string_lossy().trim_start_matches('\\').to_string();
            filename = PathBuf::from(s);
        }
        filename = normalize(&filename);
        Ok(filename)
    }
}

/// Lexical path cleanup: resolves `.` and `..` components without touching
/// the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}
