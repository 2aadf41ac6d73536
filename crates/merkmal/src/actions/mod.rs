//! The uniform probe-action contract.
//!
//! An action is a named probe that produces a partial [`IndexResult`] from a
//! byte stream plus hints. Actions are constructed once from configuration,
//! registered with the dispatcher, and never mutated afterwards; every call
//! is stateless. They must not share mutable state with each other.
//!
//! Capability flags describe which input forms an action accepts. The
//! dispatcher's streaming path only considers [`Capabilities::STREAM`]
//! actions; the ingestion server additionally routes URL- and file-bound
//! actions through [`Action::run_url`] / [`Action::run_file`].

use crate::error::{MerkmalError, Result};
use crate::types::IndexResult;
use async_trait::async_trait;
use serde::Deserialize;
use std::ops::{BitAnd, BitOr};
use std::path::Path;
use tokio::io::AsyncRead;
use url::Url;

mod checksum;
mod clamav;
mod external;
mod ffprobe;
mod identify;
mod signature;
mod subprocess;
mod tika;
mod xml;

pub use checksum::{ActionChecksum, DigestAlgorithm, DigestSet};
pub use clamav::ActionClamav;
pub use external::{ActionExternal, ExternalCallType};
pub use ffprobe::{ActionFfprobe, MediaMimeRule, parse_clock_duration};
pub use identify::ActionIdentify;
pub use signature::{ActionSignature, SignatureDb, SignatureEntry};
pub use tika::ActionTika;
pub use xml::{ActionXml, XmlFormatRule};

/// Bitset of input forms an action can work with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    /// Needs a local file path.
    pub const LOCAL_FILE: Capabilities = Capabilities(1);
    /// Accepts an `http://` URL directly.
    pub const HTTP: Capabilities = Capabilities(1 << 1);
    /// Accepts an `https://` URL directly.
    pub const HTTPS: Capabilities = Capabilities(1 << 2);
    /// Meaningful results from a header prefix alone.
    pub const HEAD_ONLY: Capabilities = Capabilities(1 << 3);
    /// Can consume a non-seekable byte stream in one pass.
    pub const STREAM: Capabilities = Capabilities(1 << 4);

    pub const WEB: Capabilities = Capabilities(Self::HTTP.0 | Self::HTTPS.0);
    pub const ALL_PROTO: Capabilities = Capabilities(Self::LOCAL_FILE.0 | Self::WEB.0);
    pub const FILE_HEAD: Capabilities = Capabilities(Self::LOCAL_FILE.0 | Self::HEAD_ONLY.0);

    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Capabilities) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether the action can be fed a URL of the given scheme without a
    /// local copy.
    pub fn accepts_scheme(self, scheme: &str) -> bool {
        match scheme {
            "file" => self.contains(Self::LOCAL_FILE),
            "http" => self.contains(Self::HTTP),
            "https" => self.contains(Self::HTTPS),
            _ => false,
        }
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;
    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

impl BitAnd for Capabilities {
    type Output = Capabilities;
    fn bitand(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 & rhs.0)
    }
}

impl<'de> Deserialize<'de> for Capabilities {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        match name.as_str() {
            "file" => Ok(Capabilities::LOCAL_FILE),
            "http" => Ok(Capabilities::HTTP),
            "https" => Ok(Capabilities::HTTPS),
            "head" => Ok(Capabilities::HEAD_ONLY),
            "stream" => Ok(Capabilities::STREAM),
            other => Err(serde::de::Error::custom(format!(
                "invalid action capability '{other}'"
            ))),
        }
    }
}

/// Non-seekable byte source handed to streaming actions.
pub type ActionReader<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// A named probe producing a partial [`IndexResult`].
#[async_trait]
pub trait Action: Send + Sync {
    /// Unique key within a dispatcher.
    fn name(&self) -> &str;

    fn caps(&self) -> Capabilities;

    /// Ordering hint for sequential phases; lower runs earlier.
    fn weight(&self) -> u32 {
        50
    }

    /// Applicability predicate. A `false` here is a silent skip, never an
    /// error.
    fn can_handle(&self, content_type: &str, filename: &str) -> bool;

    /// Consume the stream once, front to back, and report findings.
    ///
    /// `content_type` is the sniffed hint, `filename` the first caller hint
    /// (possibly empty). The action may stop reading early; the dispatcher
    /// drains the remainder.
    async fn stream(
        &self,
        content_type: &str,
        reader: ActionReader<'_>,
        filename: &str,
    ) -> Result<IndexResult>;

    /// Probe a local file. Default for stream-only actions: unsupported.
    async fn run_file(&self, path: &Path) -> Result<IndexResult> {
        let _ = path;
        Err(MerkmalError::Other(format!(
            "action '{}' cannot run on a local file",
            self.name()
        )))
    }

    /// Probe via the original URL without a local copy. Only URL-capable
    /// actions override this.
    async fn run_url(&self, url: &Url, content_type: &str) -> Result<IndexResult> {
        let _ = (url, content_type);
        Err(MerkmalError::Other(format!(
            "action '{}' cannot run on a url",
            self.name()
        )))
    }
}

/// Lowercased extension of a filename hint, without the dot.
pub(crate) fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}
