//! Configuration loading and defaults.
//!
//! One declarative [`MerkmalConfig`] drives the whole service: download
//! staging behaviour, the mime-relevance rules, the `file://` alias map and
//! one table per probe action with an `enabled` toggle. It can be loaded
//! from a TOML file, discovered in the directory hierarchy, or built
//! programmatically; all fields carry serde defaults so a partial file is
//! valid.

use crate::actions::{Capabilities, DigestAlgorithm, ExternalCallType, MediaMimeRule, XmlFormatRule};
use crate::error::{MerkmalError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// One mime-relevance rule; the array order in the config file is the rule
/// order.
#[derive(Debug, Clone, Deserialize)]
pub struct MimeWeightRule {
    pub regexp: String,
    pub weight: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    pub enabled: bool,
    /// Path of the serialized signature database.
    pub signature_file: String,
    /// PRONOM id to supplementary mime candidates.
    pub mime_map: HashMap<String, String>,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            signature_file: String::new(),
            mime_map: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct XmlActionConfig {
    pub enabled: bool,
    /// Element name to classification rule.
    pub format: HashMap<String, XmlFormatRule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChecksumConfig {
    pub enabled: bool,
    pub name: String,
    pub digest: Vec<DigestAlgorithm>,
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "checksum".to_string(),
            digest: vec![DigestAlgorithm::Sha512],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FfprobeConfig {
    pub enabled: bool,
    pub ffprobe: String,
    /// Seconds.
    pub timeout: u64,
    /// Also accept direct http(s) URLs.
    pub online: bool,
    pub mime: Vec<MediaMimeRule>,
}

impl Default for FfprobeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ffprobe: "ffprobe".to_string(),
            timeout: 25,
            online: false,
            mime: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentifyConfig {
    pub enabled: bool,
    pub convert: String,
    /// Seconds.
    pub timeout: u64,
    pub online: bool,
    /// Content type to ImageMagick format acronym, extends the builtin map.
    pub mime_map: HashMap<String, String>,
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            convert: "convert".to_string(),
            timeout: 480,
            online: false,
            mime_map: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TikaConfig {
    pub enabled: bool,
    pub address_meta: String,
    pub address_fulltext: String,
    /// Seconds.
    pub timeout: u64,
    pub regexp_mime_meta: String,
    pub regexp_mime_meta_not: String,
    pub regexp_mime_fulltext: String,
    pub regexp_mime_fulltext_not: String,
    /// JSON field of the fulltext reply carrying the extracted text.
    pub content_field: String,
    pub online: bool,
}

impl Default for TikaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address_meta: "http://localhost:9998/meta".to_string(),
            address_fulltext: "http://localhost:9998/tika".to_string(),
            timeout: 10,
            regexp_mime_meta: String::new(),
            regexp_mime_meta_not: String::new(),
            regexp_mime_fulltext: String::new(),
            regexp_mime_fulltext_not: String::new(),
            content_field: "X-TIKA:content".to_string(),
            online: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClamavConfig {
    pub enabled: bool,
    pub clamscan: String,
    /// Seconds.
    pub timeout: u64,
}

impl Default for ClamavConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            clamscan: "clamscan".to_string(),
            timeout: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExternalActionConfig {
    pub name: String,
    pub address: String,
    /// Applicability regex over the elected mime.
    pub mimetype: String,
    pub capabilities: Vec<Capabilities>,
    pub call_type: ExternalCallType,
    /// Seconds.
    pub timeout: u64,
}

impl Default for ExternalActionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: String::new(),
            mimetype: ".*".to_string(),
            capabilities: vec![Capabilities::LOCAL_FILE],
            call_type: ExternalCallType::Url,
            timeout: 10,
        }
    }
}

/// SFTP collaborator settings. The transport itself is external; only the
/// credential surface lives here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SftpConfig {
    pub knownhosts: String,
    pub password: String,
    pub private_key: Vec<String>,
}

impl SftpConfig {
    /// The effective password; `SFTP_PASSWORD` overrides the configured one.
    pub fn password(&self) -> String {
        std::env::var("SFTP_PASSWORD").unwrap_or_else(|_| self.password.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MerkmalConfig {
    /// Staging directory for downloads; empty means the system temp dir.
    pub temp_dir: String,
    /// Seconds, bounds HEAD and ranged GET requests.
    pub header_timeout: u64,
    /// Prefix length for partial downloads.
    pub header_size: u64,
    /// Mimes matching this regex are downloaded in full. The empty default
    /// matches everything.
    pub forcedownload: String,
    /// Hard cap on a full download.
    pub max_download_size: u64,
    /// Skip certificate verification on outbound HTTPS.
    pub insecure_cert: bool,
    pub mime_relevance: Vec<MimeWeightRule>,
    /// `file://` host alias to folder.
    pub file_map: HashMap<String, String>,
    pub signature: SignatureConfig,
    pub xml: XmlActionConfig,
    pub checksum: ChecksumConfig,
    pub ffprobe: FfprobeConfig,
    pub identify: IdentifyConfig,
    pub tika: TikaConfig,
    pub clamav: ClamavConfig,
    pub external: Vec<ExternalActionConfig>,
    pub sftp: SftpConfig,
}

fn default_mime_relevance() -> Vec<MimeWeightRule> {
    let rules = [
        ("^application/octet-stream$", 1),
        ("^text/plain$", 9),
        ("^application/xml$", 20),
        ("^text/xml$", 20),
        ("^audio/", 60),
        ("^video/", 60),
        ("^image/", 60),
        ("^application/pdf$", 70),
        ("\\+xml$", 80),
    ];
    rules
        .iter()
        .map(|(regexp, weight)| MimeWeightRule {
            regexp: regexp.to_string(),
            weight: *weight,
        })
        .collect()
}

impl Default for MerkmalConfig {
    fn default() -> Self {
        Self {
            temp_dir: String::new(),
            header_timeout: 20,
            header_size: 4096,
            forcedownload: String::new(),
            max_download_size: 1 << 30,
            insecure_cert: false,
            mime_relevance: default_mime_relevance(),
            file_map: HashMap::new(),
            signature: SignatureConfig::default(),
            xml: XmlActionConfig::default(),
            checksum: ChecksumConfig::default(),
            ffprobe: FfprobeConfig::default(),
            identify: IdentifyConfig::default(),
            tika: TikaConfig::default(),
            clamav: ClamavConfig::default(),
            external: Vec::new(),
            sftp: SftpConfig::default(),
        }
    }
}

impl MerkmalConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content).map_err(|e| {
            MerkmalError::validation_with_source(
                format!("cannot parse config file {}", path.as_ref().display()),
                e,
            )
        })
    }

    /// Search `merkmal.toml` in the current directory and its ancestors.
    pub fn discover() -> Result<Option<Self>> {
        let mut dir = std::env::current_dir()?;
        loop {
            let candidate = dir.join("merkmal.toml");
            if candidate.is_file() {
                return Ok(Some(Self::from_toml_file(candidate)?));
            }
            if !dir.pop() {
                return Ok(None);
            }
        }
    }

    pub fn header_timeout(&self) -> Duration {
        Duration::from_secs(self.header_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = MerkmalConfig::default();
        assert_eq!(config.header_timeout, 20);
        assert!(config.checksum.enabled);
        assert_eq!(config.checksum.digest, vec![DigestAlgorithm::Sha512]);
        assert!(!config.signature.enabled);
        assert!(!config.mime_relevance.is_empty());
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("merkmal.toml");
        fs::write(
            &config_path,
            r#"
header_size = 8192
forcedownload = "^application/pdf$"
insecure_cert = true

[[mime_relevance]]
regexp = "^application/octet-stream$"
weight = 1

[[mime_relevance]]
regexp = "mods"
weight = 90

[file_map]
media = "/srv/media"

[signature]
enabled = true
signature_file = "/etc/merkmal/signatures.json"

[signature.mime_map]
"fmt/43" = "image/jpeg"

[xml]
enabled = true

[xml.format.mods]
regexp = true
type = "text"
subtype = "mods"
mime = "application/mods+xml"

[xml.format.mods.attributes]
xmlns = ".*mods.*"

[checksum]
digest = ["sha256", "sha512"]

[ffprobe]
enabled = true
timeout = 30

[[ffprobe.mime]]
video = true
audio = true
format = "mov,mp4,m4a,3gp,3g2,mj2"
mime = "video/mp4"

[[external]]
name = "mediaserver"
address = "http://localhost:8088/probe/[[PATH]]"
mimetype = "^image/"
capabilities = ["file"]
call_type = "url"
        "#,
        )
        .unwrap();

        let config = MerkmalConfig::from_toml_file(&config_path).unwrap();
        assert_eq!(config.header_size, 8192);
        assert!(config.insecure_cert);
        assert_eq!(config.mime_relevance.len(), 2);
        assert_eq!(config.mime_relevance[1].weight, 90);
        assert_eq!(config.file_map["media"], "/srv/media");
        assert!(config.signature.enabled);
        assert_eq!(config.signature.mime_map["fmt/43"], "image/jpeg");
        let mods = &config.xml.format["mods"];
        assert!(mods.regexp);
        assert_eq!(mods.mime, "application/mods+xml");
        assert_eq!(
            config.checksum.digest,
            vec![DigestAlgorithm::Sha256, DigestAlgorithm::Sha512]
        );
        assert_eq!(config.ffprobe.timeout, 30);
        assert_eq!(config.ffprobe.mime[0].mime, "video/mp4");
        assert_eq!(config.external[0].capabilities, vec![Capabilities::LOCAL_FILE]);
        // untouched sections keep their defaults
        assert_eq!(config.tika.timeout, 10);
    }

    #[test]
    fn test_malformed_file_is_validation_error() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("merkmal.toml");
        fs::write(&config_path, "header_size = \"many\"").unwrap();
        assert!(matches!(
            MerkmalConfig::from_toml_file(&config_path),
            Err(MerkmalError::Validation { .. })
        ));
    }

    #[test]
    fn test_sftp_password_falls_back_to_config() {
        let sftp = SftpConfig {
            password: "secret".to_string(),
            ..Default::default()
        };
        if std::env::var("SFTP_PASSWORD").is_err() {
            assert_eq!(sftp.password(), "secret");
        }
    }
}
