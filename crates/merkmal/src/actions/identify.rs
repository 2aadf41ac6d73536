//! Image probe wrapper around ImageMagick.
//!
//! Runs `convert <fmt>:- json:-` with the stream on stdin. An extension map
//! tells ImageMagick the input format when the filename hint carries one of
//! the known patterns (raw camera formats in particular cannot be sniffed);
//! a mime map does the same from the sniffed content type. The probe may
//! report several frames; the recorded geometry is the maximum over all of
//! them, page offsets included.

use crate::actions::subprocess::run_with_stdin;
use crate::actions::{Action, ActionReader, Capabilities};
use crate::error::{MerkmalError, Result};
use crate::types::IndexResult;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Builtin filename-pattern to ImageMagick-acronym hints. Config entries
/// extend this table.
const BUILTIN_EXTENSION_HINTS: &[(&str, &str)] = &[
    ("*.bmp", "bmp"),
    ("*.cr2", "cr2"),
    ("*.dng", "dng"),
    ("*.gif", "gif"),
    ("*.jp2", "jp2"),
    ("*.jpg", "jpeg"),
    ("*.jpeg", "jpeg"),
    ("*.nef", "nef"),
    ("*.pcx", "pcx"),
    ("*.png", "png"),
    ("*.psd", "psd"),
    ("*.svg", "svg"),
    ("*.tga", "tga"),
    ("*.tif", "tiff"),
    ("*.tiff", "tiff"),
    ("*.webp", "webp"),
    ("*.xcf", "xcf"),
];

static IMAGE_MIME: Lazy<Regex> = Lazy::new(|| Regex::new("^image/").expect("static pattern"));

/// Translate a `*.ext` style wildcard into an anchored regex.
fn wildcard_to_regexp(pattern: &str) -> String {
    let mut out = String::from("(?i)^");
    for part in pattern.split('*') {
        out.push_str(".*");
        out.push_str(&regex::escape(part));
    }
    // the leading split produces an empty first part; strip its ".*" anchor
    let out = out.replacen(".*", "", 1);
    format!("{out}$")
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
struct MagickGeometry {
    width: u64,
    height: u64,
    x: u64,
    y: u64,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
struct MagickImage {
    format: String,
    mime_type: String,
    geometry: Option<MagickGeometry>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
struct MagickFrame {
    version: String,
    image: Option<MagickImage>,
}

pub struct ActionIdentify {
    name: String,
    convert: String,
    timeout: Duration,
    caps: Capabilities,
    extension_map: Vec<(Regex, String)>,
    mime_map: HashMap<String, String>,
}

impl ActionIdentify {
    pub fn new(
        name: impl Into<String>,
        convert: impl Into<String>,
        timeout: Duration,
        online: bool,
        extra_mime_map: HashMap<String, String>,
    ) -> Result<Self> {
        let mut caps = Capabilities::FILE_HEAD | Capabilities::STREAM;
        if online {
            caps = caps | Capabilities::ALL_PROTO;
        }

        let mut extension_map = Vec::with_capacity(BUILTIN_EXTENSION_HINTS.len());
        let mut mime_map: HashMap<String, String> = HashMap::new();
        for (pattern, acronym) in BUILTIN_EXTENSION_HINTS {
            let re = Regex::new(&wildcard_to_regexp(pattern)).map_err(|e| {
                MerkmalError::validation_with_source(
                    format!("invalid extension pattern '{pattern}'"),
                    e,
                )
            })?;
            extension_map.push((re, acronym.to_string()));
            mime_map.insert(format!("image/{acronym}"), acronym.to_string());
        }
        mime_map.extend(extra_mime_map);

        Ok(Self {
            name: name.into(),
            convert: convert.into(),
            timeout,
            caps,
            extension_map,
            mime_map,
        })
    }

    fn input_hint(&self, content_type: &str, filename: &str) -> String {
        for (re, acronym) in &self.extension_map {
            if re.is_match(filename) {
                return format!("{acronym}:-");
            }
        }
        if let Some(acronym) = self.mime_map.get(content_type) {
            return format!("{acronym}:-");
        }
        "-".to_string()
    }

    fn result_from_report(&self, raw: &[u8]) -> Result<IndexResult> {
        let frames: Vec<MagickFrame> = serde_json::from_slice(raw)?;
        if frames.is_empty() {
            return Err(MerkmalError::Other(
                "no metadata from imagemagick found".to_string(),
            ));
        }

        let mut result = IndexResult::new();
        let mut geometries = Vec::new();
        for frame in &frames {
            let Some(image) = &frame.image else { continue };
            if !image.mime_type.is_empty() && !result.mimetypes.contains(&image.mime_type) {
                result.mimetypes.push(image.mime_type.clone());
            }
            if let Some(geometry) = &image.geometry {
                result.width = result.width.max(geometry.width + geometry.x);
                result.height = result.height.max(geometry.height + geometry.y);
                geometries.push(geometry.clone());
            }
        }

        let first = frames
            .first()
            .and_then(|f| f.image.as_ref())
            .cloned()
            .unwrap_or_default();
        result.kind = "image".to_string();
        result.subtype = first.format.clone();
        if first.format == "PDF" {
            result.kind = "text".to_string();
        }
        result.metadata.insert(
            self.name.clone(),
            serde_json::json!({
                "magick": frames.first(),
                "frames": geometries,
            }),
        );
        Ok(result)
    }
}

#[async_trait]
impl Action for ActionIdentify {
    fn name(&self) -> &str {
        &self.name
    }

    fn caps(&self) -> Capabilities {
        self.caps
    }

    fn weight(&self) -> u32 {
        50
    }

    fn can_handle(&self, content_type: &str, filename: &str) -> bool {
        if IMAGE_MIME.is_match(content_type) {
            return true;
        }
        self.extension_map.iter().any(|(re, _)| re.is_match(filename))
    }

    async fn stream(
        &self,
        content_type: &str,
        reader: ActionReader<'_>,
        filename: &str,
    ) -> Result<IndexResult> {
        let infile = self.input_hint(content_type, filename);
        let stdout = run_with_stdin(
            &self.convert,
            &[infile.as_str(), "json:-"],
            reader,
            self.timeout,
        )
        .await?;
        self.result_from_report(&stdout)
    }

    async fn run_file(&self, path: &Path) -> Result<IndexResult> {
        let mut file = tokio::fs::File::open(path).await?;
        self.stream("", &mut file, &path.to_string_lossy()).await
    }
}
