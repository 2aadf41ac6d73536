//! Media probe wrapper around `ffprobe`.
//!
//! Spawns the configured probe binary with stdin bound to the stream,
//! parses its JSON report, and extracts container format, audio/video
//! presence, duration and the largest stream geometry. A configured
//! `(audio?, video?, container-format) -> mime` table contributes a mime
//! candidate; the full report lands under the action's metadata key.

use crate::actions::subprocess::run_with_stdin;
use crate::actions::{Action, ActionReader, Capabilities};
use crate::error::Result;
use crate::types::IndexResult;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Maps a probe observation to a mime candidate.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaMimeRule {
    #[serde(default)]
    pub video: bool,
    #[serde(default)]
    pub audio: bool,
    pub format: String,
    pub mime: String,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    format_name: String,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: String,
    #[serde(default)]
    width: u64,
    #[serde(default)]
    height: u64,
    #[serde(default)]
    tags: std::collections::HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeReport {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

static CLOCK_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new("^([0-9]+):([0-9]+):([0-9]+).([0-9]{2})").expect("static pattern"));

/// Parse an `HH:MM:SS.cc` clock string into a duration.
///
/// The final capture group holds centiseconds, not a repeat of the seconds
/// field.
pub fn parse_clock_duration(t: &str) -> Option<Duration> {
    let caps = CLOCK_DURATION.captures(t)?;
    let hours: u64 = caps.get(1)?.as_str().parse().ok()?;
    let mins: u64 = caps.get(2)?.as_str().parse().ok()?;
    let secs: u64 = caps.get(3)?.as_str().parse().ok()?;
    let centis: u64 = caps.get(4)?.as_str().parse().ok()?;
    Some(Duration::from_millis(
        ((hours * 3600 + mins * 60 + secs) * 1000) + centis * 10,
    ))
}

pub struct ActionFfprobe {
    name: String,
    ffprobe: String,
    timeout: Duration,
    caps: Capabilities,
    mime: Vec<MediaMimeRule>,
}

impl ActionFfprobe {
    pub fn new(
        name: impl Into<String>,
        ffprobe: impl Into<String>,
        timeout: Duration,
        online: bool,
        mime: Vec<MediaMimeRule>,
    ) -> Self {
        let mut caps = Capabilities::FILE_HEAD | Capabilities::STREAM;
        if online {
            caps = caps | Capabilities::ALL_PROTO;
        }
        Self {
            name: name.into(),
            ffprobe: ffprobe.into(),
            timeout,
            caps,
            mime,
        }
    }

    fn result_from_report(&self, raw: &[u8]) -> Result<IndexResult> {
        let report: ProbeReport = serde_json::from_slice(raw)?;
        let mut result = IndexResult::new();

        let mut duration_secs = report
            .format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .map(|d| d as u64);
        let mut has_audio = false;
        let mut has_video = false;
        for stream in &report.streams {
            if stream.width > 0 || stream.height > 0 {
                result.width = result.width.max(stream.width);
                result.height = result.height.max(stream.height);
            }
            match stream.codec_type.as_str() {
                "audio" => has_audio = true,
                "video" => has_video = true,
                _ => {}
            }
            if duration_secs.is_none() {
                duration_secs = stream
                    .tags
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("duration"))
                    .and_then(|(_, v)| parse_clock_duration(v))
                    .map(|d| d.as_secs());
            }
        }
        result.duration = duration_secs.unwrap_or(0);

        for rule in &self.mime {
            if rule.audio == has_audio
                && rule.video == has_video
                && rule.format == report.format.format_name
            {
                result.mimetypes.push(rule.mime.clone());
            }
        }

        result
            .metadata
            .insert(self.name.clone(), serde_json::from_slice(raw)?);
        Ok(result)
    }
}

#[async_trait]
impl Action for ActionFfprobe {
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
        !(content_type.starts_with("image/") || content_type == "application/pdf")
    }

    async fn stream(
        &self,
        _content_type: &str,
        reader: ActionReader<'_>,
        _filename: &str,
    ) -> Result<IndexResult> {
        let stdout = run_with_stdin(
            &self.ffprobe,
            &[
                "-i",
                "-",
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                "-show_error",
            ],
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

#[cfg(test)]
mod tests {
    use super::*;

    fn probe() -> ActionFfprobe {
        ActionFfprobe::new(
            "ffprobe",
            "ffprobe",
            Duration::from_secs(10),
            false,
            vec![
                MediaMimeRule {
                    video: true,
                    audio: true,
                    format: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
                    mime: "video/mp4".to_string(),
                },
                MediaMimeRule {
                    video: false,
                    audio: true,
                    format: "wav".to_string(),
                    mime: "audio/wav".to_string(),
                },
            ],
        )
    }

    #[test]
    fn test_parse_clock_duration_centiseconds() {
        let d = parse_clock_duration("00:01:02.50").unwrap();
        assert_eq!(d, Duration::from_millis(62_500));
        let d = parse_clock_duration("01:00:00.00").unwrap();
        assert_eq!(d.as_secs(), 3600);
        assert!(parse_clock_duration("62.5").is_none());
    }

    #[test]
    fn test_report_extraction() {
        let raw = serde_json::json!({
            "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "12.480000"},
            "streams": [
                {"codec_type": "video", "width": 1920, "height": 1080},
                {"codec_type": "audio"}
            ]
        });
        let result = probe()
            .result_from_report(serde_json::to_vec(&raw).unwrap().as_slice())
            .unwrap();
        assert_eq!(result.width, 1920);
        assert_eq!(result.height, 1080);
        assert_eq!(result.duration, 12);
        assert_eq!(result.mimetypes, vec!["video/mp4"]);
        assert!(result.metadata.contains_key("ffprobe"));
    }

    #[test]
    fn test_mime_table_requires_exact_presence() {
        // audio-only wav matches the wav rule but not the mp4 rule
        let raw = serde_json::json!({
            "format": {"format_name": "wav", "duration": "3.2"},
            "streams": [{"codec_type": "audio"}]
        });
        let result = probe()
            .result_from_report(serde_json::to_vec(&raw).unwrap().as_slice())
            .unwrap();
        assert_eq!(result.mimetypes, vec!["audio/wav"]);
        assert_eq!(result.duration, 3);
    }

    #[test]
    fn test_duration_fallback_from_stream_tags() {
        let raw = serde_json::json!({
            "format": {"format_name": "matroska,webm"},
            "streams": [
                {"codec_type": "video", "width": 640, "height": 480,
                 "tags": {"DURATION": "00:02:03.25"}}
            ]
        });
        let result = probe()
            .result_from_report(serde_json::to_vec(&raw).unwrap().as_slice())
            .unwrap();
        assert_eq!(result.duration, 123);
    }

    #[test]
    fn test_can_handle_skips_images_and_pdf() {
        let action = probe();
        assert!(!action.can_handle("image/png", "x.png"));
        assert!(!action.can_handle("application/pdf", "x.pdf"));
        assert!(action.can_handle("video/mp4", "x.mp4"));
        assert!(action.can_handle("application/octet-stream", "x.bin"));
    }
}
