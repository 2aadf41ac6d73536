//! URL ingestion: resolve a request URL to local bytes and index them.
//!
//! The server translates one JSON request into a dispatcher pass. A
//! `file://` URL resolves through the alias mapper and is read in place;
//! remote URLs are staged into a temp file first - either the configured
//! header prefix (ranged GET) or, when the reported mime matches the
//! forcedownload pattern, the full body capped at `max_download_size`. The
//! temp file belongs to the request scope and is removed on return, panic
//! included.
//!
//! Stream-capable actions run in a single dispatcher pass over the staged
//! bytes. URL-capable actions may receive the original URL instead; file
//! actions that need the complete object are skipped (with an error entry)
//! when only a prefix was staged.

use crate::actions::Capabilities;
use crate::api::types::IndexRequest;
use crate::core::config::MerkmalConfig;
use crate::core::dispatcher::ActionDispatcher;
use crate::core::sniff::{SNIFF_LEN, clear_mime, detect_content_type};
use crate::error::{MerkmalError, Result};
use crate::mapper::FileMapper;
use crate::sftp::SftpTransport;
use crate::types::IndexResult;
use regex::Regex;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use url::Url;

/// The staged local form of the requested object.
enum Staged {
    /// Mapped `file://` source, read in place.
    Local(PathBuf),
    /// Remote source copied (fully or as a prefix) into a scoped temp file.
    Temp(NamedTempFile),
}

impl Staged {
    fn path(&self) -> &Path {
        match self {
            Staged::Local(path) => path,
            Staged::Temp(temp) => temp.path(),
        }
    }
}

pub struct IndexServer {
    header_timeout: Duration,
    header_size: u64,
    forcedownload: String,
    max_download_size: u64,
    temp_dir: Option<PathBuf>,
    mapper: Arc<FileMapper>,
    sftp: Option<Arc<dyn SftpTransport>>,
    dispatcher: Arc<ActionDispatcher>,
    client: reqwest::Client,
}

impl IndexServer {
    pub fn new(
        config: &MerkmalConfig,
        dispatcher: Arc<ActionDispatcher>,
        mapper: Arc<FileMapper>,
        sftp: Option<Arc<dyn SftpTransport>>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_cert)
            .build()?;
        Ok(Self {
            header_timeout: config.header_timeout(),
            header_size: config.header_size,
            forcedownload: config.forcedownload.clone(),
            max_download_size: config.max_download_size,
            temp_dir: if config.temp_dir.is_empty() {
                None
            } else {
                Some(PathBuf::from(&config.temp_dir))
            },
            mapper,
            sftp,
            dispatcher: Arc::clone(&dispatcher),
            client,
        })
    }

    pub fn dispatcher(&self) -> &Arc<ActionDispatcher> {
        &self.dispatcher
    }

    /// Index one request. Per-action failures land in the result's `errors`
    /// map; an `Err` here means the object could not be resolved at all.
    pub async fn index(&self, request: &IndexRequest) -> Result<IndexResult> {
        let url = Url::parse(&request.url).map_err(|e| {
            MerkmalError::validation_with_source(format!("cannot parse url {}", request.url), e)
        })?;

        let header_size = match request.headersize {
            Some(size) if size > 0 => size,
            _ => self.header_size,
        };
        let force_pattern = request
            .forcedownload
            .clone()
            .unwrap_or_else(|| self.forcedownload.clone());
        let force_regexp = Regex::new(&force_pattern).map_err(|e| {
            MerkmalError::validation_with_source(
                format!("cannot compile forcedownload regexp {force_pattern}"),
                e,
            )
        })?;

        let mut result = IndexResult::new();
        result.checksums = request.checksums.clone();

        tracing::info!("loading from {}", url);
        let (staged, mut mimetype, full) = self
            .stage(&url, &force_regexp, header_size, &mut result)
            .await?;
        if mimetype.is_empty() && full {
            mimetype = sniff_file(staged.path()).await?;
        }

        // empty request list means every registered action
        let action_names = if request.actions.is_empty() {
            self.dispatcher.names()
        } else {
            request.actions.clone()
        };

        let mut stream_names = Vec::new();
        let mut other_names = Vec::new();
        for name in &action_names {
            match self.dispatcher.get(name) {
                Some(action) if action.caps().contains(Capabilities::STREAM) => {
                    stream_names.push(name.clone());
                }
                Some(_) => other_names.push(name.clone()),
                None => {
                    result
                        .errors
                        .insert(name.clone(), "action not available".to_string());
                }
            }
        }

        if !stream_names.is_empty() {
            let file = tokio::fs::File::open(staged.path()).await?;
            let hint = filename_hint(&url, &staged);
            let streamed = self
                .dispatcher
                .stream(file, &[hint], &stream_names)
                .await?;
            result.merge(streamed);
        }

        self.run_unstreamed(&url, &staged, &mimetype, full, &other_names, &mut result)
            .await;

        if !mimetype.is_empty() && !result.mimetypes.contains(&mimetype) {
            result.mimetypes.push(mimetype);
        }
        self.dispatcher.finalize_record(&mut result);
        Ok(result)
    }

    /// Run the file- and URL-bound probes that cannot join the stream pass.
    async fn run_unstreamed(
        &self,
        url: &Url,
        staged: &Staged,
        mimetype: &str,
        full: bool,
        names: &[String],
        result: &mut IndexResult,
    ) {
        let mut names: Vec<String> = names.to_vec();
        self.dispatcher.sort_by_weight(&mut names);
        for name in &names {
            let Some(action) = self.dispatcher.get(name) else {
                continue;
            };
            let caps = action.caps();

            let target = if caps.accepts_scheme(url.scheme()) && !full {
                url.clone()
            } else if caps.contains(Capabilities::LOCAL_FILE) {
                if !full && !caps.contains(Capabilities::HEAD_ONLY) {
                    tracing::info!("{}: no full download. action not applicable", name);
                    result.errors.insert(
                        name.clone(),
                        "no full download. action not applicable".to_string(),
                    );
                    continue;
                }
                match Url::from_file_path(staged.path()) {
                    Ok(file_url) => file_url,
                    Err(_) => {
                        result
                            .errors
                            .insert(name.clone(), "cannot build staged file url".to_string());
                        continue;
                    }
                }
            } else {
                result.errors.insert(
                    name.clone(),
                    format!("capability not satisfiable for scheme {}", url.scheme()),
                );
                continue;
            };

            tracing::info!("action {}: {}", name, target);
            match action.run_url(&target, mimetype).await {
                Ok(partial) => result.merge(partial),
                Err(MerkmalError::NotApplicable) => {
                    tracing::info!("{}: mime {} not applicable", name, mimetype);
                }
                Err(e) => {
                    result.errors.insert(name.clone(), e.to_string());
                }
            }
        }
    }

    /// Resolve the URL to local bytes. Returns the staged form, the mime
    /// reported by the transport (may be empty) and whether the full body
    /// is available.
    async fn stage(
        &self,
        url: &Url,
        force_regexp: &Regex,
        header_size: u64,
        result: &mut IndexResult,
    ) -> Result<(Staged, String, bool)> {
        match url.scheme() {
            "file" => {
                let path = self.mapper.resolve(url)?;
                let mimetype = sniff_file(&path).await?;
                Ok((Staged::Local(path), mimetype, true))
            }
            "http" | "https" => {
                let mimetype = self.remote_mime(url).await?;
                tracing::debug!("mimetype from server: {}", mimetype);
                // an empty pattern matches every mime, so the unconfigured
                // default is a full download
                let full = force_regexp.is_match(&mimetype);
                if full {
                    tracing::info!("full download of {}", url);
                } else {
                    tracing::info!("downloading {} byte from {}", header_size, url);
                }
                let temp = self.new_temp_file()?;
                let mut file = tokio::fs::File::from_std(temp.reopen().map_err(|e| {
                    MerkmalError::internal_with_source("cannot reopen tempfile", e)
                })?);
                let (written, truncated) = self
                    .download(url, &mut file, full, header_size)
                    .await?;
                file.flush().await?;
                if truncated {
                    result.errors.insert(
                        "download".to_string(),
                        format!(
                            "download truncated at {} bytes (maxDownloadSize)",
                            self.max_download_size
                        ),
                    );
                }
                tracing::debug!("staged {} bytes from {}", written, url);
                Ok((Staged::Temp(temp), mimetype, full))
            }
            "sftp" => {
                let Some(sftp) = &self.sftp else {
                    return Err(MerkmalError::validation(
                        "no sftp transport configured".to_string(),
                    ));
                };
                let temp = self.new_temp_file()?;
                let mut file = tokio::fs::File::from_std(temp.reopen().map_err(|e| {
                    MerkmalError::internal_with_source("cannot reopen tempfile", e)
                })?);
                sftp.fetch(url, &mut file).await?;
                file.flush().await?;
                Ok((Staged::Temp(temp), String::new(), true))
            }
            other => Err(MerkmalError::validation(format!(
                "cannot handle url scheme {other}"
            ))),
        }
    }

    fn new_temp_file(&self) -> Result<NamedTempFile> {
        let temp = match &self.temp_dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(|e| MerkmalError::internal_with_source("cannot create tempfile", e))?;
        Ok(temp)
    }

    /// Mime of a remote object via HEAD, falling back to a tiny ranged GET
    /// where HEAD is not allowed.
    async fn remote_mime(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .head(url.clone())
            .timeout(self.header_timeout)
            .send()
            .await
            .map_err(|e| {
                MerkmalError::http_with_source(format!("error getting head of {url}"), e)
            })?;

        let head_status = response.status();
        let response = if head_status == StatusCode::METHOD_NOT_ALLOWED
            || head_status == StatusCode::FORBIDDEN
        {
            tracing::debug!("HEAD not allowed for {}", url);
            self.client
                .get(url.clone())
                .header("Range", "bytes=0-64")
                .timeout(self.header_timeout)
                .send()
                .await
                .map_err(|e| {
                    MerkmalError::http_with_source(format!("error querying {url}"), e)
                })?
        } else {
            response
        };

        let status = response.status();
        if !status.is_success() {
            return Err(MerkmalError::http(format!(
                "invalid status {status} for {url}"
            )));
        }
        Ok(response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(clear_mime)
            .unwrap_or_default())
    }

    /// Copy the remote body into `file`: a ranged prefix, or the full body
    /// capped at `max_download_size`. Returns bytes written and whether the
    /// cap cut the download short.
    async fn download(
        &self,
        url: &Url,
        file: &mut tokio::fs::File,
        full: bool,
        header_size: u64,
    ) -> Result<(u64, bool)> {
        let mut request = self.client.get(url.clone()).timeout(self.header_timeout);
        if !full {
            request = request.header("Range", format!("bytes=0-{}", header_size - 1));
        }
        let mut response = request.send().await.map_err(|e| {
            MerkmalError::http_with_source(format!("cannot read content from url {url}"), e)
        })?;
        if !response.status().is_success() {
            return Err(MerkmalError::http(format!(
                "invalid status {} for {url}",
                response.status()
            )));
        }

        let max_size = if full { self.max_download_size } else { header_size };
        let mut written: u64 = 0;
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await? {
            let remaining = max_size - written;
            let take = (chunk.len() as u64).min(remaining) as usize;
            file.write_all(&chunk[..take]).await?;
            written += take as u64;
            if written >= max_size {
                truncated = full && response.chunk().await.ok().flatten().is_some();
                break;
            }
        }
        if written == 0 {
            return Err(MerkmalError::http(format!("no content from url {url}")));
        }
        Ok((written, truncated))
    }
}

/// Filename hint for extension-based applicability: the mapped path for
/// `file://` sources, the last URL segment otherwise.
fn filename_hint(url: &Url, staged: &Staged) -> String {
    match staged {
        Staged::Local(path) => path.to_string_lossy().to_string(),
        Staged::Temp(_) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or("")
            .to_string(),
    }
}

async fn sniff_file(path: &Path) -> Result<String> {
    use tokio::io::AsyncReadExt;
    let mut file = tokio::fs::File::open(path).await?;
    let mut head = vec![0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);
    Ok(clear_mime(detect_content_type(&head)))
}
