//! The action dispatcher: single-pass fan-out over a byte stream.
//!
//! `stream` drives one read of a non-seekable source and broadcasts every
//! byte to all applicable probe actions concurrently. Each consumer owns a
//! bounded pipe; a full pipe suspends the broadcaster, so a slow consumer
//! slows the whole fan-out rather than losing bytes. Consumers that return
//! early keep draining their pipe so the broadcaster never deadlocks on
//! them.
//!
//! Per-action failures never fail the pipeline: they are folded into
//! `IndexResult.errors` under the action name. Only three things surface as
//! errors: an unknown or non-streamable requested action (checked before
//! any byte moves), a source that dies before delivering a single byte, and
//! internal task-supervision failures.
//!
//! The dispatcher holds no locks and is safe for concurrent `stream` calls.

use crate::actions::{Action, Capabilities};
use crate::core::config::MimeWeightRule;
use crate::core::relevance::MimeRelevance;
use crate::core::sniff::{SNIFF_LEN, clear_mime, detect_content_type};
use crate::error::{MerkmalError, Result};
use crate::types::IndexResult;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

/// Per-consumer pipe capacity. Sized so a briefly stalled consumer does not
/// immediately throttle the others.
const PIPE_BUFFER: usize = 1024 * 1024;

/// Broadcast chunk size.
const COPY_CHUNK: usize = 64 * 1024;

pub struct ActionDispatcher {
    relevance: MimeRelevance,
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionDispatcher {
    pub fn new(mime_relevance: &[MimeWeightRule]) -> Result<Self> {
        Ok(Self {
            relevance: MimeRelevance::new(mime_relevance)?,
            actions: HashMap::new(),
        })
    }

    /// Register an action under its name. Registration happens during
    /// construction only; the map is read-only afterwards.
    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.actions.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn names_by_caps(&self, caps: Capabilities) -> Vec<String> {
        let mut names: Vec<String> = self
            .actions
            .values()
            .filter(|a| a.caps().intersects(caps))
            .map(|a| a.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Order action names by their weight hint (stable; lower runs earlier).
    pub fn sort_by_weight(&self, names: &mut [String]) {
        names.sort_by_key(|n| self.actions.get(n).map(|a| a.weight()).unwrap_or(u32::MAX));
    }

    pub fn relevance(&self) -> &MimeRelevance {
        &self.relevance
    }

    /// Run all requested stream-capable actions over one pass of `source`.
    ///
    /// `filename_hints` may be empty; the first entry feeds extension-based
    /// applicability. Every requested name must be registered and
    /// stream-capable, otherwise [`MerkmalError::UnknownAction`] is returned
    /// before the source is touched. Requested actions whose applicability
    /// predicate rejects this content are skipped silently.
    pub async fn stream<R>(
        &self,
        mut source: R,
        filename_hints: &[String],
        action_names: &[String],
    ) -> Result<IndexResult>
    where
        R: AsyncRead + Send + Unpin,
    {
        let filename = filename_hints.first().map(String::as_str).unwrap_or("");

        let mut requested: Vec<&Arc<dyn Action>> = Vec::new();
        for name in action_names {
            match self.actions.get(name) {
                Some(action) if action.caps().contains(Capabilities::STREAM) => {
                    if !requested.iter().any(|a| a.name() == name.as_str()) {
                        requested.push(action);
                    }
                }
                _ => return Err(MerkmalError::UnknownAction(name.clone())),
            }
        }

        // sniff the head, then replay it in front of the fan-out
        let mut sniffed = vec![0u8; SNIFF_LEN];
        let mut filled = 0;
        let mut source_dead = false;
        while filled < SNIFF_LEN {
            match source.read(&mut sniffed[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    if filled == 0 {
                        return Err(MerkmalError::source_read_with_source(
                            "source failed before first byte",
                            e,
                        ));
                    }
                    tracing::warn!("source read error after {} bytes: {}", filled, e);
                    source_dead = true;
                    break;
                }
            }
        }
        sniffed.truncate(filled);
        let content_type = clear_mime(detect_content_type(&sniffed));

        let applicable: Vec<&Arc<dyn Action>> = requested
            .into_iter()
            .filter(|a| a.can_handle(&content_type, filename))
            .collect();

        let (tx, mut rx) = mpsc::channel::<IndexResult>(applicable.len().max(1));
        let mut writers: Vec<Option<DuplexStream>> = Vec::with_capacity(applicable.len());
        let mut tasks = Vec::with_capacity(applicable.len());
        for action in &applicable {
            let (writer, mut reader) = tokio::io::duplex(PIPE_BUFFER);
            writers.push(Some(writer));
            let action = Arc::clone(*action);
            let results = tx.clone();
            let content_type = content_type.clone();
            let filename = filename.to_string();
            let name = action.name().to_string();
            let handle = tokio::spawn(async move {
                let result = match action.stream(&content_type, &mut reader, &filename).await {
                    Ok(result) => result,
                    Err(e) => IndexResult::with_error(action.name(), e.to_string()),
                };
                // discard whatever the action left unread; the broadcaster
                // must never block on a finished consumer
                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                let _ = results.send(result).await;
            });
            tasks.push((name, handle));
        }
        drop(tx);

        let mut written: u64 = 0;

        if !sniffed.is_empty() {
            written += sniffed.len() as u64;
            broadcast(&mut writers, &sniffed).await;
        }

        // once every consumer is gone the loop keeps reading without
        // broadcasting: the size accounting stays authoritative for the
        // whole source
        let mut chunk = vec![0u8; COPY_CHUNK];
        while !source_dead {
            let n = match source.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!("source read error after {} bytes: {}", written, e);
                    break;
                }
            };
            written += n as u64;
            broadcast(&mut writers, &chunk[..n]).await;
        }

        // closing the write halves delivers EOF to every consumer
        for writer in writers.iter_mut() {
            if let Some(mut w) = writer.take() {
                let _ = w.shutdown().await;
            }
        }

        let mut result = IndexResult::new();
        for (name, handle) in tasks {
            if let Err(join_err) = handle.await {
                result
                    .errors
                    .insert(name, MerkmalError::internal(join_err.to_string()).to_string());
            }
        }
        while let Some(partial) = rx.recv().await {
            result.merge(partial);
        }

        self.finalize_record(&mut result);
        result.size = written;
        Ok(result)
    }

    /// Rank candidates, elect scalars and infer the coarse type. The
    /// ingestion server re-runs this after folding in non-stream probes.
    pub(crate) fn finalize_record(&self, result: &mut IndexResult) {
        result.mimetype = self.relevance.elect(&mut result.mimetypes);
        result.pronoms.sort();
        result.pronoms.dedup();
        if let Some(first) = result.pronoms.first() {
            result.pronom = first.clone();
        }
        if result.kind.is_empty() {
            if let Some(prefix) = result.mimetype.split('/').next() {
                if prefix != result.mimetype {
                    result.kind = prefix.to_string();
                }
            }
        }
    }
}

/// Write one chunk to every remaining consumer. A write failure means the
/// consumer's task died; it is removed from the broadcast set.
async fn broadcast(writers: &mut [Option<DuplexStream>], chunk: &[u8]) {
    for slot in writers.iter_mut() {
        if let Some(writer) = slot {
            if writer.write_all(chunk).await.is_err() {
                *slot = None;
            }
        }
    }
}
