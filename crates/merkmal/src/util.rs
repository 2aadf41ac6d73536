//! Library convenience for bulk pipelines.
//!
//! Preservation tools usually want three things from one read of an
//! object: the merged characterisation record, an independent set of
//! digests (their fixity vocabulary may differ from the `checksum`
//! action's), and a copy of the bytes landed somewhere else (an archive
//! writer, or a sink when only the record matters). [`index_with_copy`]
//! does all three in a single pass.

use crate::actions::{DigestAlgorithm, DigestSet};
use crate::core::dispatcher::ActionDispatcher;
use crate::error::Result;
use crate::types::IndexResult;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const COPY_CHUNK: usize = 64 * 1024;

/// Stream `reader` through the dispatcher while copying every byte to
/// `writer` and updating an independent digest set.
///
/// `name` is the filename hint used for extension-based applicability.
/// Returns the merged record and the digest map. The record's `size` is
/// authoritative for the bytes the dispatcher observed; a short write to
/// `writer` is an error.
pub async fn index_with_copy<R, W>(
    dispatcher: &ActionDispatcher,
    mut reader: R,
    name: &str,
    actions: &[String],
    digests: &[DigestAlgorithm],
    mut writer: W,
) -> Result<(IndexResult, HashMap<String, String>)>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    let (mut feed_half, stream_half) = tokio::io::duplex(COPY_CHUNK * 4);

    let feed = async {
        let mut digests = DigestSet::new(digests);
        let mut chunk = vec![0u8; COPY_CHUNK];
        let result: Result<HashMap<String, String>> = loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) => break Ok(digests.finalize()),
                Ok(n) => n,
                Err(e) => break Err(e.into()),
            };
            digests.update(&chunk[..n]);
            if let Err(e) = writer.write_all(&chunk[..n]).await {
                break Err(e.into());
            }
            if feed_half.write_all(&chunk[..n]).await.is_err() {
                // the dispatcher side ended; finish the digests from what
                // was read so far
                break Ok(digests.finalize());
            }
        };
        drop(feed_half);
        let _ = writer.flush().await;
        result
    };

    let hints = [name.to_string()];
    let (digest_result, stream_result) =
        tokio::join!(feed, dispatcher.stream(stream_half, &hints, actions));

    let result = stream_result?;
    let digests = digest_result?;
    Ok((result, digests))
}
