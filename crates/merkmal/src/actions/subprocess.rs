//! Shared subprocess plumbing for the external probe wrappers.
//!
//! Probes like `ffprobe` and ImageMagick read the object from stdin and
//! print JSON on stdout. The stream is fed to the child while its output is
//! collected, the whole exchange guarded by one timeout. On timeout the
//! child is killed (`kill_on_drop`) and the caller receives
//! [`MerkmalError::Timeout`] carrying the command line.

use crate::actions::ActionReader;
use crate::error::{MerkmalError, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Run `program args...` with the stream bound to stdin; return stdout.
///
/// A child that stops reading early (common for header-only probes) is not
/// an error; the remaining stream bytes stay with the caller's reader and
/// are drained by the dispatcher.
pub(crate) async fn run_with_stdin(
    program: &str,
    args: &[&str],
    reader: ActionReader<'_>,
    limit: Duration,
) -> Result<Vec<u8>> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            MerkmalError::MissingDependency(format!("cannot execute '{program}': {e}"))
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| MerkmalError::internal("child stdin not piped"))?;

    let command_line = format!("{program} {}", args.join(" "));
    let exchange = async {
        let feed = async {
            // a probe may close stdin once it has seen enough; broken pipe
            // here is expected
            let _ = tokio::io::copy(reader, &mut stdin).await;
            drop(stdin);
        };
        let (_, output) = tokio::join!(feed, child.wait_with_output());
        output
    };

    let output = match timeout(limit, exchange).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(MerkmalError::internal_with_source(
                format!("cannot wait for '{command_line}'"),
                e,
            ));
        }
        Err(_) => {
            return Err(MerkmalError::Timeout {
                command: command_line,
                seconds: limit.as_secs(),
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MerkmalError::Other(format!(
            "'{command_line}' failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(output.stdout)
}
