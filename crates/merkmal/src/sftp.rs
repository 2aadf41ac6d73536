//! SFTP transport seam.
//!
//! The transport itself is an external collaborator; the server only needs
//! "fetch this URL into that writer". Implementations manage their own
//! connection pooling behind the trait. Credentials come from
//! [`crate::core::config::SftpConfig`], whose `password()` helper honours
//! the `SFTP_PASSWORD` environment override.

use crate::error::Result;
use async_trait::async_trait;
use tokio::io::AsyncWrite;
use url::Url;

/// Fetches `sftp://USER@HOST[:PORT]/PATH` objects. Always a full download.
#[async_trait]
pub trait SftpTransport: Send + Sync {
    /// Copy the remote object into `writer`; returns the byte count.
    async fn fetch(&self, url: &Url, writer: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64>;
}
