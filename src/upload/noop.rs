//! Sink used when uploads are disabled

use super::UploadSink;
use async_trait::async_trait;
use std::path::Path;

/// Upload sink that accepts and discards every file
///
/// # Examples
///
/// ```
/// use channel_archiver::upload::{NoOpUploadSink, UploadSink};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let sink = NoOpUploadSink;
/// sink.upload(Path::new("scraped_images/1_a.png"), "/DiscordBot/ImageBank/1_a.png").await?;
/// # Ok(())
/// # }
/// ```
pub struct NoOpUploadSink;

#[async_trait]
impl UploadSink for NoOpUploadSink {
    async fn upload(&self, local: &Path, remote: &str) -> crate::Result<()> {
        tracing::trace!(local = %local.display(), remote, "upload skipped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
