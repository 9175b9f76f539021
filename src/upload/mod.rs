//! Remote mirroring of archived files
//!
//! Saved media and archive files are handed to an [`UploadSink`] after the
//! local write completes. Uploads are best-effort: callers log failures and
//! carry on, nothing is retried.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::utils::{join_remote, to_remote_component};

mod mirror;
mod noop;
#[cfg(test)]
mod recording;

pub use mirror::LocalMirrorSink;
pub use noop::NoOpUploadSink;
#[cfg(test)]
pub(crate) use recording::RecordingUploadSink;

/// Remote folder holding attachment media
pub const MEDIA_FOLDER: &str = "ImageBank";

/// Trait for upload destinations
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait UploadSink: Send + Sync {
    /// Copy the local file at `local` to `remote`
    async fn upload(&self, local: &Path, remote: &str) -> Result<()>;

    /// Human-readable sink name for logging
    fn name(&self) -> &'static str;
}

/// Remote path for a saved attachment: `<prefix>/ImageBank/<file name>`
pub fn media_remote_path(prefix: &str, local: &Path) -> String {
    let file_name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    join_remote(prefix, &format!("{}/{}", MEDIA_FOLDER, file_name))
}

/// Remote path for an archive file: `<prefix>/<path relative to the output root>`
pub fn archive_remote_path(prefix: &str, relative: &Path) -> String {
    join_remote(prefix, &to_remote_component(relative))
}

/// Upload and log the outcome; a failure never propagates
pub async fn upload_best_effort(sink: &dyn UploadSink, local: &Path, remote: &str) {
    match sink.upload(local, remote).await {
        Ok(()) => tracing::debug!(sink = sink.name(), local = %local.display(), remote, "uploaded"),
        Err(e) => tracing::warn!(sink = sink.name(), local = %local.display(), remote, error = %e, "upload failed"),
    }
}
