//! Mirror uploads into a local directory tree

use super::UploadSink;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Upload sink that copies files under a root directory
///
/// The remote path becomes a path relative to `root`, so
/// `/DiscordBot/ImageBank/1_a.png` lands at `<root>/DiscordBot/ImageBank/1_a.png`.
pub struct LocalMirrorSink {
    root: PathBuf,
}

impl LocalMirrorSink {
    /// Mirror into `root`, which is created on first upload
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Local destination for a remote path
    ///
    /// Empty, `.` and `..` segments are dropped so nothing escapes `root`.
    pub fn target_for(&self, remote: &str) -> PathBuf {
        remote
            .split(['/', '\\'])
            .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
            .fold(self.root.clone(), |acc, seg| acc.join(seg))
    }
}

#[async_trait]
impl UploadSink for LocalMirrorSink {
    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let target = self.target_for(remote);
        let upload_error = |e: std::io::Error| Error::Upload {
            path: local.to_path_buf(),
            reason: format!("copy to {}: {}", target.display(), e),
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(upload_error)?;
        }
        let bytes = tokio::fs::copy(local, &target).await.map_err(upload_error)?;
        tracing::debug!(local = %local.display(), target = %target.display(), bytes, "mirrored");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local-mirror"
    }
}
