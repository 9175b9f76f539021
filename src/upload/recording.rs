//! Upload sink double for unit tests

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::UploadSink;
use crate::error::{Error, Result};

/// Sink that remembers every upload request
///
/// Useful for asserting what would have been mirrored. Can be told to fail.
#[derive(Default)]
pub(crate) struct RecordingUploadSink {
    uploads: Mutex<Vec<(PathBuf, String)>>,
    fail: bool,
}

impl RecordingUploadSink {
    /// Sink that accepts every upload
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Sink that records every upload and then reports failure
    pub(crate) fn failing() -> Self {
        Self {
            uploads: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Recorded `(local, remote)` pairs in call order
    pub(crate) fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.uploads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl UploadSink for RecordingUploadSink {
    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        self.uploads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((local.to_path_buf(), remote.to_string()));
        if self.fail {
            return Err(Error::Upload {
                path: local.to_path_buf(),
                reason: "recording sink configured to fail".into(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
