//! Append-only record of attachments already materialised locally.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::AttachmentId;
use crate::utils::append_json_line;

/// One line of the dedupe log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupeEntry {
    /// Attachment that was written
    pub attachment_id: AttachmentId,
    /// Its filename as reported by the platform
    pub filename: String,
}

/// Replay a dedupe log into a set of ids
///
/// A missing file yields an empty set; malformed lines are skipped.
pub async fn load_log(path: &Path) -> HashSet<AttachmentId> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashSet::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "dedupe log unreadable, starting empty");
            return HashSet::new();
        }
    };

    let mut ids = HashSet::new();
    let mut skipped = 0usize;
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<DedupeEntry>(line) {
            Ok(entry) => {
                ids.insert(entry.attachment_id);
            }
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::warn!(path = %path.display(), skipped, "ignored malformed dedupe log lines");
    }
    ids
}

/// Append one entry to a dedupe log, creating parent directories as needed
pub async fn append_entry(path: &Path, id: AttachmentId, filename: &str) -> Result<()> {
    let entry = DedupeEntry {
        attachment_id: id,
        filename: filename.to_string(),
    };
    append_json_line(path, &entry).await
}

/// In-memory view of a channel's dedupe log
#[derive(Debug)]
pub struct DedupeIndex {
    path: PathBuf,
    ids: HashSet<AttachmentId>,
}

impl DedupeIndex {
    /// Rebuild the index from the log at `path`
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ids = load_log(&path).await;
        tracing::debug!(path = %path.display(), entries = ids.len(), "dedupe index loaded");
        Self { path, ids }
    }

    /// Whether `id` has already been archived
    pub fn contains(&self, id: AttachmentId) -> bool {
        self.ids.contains(&id)
    }

    /// Record a freshly written attachment
    ///
    /// The log line is written first so the in-memory set never claims an id
    /// the log does not hold. An append failure is returned to the caller.
    pub async fn record(&mut self, id: AttachmentId, filename: &str) -> Result<()> {
        append_entry(&self.path, id, filename).await?;
        self.ids.insert(id);
        Ok(())
    }

    /// Number of known ids
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no ids are known
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Log file backing this index
    pub fn path(&self) -> &Path {
        &self.path
    }
}
