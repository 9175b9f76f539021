//! Batch archive files

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::{ChannelId, MessageRecord};
use crate::utils::{get_unique_path, to_pretty_json};

/// Directory (relative to the output root) holding archive files
pub const ARCHIVE_DIR: &str = "scraped_data";

/// Relative archive path for one batch: `scraped_data/<channel>_<UTC timestamp>_<batch>.json`
pub fn archive_relative_path(channel: ChannelId, run_started: DateTime<Utc>, batch: u32) -> PathBuf {
    Path::new(ARCHIVE_DIR).join(format!(
        "{}_{}_{}.json",
        channel,
        run_started.format("%Y%m%dT%H%M%SZ"),
        batch
    ))
}

/// Write `records` as a pretty-printed JSON array under `output_dir`
///
/// Returns the path actually written, relative to `output_dir`. An existing
/// file is never overwritten; a counter is added to the name instead.
pub async fn write_archive(
    output_dir: &Path,
    channel: ChannelId,
    run_started: DateTime<Utc>,
    batch: u32,
    records: &[MessageRecord],
) -> Result<PathBuf> {
    let wanted = output_dir.join(archive_relative_path(channel, run_started, batch));
    if let Some(dir) = wanted.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let path = get_unique_path(&wanted)?;
    tokio::fs::write(&path, to_pretty_json(records)?).await?;
    tracing::info!(%channel, path = %path.display(), messages = records.len(), "archive written");

    Ok(path
        .strip_prefix(output_dir)
        .map(Path::to_path_buf)
        .unwrap_or(path.clone()))
}
