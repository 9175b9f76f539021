//! Per-channel crawl cursors.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{ChannelId, MessageId};

/// Crawl progress persisted for one channel
///
/// The latest-mode cursor (`last_run`) and the backfill cursor
/// (`backfill_before_id`, `backfill_complete`) are independent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    /// Start of the last successful latest-mode run
    #[serde(default, with = "lenient_timestamp")]
    pub last_run: Option<DateTime<Utc>>,

    /// Oldest message seen by the most recent backfill batch
    #[serde(
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub backfill_before_id: Option<MessageId>,

    /// Backfill reached the beginning of the channel
    #[serde(default)]
    pub backfill_complete: bool,
}

/// Loads and saves [`CursorState`] files, one per channel
#[derive(Clone, Debug)]
pub struct CursorStore {
    config: Arc<Config>,
}

impl CursorStore {
    /// Create a store resolving paths through `config`
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Whether saves reach the disk
    ///
    /// Cursors are only persisted when some cursor is honoured by the
    /// configuration and the run is not a dry run.
    pub fn is_enabled(&self) -> bool {
        self.config.tracks_cursor() && self.config.mode.persists_state()
    }

    /// Cursor file backing `channel`
    pub fn path(&self, channel: ChannelId) -> PathBuf {
        self.config.state_path(channel)
    }

    /// Verify the cursor file can be written before any crawling starts
    ///
    /// Creates the state directory when needed. A failure here is setup-fatal
    /// for the channel.
    pub async fn ensure_writable(&self, channel: ChannelId) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let path = self.path(channel);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| state_path_error(&path, e))?;
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| state_path_error(&path, e))?;
        Ok(())
    }

    /// Load the cursor for `channel`
    ///
    /// A missing, empty, unreadable or corrupt file yields the default state.
    pub async fn load(&self, channel: ChannelId) -> CursorState {
        let path = self.path(channel);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CursorState::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cursor file unreadable, starting fresh");
                return CursorState::default();
            }
        };
        if raw.trim().is_empty() {
            return CursorState::default();
        }
        match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cursor file corrupt, starting fresh");
                CursorState::default()
            }
        }
    }

    /// Persist the cursor for `channel`
    ///
    /// No-op when cursor tracking is disabled. The file is replaced atomically.
    pub async fn save(&self, channel: ChannelId, state: &CursorState) -> Result<()> {
        if !self.is_enabled() {
            tracing::debug!(%channel, "cursor tracking disabled, not saving");
            return Ok(());
        }
        let path = self.path(channel);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let body = crate::utils::to_pretty_json(state)?;
        let tmp = crate::utils::sibling_with_suffix(&path, ".tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(%channel, ?state, "cursor saved");
        Ok(())
    }
}

fn state_path_error(path: &Path, e: std::io::Error) -> Error {
    Error::StatePath {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Parse a stored timestamp; values without a timezone are taken as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

mod lenient_timestamp {
    use super::*;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(at) => serializer.serialize_some(&at.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(value
            .as_ref()
            .and_then(serde_json::Value::as_str)
            .and_then(parse_timestamp))
    }
}

fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<Option<MessageId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().map(MessageId),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}
