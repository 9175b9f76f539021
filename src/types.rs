//! Core types for channel-archiver

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Milliseconds between the Unix epoch and the platform's snowflake epoch (2015-01-01T00:00:00Z)
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_420_070_400_000;

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Get the inner u64 value
            pub fn get(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.trim().parse()?))
            }
        }
    };
}

snowflake_id!(
    /// Platform identifier of a channel
    ChannelId
);
snowflake_id!(
    /// Platform identifier of a message
    MessageId
);
snowflake_id!(
    /// Platform identifier of an attachment
    AttachmentId
);

impl MessageId {
    /// Smallest snowflake that could have been created at `at`
    ///
    /// Used to translate a time bound into an id bound. Instants before the
    /// snowflake epoch map to id 0.
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        let offset = at.timestamp_millis() - SNOWFLAKE_EPOCH_MS;
        Self(u64::try_from(offset).map_or(0, |ms| ms << 22))
    }
}

/// Which cursor governs a crawl invocation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlMode {
    /// Only messages newer than the last run (or a day floor)
    #[default]
    Latest,
    /// Walk older history in bounded batches
    Backfill,
}

impl std::fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrawlMode::Latest => f.write_str("latest"),
            CrawlMode::Backfill => f.write_str("backfill"),
        }
    }
}

/// Media category an attachment is filed under
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    /// Matched the image extension set
    Image,
    /// Matched the video extension set
    Video,
    /// Matched the document extension set
    Document,
}

impl AttachmentKind {
    /// Local directory (relative to the output root) holding this kind of media
    pub fn directory(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "scraped_images",
            AttachmentKind::Video => "scraped_videos",
            AttachmentKind::Document => "scraped_documents",
        }
    }
}

/// Attachment that could not be retrieved, as recorded in the archive
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentFailure {
    /// Filename reported by the platform
    pub filename: String,
    /// Source URL the fetch was attempted from
    pub url: String,
}

/// One archived message
///
/// Field order is the archive's key order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Author display name
    pub author: String,
    /// Raw text content
    pub content: String,
    /// Creation time, RFC 3339
    pub timestamp: String,
    /// Saved attachment paths, in platform order
    pub attachments: Vec<String>,
    /// Attachments that failed to download
    pub errors: Vec<AttachmentFailure>,
}

/// Counters for one batch (or, summed, for one run)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Messages turned into archive records
    pub messages_processed: u64,
    /// Messages dropped because of a per-message fault
    pub messages_skipped: u64,
    /// Recognised attachments seen
    pub attachments_considered: u64,
    /// Attachments reported saved
    pub attachments_downloaded: u64,
    /// Attachments that failed after retries or with a permanent status
    pub attachments_failed: u64,
    /// Attachments skipped because their id was already archived
    pub attachments_skipped_dedupe: u64,
    /// Attachments skipped because they exceed the size limit
    pub attachments_skipped_size: u64,
    /// Creation time of the oldest message seen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_message_at: Option<DateTime<Utc>>,
}

impl BatchStats {
    /// Number of messages the source delivered, whether archived or skipped
    pub fn messages_seen(&self) -> u64 {
        self.messages_processed + self.messages_skipped
    }

    /// Fold another record into this one field by field
    pub fn merge(&mut self, other: &BatchStats) {
        self.messages_processed += other.messages_processed;
        self.messages_skipped += other.messages_skipped;
        self.attachments_considered += other.attachments_considered;
        self.attachments_downloaded += other.attachments_downloaded;
        self.attachments_failed += other.attachments_failed;
        self.attachments_skipped_dedupe += other.attachments_skipped_dedupe;
        self.attachments_skipped_size += other.attachments_skipped_size;
        self.oldest_message_at = match (self.oldest_message_at, other.oldest_message_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    pub(crate) fn observe_message_time(&mut self, at: DateTime<Utc>) {
        self.oldest_message_at = Some(self.oldest_message_at.map_or(at, |seen| seen.min(at)));
    }
}

impl AddAssign<&BatchStats> for BatchStats {
    fn add_assign(&mut self, rhs: &BatchStats) {
        self.merge(rhs);
    }
}

/// Structured event written to the optional event log
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum Event {
    /// One batch finished
    BatchComplete {
        /// Channel the batch belonged to
        channel: ChannelId,
        /// Governing mode
        mode: CrawlMode,
        /// 1-based batch number within this invocation
        batch: u32,
        /// Batch counters
        stats: BatchStats,
    },

    /// All batches for one channel finished
    RunComplete {
        /// Channel that finished
        channel: ChannelId,
        /// Governing mode
        mode: CrawlMode,
        /// Number of batches executed
        batches: u32,
        /// Summed counters
        stats: BatchStats,
        /// Whether the backfill cursor is now exhausted
        backfill_complete: bool,
    },

    /// Every configured channel was visited
    RunSummary {
        /// Channels that completed
        channels_ok: usize,
        /// Channels that aborted
        channels_failed: usize,
        /// Counters summed over successful channels
        stats: BatchStats,
    },
}

/// Event stamped with the time it was recorded
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// Event name and payload
    #[serde(flatten)]
    pub event: Event,
}
