//! Message history sources
//!
//! A [`HistorySource`] yields a channel's messages newest first, bounded by
//! an optional count, an exclusive lower time bound and an exclusive upper id
//! bound. The crawl engine only depends on this trait; [`DiscordHistorySource`]
//! talks to the platform and [`MemoryHistorySource`] serves tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::error::{Result, SourceError};
use crate::types::{AttachmentId, ChannelId, MessageId};

mod discord;
mod memory;

pub use discord::DiscordHistorySource;
pub use memory::MemoryHistorySource;

/// Bounds for one history walk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Channel to read
    pub channel: ChannelId,
    /// Maximum number of messages to yield (None = unlimited)
    pub limit: Option<usize>,
    /// Only messages created strictly after this instant
    pub after: Option<DateTime<Utc>>,
    /// Only messages with an id strictly below this one
    pub before: Option<MessageId>,
}

impl HistoryQuery {
    /// Unbounded walk over `channel`
    pub fn new(channel: ChannelId) -> Self {
        Self {
            channel,
            limit: None,
            after: None,
            before: None,
        }
    }

    /// Whether a message with this id and creation time falls inside the bounds
    pub fn admits(&self, id: MessageId, created_at: DateTime<Utc>) -> bool {
        self.after.is_none_or(|after| created_at > after) && self.before.is_none_or(|before| id < before)
    }
}

/// A message as delivered by a source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceMessage {
    /// Platform id
    pub id: MessageId,
    /// Author display name
    pub author: String,
    /// Raw text content
    pub content: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Attachments in platform order
    pub attachments: Vec<SourceAttachment>,
}

/// Attachment metadata carried by a message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceAttachment {
    /// Platform id
    pub id: AttachmentId,
    /// Filename as uploaded
    pub filename: String,
    /// Download URL
    pub url: String,
    /// Declared size in bytes, when the platform reports one
    pub size: Option<u64>,
}

/// Trait for message history providers
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Check that `channel` exists and its history may be read
    ///
    /// Returns [`Error::ChannelUnreachable`](crate::Error::ChannelUnreachable) or
    /// [`Error::Forbidden`](crate::Error::Forbidden) otherwise.
    async fn resolve_channel(&self, channel: ChannelId) -> Result<()>;

    /// Stream messages matching `query`, newest first
    ///
    /// A [`SourceError::Malformed`] item concerns one message only and the
    /// stream may continue after it. Any other error ends the stream.
    fn stream(&self, query: HistoryQuery) -> BoxStream<'_, std::result::Result<SourceMessage, SourceError>>;

    /// Human-readable source name for logging
    fn name(&self) -> &'static str;
}
