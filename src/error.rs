//! Error types for channel-archiver
//!
//! This module provides the error taxonomy used throughout the crawl engine:
//! - [`Error`] for setup and subsystem failures that escalate to the caller
//! - [`SourceError`] for failures reported by a [`HistorySource`](crate::source::HistorySource)
//! - [`MessageError`] for faults isolated to a single message within a batch
//!
//! Transient HTTP conditions (429, 5xx) are never represented here; the
//! attachment downloader handles them as retry decisions.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{AttachmentId, ChannelId, MessageId};

/// Result type alias for channel-archiver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for channel-archiver
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "SCRAPE_BATCH_SIZE")
        key: Option<String>,
    },

    /// The channel does not exist or is not visible to the session
    #[error("channel {0} is unreachable")]
    ChannelUnreachable(ChannelId),

    /// The session may see the channel but is not allowed to read its history
    #[error("access to channel {0} is forbidden")]
    Forbidden(ChannelId),

    /// The cursor state location cannot be created or written
    #[error("state path {path} is not writable: {reason}")]
    StatePath {
        /// The state file that could not be prepared
        path: PathBuf,
        /// Why it could not be prepared
        reason: String,
    },

    /// The history source failed while a batch was streaming
    #[error("history source error: {0}")]
    Source(#[from] SourceError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Upload to the remote mirror failed
    #[error("upload of {path} failed: {reason}")]
    Upload {
        /// Local file that was being mirrored
        path: PathBuf,
        /// Reason reported by the sink
        reason: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error aborts a channel before any cursor or dedupe state is touched
    pub fn is_setup_fatal(&self) -> bool {
        matches!(
            self,
            Error::ChannelUnreachable(_) | Error::Forbidden(_) | Error::StatePath { .. }
        ) || matches!(
            self,
            Error::Source(SourceError::Unreachable(_) | SourceError::Forbidden(_))
        )
    }

    /// Convenience constructor for configuration errors tied to a key
    pub(crate) fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Errors surfaced by a history source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Channel does not exist or is not visible
    #[error("channel {0} not found")]
    Unreachable(ChannelId),

    /// Channel exists but history may not be read
    #[error("missing permission to read channel {0}")]
    Forbidden(ChannelId),

    /// One message could not be decoded; the rest of the stream is still usable
    #[error("malformed message: {reason}")]
    Malformed {
        /// Message id, when it could still be read
        id: Option<MessageId>,
        /// Why decoding failed
        reason: String,
    },

    /// Transport-level failure while paging history
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Fault isolated to a single message while a batch is processed
#[derive(Debug, Error)]
pub enum MessageError {
    /// The source delivered a message that could not be decoded
    #[error("source delivered an unreadable message: {0}")]
    Unreadable(String),

    /// An attachment name cannot be turned into a local file name
    #[error("attachment {id} of message {message} has an unusable filename {filename:?}")]
    InvalidAttachmentName {
        /// Message carrying the attachment
        message: MessageId,
        /// Attachment id
        id: AttachmentId,
        /// Name as reported by the platform
        filename: String,
    },

    /// Local media directory could not be prepared
    #[error("cannot prepare media directory {path}: {source}")]
    MediaDirectory {
        /// Directory that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}
