//! # channel-archiver
//!
//! Incremental archiver for the message and attachment history of chat
//! channels.
//!
//! ## Design Philosophy
//!
//! channel-archiver is designed to be:
//! - **Incremental** - Re-runs pick up where the last run stopped, never refetching media
//! - **Bounded** - Old history is walked backward in fixed-size batches
//! - **Resilient** - Rate limits and transient failures are retried, one bad message never sinks a batch
//! - **Pluggable** - History sources and upload sinks are traits
//!
//! ## Quick Start
//!
//! ```no_run
//! use channel_archiver::{Archiver, Config};
//! use channel_archiver::source::DiscordHistorySource;
//! use channel_archiver::upload::NoOpUploadSink;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     config.validate()?;
//!
//!     let source = DiscordHistorySource::new(&config.discord, &config.download)?;
//!     let archiver = Archiver::new(Arc::new(config), Arc::new(source), Arc::new(NoOpUploadSink))?;
//!
//!     for report in archiver.run_all().await {
//!         println!("{}: {:?}", report.channel, report.outcome.map(|s| s.stats));
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Batch crawling and mode orchestration
pub mod crawler;
/// Attachment fetching and classification
pub mod downloader;
/// Error types
pub mod error;
/// Structured run events
pub mod events;
/// Retry policy with linear backoff and rate-limit handling
pub mod retry;
/// Message history sources
pub mod source;
/// Cursor files and dedupe logs
pub mod state;
/// Core types
pub mod types;
/// Remote mirroring of archived files
pub mod upload;
/// Helper utilities for file naming and serialization
pub mod utils;

pub use config::Config;
pub use crawler::{Archiver, ChannelReport, ChannelSummary};
pub use error::{Error, MessageError, Result, SourceError};
pub use types::{AttachmentId, BatchStats, ChannelId, CrawlMode, Event, MessageId, MessageRecord};
