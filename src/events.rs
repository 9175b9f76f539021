//! Structured run events
//!
//! Every [`Event`] is logged through `tracing` and, when an event log path is
//! configured, appended to it as one JSON object per line. A failing event log
//! is reported but never interrupts a run.

use chrono::Utc;
use std::path::{Path, PathBuf};

use crate::types::{Event, EventRecord};
use crate::utils::append_json_line;

/// Emits events to the log and an optional JSON-lines file
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    path: Option<PathBuf>,
}

impl EventLog {
    /// Event log writing to `path`, or only to `tracing` when `None`
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Record one event
    pub async fn emit(&self, event: Event) {
        match &event {
            Event::BatchComplete {
                channel,
                mode,
                batch,
                stats,
            } => tracing::info!(
                %channel,
                %mode,
                batch,
                processed = stats.messages_processed,
                skipped = stats.messages_skipped,
                downloaded = stats.attachments_downloaded,
                failed = stats.attachments_failed,
                "batch complete"
            ),
            Event::RunComplete {
                channel,
                mode,
                batches,
                stats,
                backfill_complete,
            } => tracing::info!(
                %channel,
                %mode,
                batches,
                processed = stats.messages_processed,
                downloaded = stats.attachments_downloaded,
                backfill_complete,
                "channel run complete"
            ),
            Event::RunSummary {
                channels_ok,
                channels_failed,
                stats,
            } => tracing::info!(
                channels_ok,
                channels_failed,
                processed = stats.messages_processed,
                downloaded = stats.attachments_downloaded,
                "run summary"
            ),
        }

        if let Some(path) = &self.path {
            let record = EventRecord {
                timestamp: Utc::now(),
                event,
            };
            if let Err(e) = append_json_line(path, &record).await {
                tracing::warn!(path = %path.display(), error = %e, "could not write event log");
            }
        }
    }

    /// Configured event log file
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
