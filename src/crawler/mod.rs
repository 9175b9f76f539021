//! Crawl orchestration
//!
//! The [`Archiver`] drives each configured channel through one of two modes:
//!
//! - **Latest**: a single batch of messages newer than
//!   `max(now - since_days, last_run)`; on success `last_run` is advanced to
//!   the instant the run started.
//! - **Backfill**: repeated batches walking backward from the stored
//!   `backfill_before_id`. A batch yielding no messages marks the channel
//!   complete; later backfill invocations do nothing at all.
//!
//! Channels are processed strictly one after another, each with its own
//! cursor file and dedupe log.

mod archive;
mod batch;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use archive::{ARCHIVE_DIR, archive_relative_path, write_archive};
pub use batch::{BatchOutcome, BatchParams, CrawlBatch};

use chrono::Utc;
use std::sync::Arc;

use crate::config::Config;
use crate::downloader::AttachmentDownloader;
use crate::error::{Error, Result};
use crate::events::EventLog;
use crate::source::HistorySource;
use crate::state::{CursorState, CursorStore, DedupeIndex};
use crate::types::{BatchStats, ChannelId, CrawlMode, Event};
use crate::upload::UploadSink;

/// Totals for one channel's run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSummary {
    /// Channel that ran
    pub channel: ChannelId,
    /// Governing mode
    pub mode: CrawlMode,
    /// Batches executed (0 when backfill was already complete)
    pub batches: u32,
    /// Summed batch counters
    pub stats: BatchStats,
    /// Backfill cursor state at the end of the run
    pub backfill_complete: bool,
}

/// Outcome for one channel in a multi-channel run
#[derive(Debug)]
pub struct ChannelReport {
    /// Channel the report is about
    pub channel: ChannelId,
    /// Summary on success, the aborting error otherwise
    pub outcome: Result<ChannelSummary>,
}

/// Archives channels according to a [`Config`]
pub struct Archiver {
    config: Arc<Config>,
    source: Arc<dyn HistorySource>,
    sink: Arc<dyn UploadSink>,
    downloader: AttachmentDownloader,
    cursors: CursorStore,
    events: EventLog,
}

impl Archiver {
    /// Create an archiver reading from `source` and mirroring through `sink`
    ///
    /// # Errors
    /// Returns error if the attachment HTTP client cannot be created
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn HistorySource>,
        sink: Arc<dyn UploadSink>,
    ) -> Result<Self> {
        let downloader = AttachmentDownloader::new(&config, sink.clone())?;
        Ok(Self {
            cursors: CursorStore::new(config.clone()),
            events: EventLog::new(config.storage.event_log.clone()),
            config,
            source,
            sink,
            downloader,
        })
    }

    /// Run every configured channel in order
    ///
    /// A failing channel is reported and does not stop the others.
    pub async fn run_all(&self) -> Vec<ChannelReport> {
        let mut reports = Vec::with_capacity(self.config.channels.len());

        for &channel in &self.config.channels {
            let outcome = self.run_channel(channel).await;
            match &outcome {
                Ok(_) => {}
                Err(e) if e.is_setup_fatal() => {
                    tracing::error!(%channel, error = %e, "channel setup failed, skipping")
                }
                Err(e) => tracing::error!(%channel, error = %e, "channel run aborted"),
            }
            reports.push(ChannelReport { channel, outcome });
        }

        let (channels_ok, channels_failed, stats) = summarize(&reports);
        self.events
            .emit(Event::RunSummary {
                channels_ok,
                channels_failed,
                stats,
            })
            .await;
        reports
    }

    /// Run one channel in the configured mode
    pub async fn run_channel(&self, channel: ChannelId) -> Result<ChannelSummary> {
        let mode = self.config.crawl_mode();
        let mut state = self.cursors.load(channel).await;

        if mode == CrawlMode::Backfill && state.backfill_complete {
            tracing::info!(%channel, "backfill already complete, nothing to do");
            return Ok(ChannelSummary {
                channel,
                mode,
                batches: 0,
                stats: BatchStats::default(),
                backfill_complete: true,
            });
        }

        self.prepare(channel).await?;
        let mut dedupe = DedupeIndex::load(self.config.dedupe_path(channel)).await;

        let (batches, stats) = match mode {
            CrawlMode::Latest => self.run_latest(channel, &mut state, &mut dedupe).await?,
            CrawlMode::Backfill => self.run_backfill(channel, &mut state, &mut dedupe).await?,
        };

        let summary = ChannelSummary {
            channel,
            mode,
            batches,
            stats,
            backfill_complete: state.backfill_complete,
        };
        self.events
            .emit(Event::RunComplete {
                channel,
                mode,
                batches,
                stats: summary.stats.clone(),
                backfill_complete: summary.backfill_complete,
            })
            .await;
        Ok(summary)
    }

    /// Setup checks that must pass before any state is written
    async fn prepare(&self, channel: ChannelId) -> Result<()> {
        self.source.resolve_channel(channel).await?;
        self.cursors.ensure_writable(channel).await?;
        Ok(())
    }

    async fn run_latest(
        &self,
        channel: ChannelId,
        state: &mut CursorState,
        dedupe: &mut DedupeIndex,
    ) -> Result<(u32, BatchStats)> {
        let started = Utc::now();
        let floor = self
            .config
            .crawl
            .since_days
            .map(|days| started - chrono::Duration::days(i64::from(days)));
        let last_run = state.last_run.filter(|_| self.config.crawl.use_last_run);
        let after = floor.max(last_run);

        let outcome = self
            .batch()
            .run(
                dedupe,
                BatchParams {
                    channel,
                    limit: self.config.crawl.limit,
                    after,
                    before: None,
                    batch_no: 1,
                    run_started: started,
                },
            )
            .await?;
        self.emit_batch(channel, CrawlMode::Latest, 1, &outcome.stats).await;

        if self.config.crawl.use_last_run {
            state.last_run = Some(state.last_run.map_or(started, |prev| prev.max(started)));
            self.cursors.save(channel, state).await?;
        }
        Ok((1, outcome.stats))
    }

    async fn run_backfill(
        &self,
        channel: ChannelId,
        state: &mut CursorState,
        dedupe: &mut DedupeIndex,
    ) -> Result<(u32, BatchStats)> {
        let crawl = &self.config.crawl;
        let started = Utc::now();
        let mut total = BatchStats::default();
        let mut batches = 0u32;

        while !state.backfill_complete {
            batches += 1;
            let outcome = self
                .batch()
                .run(
                    dedupe,
                    BatchParams {
                        channel,
                        limit: Some(crawl.batch_size),
                        after: None,
                        before: state.backfill_before_id,
                        batch_no: batches,
                        run_started: started,
                    },
                )
                .await?;
            total += &outcome.stats;
            self.emit_batch(channel, CrawlMode::Backfill, batches, &outcome.stats)
                .await;

            if outcome.stats.messages_seen() == 0 {
                tracing::info!(%channel, batches, "history exhausted, backfill complete");
                state.backfill_complete = true;
                self.cursors.save(channel, state).await?;
                break;
            }
            let Some(oldest) = outcome.oldest_id else {
                tracing::warn!(%channel, "no readable message in batch, cursor not advanced");
                break;
            };
            state.backfill_before_id = Some(oldest);
            self.cursors.save(channel, state).await?;

            if !crawl.autorun {
                break;
            }
            if crawl.max_batches > 0 && batches >= crawl.max_batches {
                tracing::info!(%channel, batches, "batch cap reached");
                break;
            }
            tracing::debug!(%channel, sleep = ?crawl.autorun_sleep, "pausing before next batch");
            tokio::time::sleep(crawl.autorun_sleep).await;
        }

        Ok((batches, total))
    }

    fn batch(&self) -> CrawlBatch<'_> {
        CrawlBatch::new(
            &self.config,
            self.source.as_ref(),
            &self.downloader,
            self.sink.as_ref(),
        )
    }

    async fn emit_batch(&self, channel: ChannelId, mode: CrawlMode, batch: u32, stats: &BatchStats) {
        self.events
            .emit(Event::BatchComplete {
                channel,
                mode,
                batch,
                stats: stats.clone(),
            })
            .await;
    }
}

/// Fold reports into `(channels ok, channels failed, summed stats)`
pub fn summarize(reports: &[ChannelReport]) -> (usize, usize, BatchStats) {
    let mut total = BatchStats::default();
    let mut ok = 0;
    for report in reports {
        if let Ok(summary) = &report.outcome {
            ok += 1;
            total += &summary.stats;
        }
    }
    (ok, reports.len() - ok, total)
}

impl ChannelReport {
    /// Error that aborted this channel, if any
    pub fn error(&self) -> Option<&Error> {
        self.outcome.as_ref().err()
    }
}
