//! One bounded pass over a channel's history

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::path::{Path, PathBuf};

use super::archive::write_archive;
use crate::config::Config;
use crate::downloader::{AttachmentDownloader, FetchOutcome, classify};
use crate::error::{Error, MessageError, Result, SourceError};
use crate::source::{HistoryQuery, HistorySource, SourceAttachment, SourceMessage};
use crate::state::DedupeIndex;
use crate::types::{AttachmentFailure, BatchStats, ChannelId, MessageId, MessageRecord};
use crate::upload::{UploadSink, archive_remote_path, upload_best_effort};
use crate::utils::{sanitize_filename, to_remote_component};

/// Bounds and labels for one batch
#[derive(Clone, Copy, Debug)]
pub struct BatchParams {
    /// Channel to crawl
    pub channel: ChannelId,
    /// Maximum messages (None = unlimited)
    pub limit: Option<usize>,
    /// Exclusive lower time bound
    pub after: Option<DateTime<Utc>>,
    /// Exclusive upper id bound
    pub before: Option<MessageId>,
    /// 1-based batch number within the invocation
    pub batch_no: u32,
    /// Instant the invocation started, used to name the archive
    pub run_started: DateTime<Utc>,
}

/// What a batch produced
#[derive(Clone, Debug, Default)]
pub struct BatchOutcome {
    /// Batch counters
    pub stats: BatchStats,
    /// Smallest message id seen, including undecodable messages whose id was readable
    pub oldest_id: Option<MessageId>,
    /// Archive file written, relative to the channel's output directory
    pub archive: Option<PathBuf>,
}

impl BatchOutcome {
    fn observe_id(&mut self, id: MessageId) {
        self.oldest_id = Some(self.oldest_id.map_or(id, |oldest| oldest.min(id)));
    }
}

struct PlannedAttachment<'m> {
    attachment: &'m SourceAttachment,
    /// Path relative to the output root
    relative: PathBuf,
}

/// Crawls one batch and writes its archive
pub struct CrawlBatch<'a> {
    config: &'a Config,
    source: &'a dyn HistorySource,
    downloader: &'a AttachmentDownloader,
    sink: &'a dyn UploadSink,
}

impl<'a> CrawlBatch<'a> {
    /// Wire a batch to its collaborators
    pub fn new(
        config: &'a Config,
        source: &'a dyn HistorySource,
        downloader: &'a AttachmentDownloader,
        sink: &'a dyn UploadSink,
    ) -> Self {
        Self {
            config,
            source,
            downloader,
            sink,
        }
    }

    /// Stream the batch, fetch its attachments and archive the records
    ///
    /// Per-message faults are counted and skipped. A source failure other than
    /// a malformed message, a dedupe log append failure or an archive write
    /// failure aborts the batch.
    pub async fn run(&self, dedupe: &mut DedupeIndex, params: BatchParams) -> Result<BatchOutcome> {
        let channel = params.channel;
        let output_dir = self.config.output_dir(channel);
        let query = HistoryQuery {
            channel,
            limit: params.limit,
            after: params.after,
            before: params.before,
        };
        tracing::info!(
            %channel,
            batch = params.batch_no,
            limit = ?params.limit,
            after = ?params.after,
            before = ?params.before,
            source = self.source.name(),
            "starting batch"
        );

        let mut outcome = BatchOutcome::default();
        let mut records = Vec::new();
        let mut stream = self.source.stream(query);

        while let Some(item) = stream.next().await {
            let message = match item {
                Ok(message) => message,
                Err(SourceError::Malformed { id, reason }) => {
                    // A readable id still moves the cursor past the bad message
                    if let Some(id) = id {
                        outcome.observe_id(id);
                    }
                    let err = MessageError::Unreadable(reason);
                    tracing::warn!(%channel, message = ?id, error = %err, "message skipped");
                    outcome.stats.messages_skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(%channel, error = %e, "history stream failed, aborting batch");
                    return Err(Error::Source(e));
                }
            };

            outcome.stats.observe_message_time(message.created_at);
            outcome.observe_id(message.id);

            match self
                .process_message(&message, &output_dir, dedupe, &mut outcome.stats)
                .await?
            {
                Ok(record) => {
                    records.push(record);
                    outcome.stats.messages_processed += 1;
                }
                Err(err) => {
                    tracing::warn!(%channel, message = %message.id, error = %err, "message skipped");
                    outcome.stats.messages_skipped += 1;
                }
            }
        }
        drop(stream);

        if self.config.mode.writes_archive() {
            let relative =
                write_archive(&output_dir, channel, params.run_started, params.batch_no, &records)
                    .await?;
            if self.config.storage.enable_uploads {
                let remote = archive_remote_path(&self.config.storage.remote_prefix, &relative);
                upload_best_effort(self.sink, &output_dir.join(&relative), &remote).await;
            }
            outcome.archive = Some(relative);
        } else {
            tracing::info!(%channel, messages = records.len(), "archive not written in this mode");
        }

        Ok(outcome)
    }

    /// Build the record for one message
    ///
    /// The outer `Result` carries failures that must abort the batch; the inner
    /// one carries faults confined to this message.
    async fn process_message(
        &self,
        message: &SourceMessage,
        output_dir: &Path,
        dedupe: &mut DedupeIndex,
        stats: &mut BatchStats,
    ) -> Result<std::result::Result<MessageRecord, MessageError>> {
        let planned = match self.plan_attachments(message, output_dir, dedupe, stats).await {
            Ok(planned) => planned,
            Err(err) => return Ok(Err(err)),
        };

        let mut record = MessageRecord {
            author: message.author.clone(),
            content: message.content.clone(),
            timestamp: message.created_at.to_rfc3339(),
            attachments: Vec::new(),
            errors: Vec::new(),
        };

        for PlannedAttachment {
            attachment,
            relative,
        } in planned
        {
            let dest = output_dir.join(&relative);
            match self.downloader.fetch(&attachment.url, &dest).await {
                FetchOutcome::Saved => {
                    record.attachments.push(to_remote_component(&relative));
                    stats.attachments_downloaded += 1;
                    if self.config.mode.records_dedupe() {
                        dedupe.record(attachment.id, &attachment.filename).await?;
                    }
                }
                FetchOutcome::Skipped => {
                    stats.attachments_skipped_size += 1;
                }
                FetchOutcome::Failed { reason } => {
                    tracing::warn!(
                        message = %message.id,
                        attachment_id = %attachment.id,
                        filename = %attachment.filename,
                        reason,
                        "attachment failed"
                    );
                    stats.attachments_failed += 1;
                    record.errors.push(AttachmentFailure {
                        filename: attachment.filename.clone(),
                        url: attachment.url.clone(),
                    });
                }
            }
        }

        Ok(Ok(record))
    }

    /// Classify and filter a message's attachments before any fetch
    ///
    /// Dedupe and size skips are counted here. Fails without side effects on
    /// disk or in the dedupe index when a name or directory is unusable.
    async fn plan_attachments<'m>(
        &self,
        message: &'m SourceMessage,
        output_dir: &Path,
        dedupe: &DedupeIndex,
        stats: &mut BatchStats,
    ) -> std::result::Result<Vec<PlannedAttachment<'m>>, MessageError> {
        let max_bytes = self.config.download.max_attachment_bytes;
        let mut planned = Vec::new();
        let mut counts = BatchStats::default();

        for attachment in &message.attachments {
            let Some(kind) = classify(&attachment.filename, &self.config.extensions) else {
                tracing::debug!(filename = %attachment.filename, "unrecognised attachment type, ignored");
                continue;
            };
            counts.attachments_considered += 1;

            if dedupe.contains(attachment.id) {
                tracing::debug!(attachment_id = %attachment.id, "already archived, skipped");
                counts.attachments_skipped_dedupe += 1;
                continue;
            }
            if let (Some(limit), Some(size)) = (max_bytes, attachment.size)
                && size > limit
            {
                tracing::info!(attachment_id = %attachment.id, size, limit, "attachment over size limit, skipped");
                counts.attachments_skipped_size += 1;
                continue;
            }

            let name = sanitize_filename(&attachment.filename).ok_or_else(|| {
                MessageError::InvalidAttachmentName {
                    message: message.id,
                    id: attachment.id,
                    filename: attachment.filename.clone(),
                }
            })?;
            let relative = Path::new(kind.directory()).join(format!("{}_{}", attachment.id, name));
            planned.push(PlannedAttachment {
                attachment,
                relative,
            });
        }

        if !self.config.mode.skips_fetch() {
            let mut dirs: Vec<PathBuf> = planned
                .iter()
                .filter_map(|p| p.relative.parent().map(|d| output_dir.join(d)))
                .collect();
            dirs.dedup();
            for dir in dirs {
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|source| MessageError::MediaDirectory { path: dir, source })?;
            }
        }

        *stats += &counts;
        Ok(planned)
    }
}
