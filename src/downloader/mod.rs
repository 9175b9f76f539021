//! Attachment downloader
//!
//! [`AttachmentDownloader::fetch`] turns one attachment URL into a local file,
//! applying the run mode first and then the retry policy from [`crate::retry`]:
//! 429 responses wait and never use up attempts, 5xx responses and transport
//! errors back off linearly until the attempt budget is spent, and every other
//! non-success status fails immediately.

mod classify;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use classify::classify;

use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crate::config::{Config, RunMode};
use crate::error::{Error, Result};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::upload::{UploadSink, media_remote_path, upload_best_effort};
use crate::utils::sibling_with_suffix;

/// Result of one attachment fetch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The attachment is (or, in preview modes, counts as) saved
    Saved,
    /// The attachment exceeds the size limit; nothing was written
    Skipped,
    /// The attachment could not be retrieved
    Failed {
        /// Why the fetch gave up
        reason: String,
    },
}

impl FetchOutcome {
    fn failed(reason: impl Into<String>) -> Self {
        FetchOutcome::Failed {
            reason: reason.into(),
        }
    }
}

enum BodyError {
    Transport(reqwest::Error),
    Io(std::io::Error),
    TooLarge(u64),
}

/// Downloads attachment bytes with retry, size limits and optional mirroring
pub struct AttachmentDownloader {
    client: reqwest::Client,
    policy: RetryPolicy,
    mode: RunMode,
    max_bytes: Option<u64>,
    sink: Option<Arc<dyn UploadSink>>,
    remote_prefix: String,
}

impl AttachmentDownloader {
    /// Create a downloader; `sink` receives saved files when uploads are enabled
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: &Config, sink: Arc<dyn UploadSink>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.download.timeout)
            .user_agent(concat!("channel-archiver/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            policy: RetryPolicy::from_config(&config.download),
            mode: config.mode,
            max_bytes: config.download.max_attachment_bytes,
            sink: config.storage.enable_uploads.then_some(sink),
            remote_prefix: config.storage.remote_prefix.clone(),
        })
    }

    /// Fetch `url` into `dest`
    ///
    /// Writes at most one file. Preview modes report [`FetchOutcome::Saved`]
    /// without any network or disk access.
    pub async fn fetch(&self, url: &str, dest: &Path) -> FetchOutcome {
        if self.mode.count_only || self.mode.metadata_only {
            tracing::debug!(url, "attachment counted, not fetched");
            return FetchOutcome::Saved;
        }
        if self.mode.dry_run {
            tracing::info!(url, dest = %dest.display(), "dry run: would download");
            return FetchOutcome::Saved;
        }

        let mut attempt = 1;
        loop {
            let decision = match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    match self.policy.on_status(status, response.headers(), attempt) {
                        RetryDecision::Proceed => match self.write_body(response, dest).await {
                            Ok(bytes) => {
                                tracing::info!(url, dest = %dest.display(), bytes, attempt, "attachment saved");
                                self.mirror(dest).await;
                                return FetchOutcome::Saved;
                            }
                            Err(BodyError::TooLarge(size)) => {
                                tracing::info!(url, size, limit = ?self.max_bytes, "attachment over size limit, skipped");
                                return FetchOutcome::Skipped;
                            }
                            Err(BodyError::Io(e)) => {
                                tracing::error!(url, dest = %dest.display(), error = %e, "could not write attachment");
                                return FetchOutcome::failed(format!("write failed: {}", e));
                            }
                            Err(BodyError::Transport(e)) => match self.policy.on_transport_error(attempt) {
                                RetryDecision::GiveUp => {
                                    tracing::warn!(url, error = %e, attempts = attempt, "body transfer failed, giving up");
                                    return FetchOutcome::failed(format!(
                                        "body transfer failed after {} attempts: {}",
                                        attempt, e
                                    ));
                                }
                                wait => {
                                    tracing::warn!(url, error = %e, attempt, "body transfer failed, retrying");
                                    wait
                                }
                            },
                        },
                        RetryDecision::GiveUp if status.is_server_error() => {
                            tracing::warn!(url, %status, attempts = attempt, "server errors outlasted retries");
                            return FetchOutcome::failed(format!(
                                "HTTP {} after {} attempts",
                                status, attempt
                            ));
                        }
                        RetryDecision::GiveUp => {
                            tracing::warn!(url, %status, "attachment request rejected");
                            return FetchOutcome::failed(format!("HTTP {}", status));
                        }
                        wait => {
                            tracing::warn!(url, %status, attempt, "attachment request not successful, retrying");
                            wait
                        }
                    }
                }
                Err(e) => match self.policy.on_transport_error(attempt) {
                    RetryDecision::GiveUp => {
                        tracing::warn!(url, error = %e, attempts = attempt, "transport errors outlasted retries");
                        return FetchOutcome::failed(format!(
                            "request failed after {} attempts: {}",
                            attempt, e
                        ));
                    }
                    wait => {
                        tracing::warn!(url, error = %e, attempt, "transport error, retrying");
                        wait
                    }
                },
            };

            if let RetryDecision::Wait {
                delay,
                consumes_attempt,
            } = decision
            {
                tokio::time::sleep(delay).await;
                if consumes_attempt {
                    attempt += 1;
                }
            }
        }
    }

    /// Stream the body into `<dest>.part`, then rename it into place
    async fn write_body(
        &self,
        mut response: reqwest::Response,
        dest: &Path,
    ) -> std::result::Result<u64, BodyError> {
        if let (Some(limit), Some(declared)) = (self.max_bytes, response.content_length())
            && declared > limit
        {
            return Err(BodyError::TooLarge(declared));
        }

        let part = sibling_with_suffix(dest, ".part");
        let mut file = tokio::fs::File::create(&part).await.map_err(BodyError::Io)?;
        let mut written: u64 = 0;

        let outcome = loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    written += chunk.len() as u64;
                    if self.max_bytes.is_some_and(|limit| written > limit) {
                        break Err(BodyError::TooLarge(written));
                    }
                    if let Err(e) = file.write_all(&chunk).await {
                        break Err(BodyError::Io(e));
                    }
                }
                Ok(None) => break file.flush().await.map_err(BodyError::Io),
                Err(e) => break Err(BodyError::Transport(e)),
            }
        };
        drop(file);

        match outcome {
            Ok(()) => {
                tokio::fs::rename(&part, dest).await.map_err(BodyError::Io)?;
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }

    async fn mirror(&self, dest: &Path) {
        if let Some(sink) = &self.sink {
            let remote = media_remote_path(&self.remote_prefix, dest);
            upload_best_effort(sink.as_ref(), dest, &remote).await;
        }
    }
}
