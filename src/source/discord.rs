//! Discord REST history source

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::collections::VecDeque;

use super::{HistoryQuery, HistorySource, SourceAttachment, SourceMessage};
use crate::config::{DiscordConfig, DownloadConfig};
use crate::error::{Error, Result, SourceError};
use crate::retry::{RetryPolicy, send_with_retry};
use crate::types::{AttachmentId, ChannelId, MessageId};

/// Largest page the messages endpoint serves
const MAX_PAGE_SIZE: usize = 100;

/// History source reading a channel through the Discord REST API with a bot token
pub struct DiscordHistorySource {
    client: reqwest::Client,
    api_base: String,
    token: String,
    policy: RetryPolicy,
    page_size: usize,
}

impl DiscordHistorySource {
    /// Create a source from connection and request settings
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(discord: &DiscordConfig, download: &DownloadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(download.timeout)
            .user_agent(concat!("channel-archiver/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: discord.api_base.trim_end_matches('/').to_string(),
            token: discord.token.clone(),
            policy: RetryPolicy::from_config(download),
            page_size: MAX_PAGE_SIZE,
        })
    }

    /// Request at most `size` messages per page (clamped to 1..=100)
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header(AUTHORIZATION, format!("Bot {}", self.token))
    }

    async fn fetch_page(
        &self,
        channel: ChannelId,
        before: Option<MessageId>,
        limit: usize,
    ) -> std::result::Result<Vec<serde_json::Value>, SourceError> {
        let url = format!("{}/channels/{}/messages", self.api_base, channel);
        let mut params = vec![("limit", limit.to_string())];
        if let Some(before) = before {
            params.push(("before", before.to_string()));
        }

        let response = send_with_retry(&self.policy, "history page", || {
            self.get(&url).query(&params)
        })
        .await
        .map_err(|e| SourceError::Transport(e.to_string()))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(SourceError::Unreachable(channel)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SourceError::Forbidden(channel));
            }
            other => {
                return Err(SourceError::Transport(format!(
                    "unexpected status {} from {}",
                    other, url
                )));
            }
        }

        response
            .json::<Vec<serde_json::Value>>()
            .await
            .map_err(|e| SourceError::Transport(format!("invalid history page: {}", e)))
    }
}

struct Walk {
    before: Option<MessageId>,
    remaining: Option<usize>,
    buffer: VecDeque<std::result::Result<SourceMessage, SourceError>>,
    exhausted: bool,
}

impl Walk {
    fn take_slot(&mut self) -> bool {
        match &mut self.remaining {
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
            None => true,
        }
    }

    /// Every id left to walk predates the `after` bound
    fn below_floor(&self, after: Option<DateTime<Utc>>) -> bool {
        match (self.before, after) {
            (Some(before), Some(after)) => before <= MessageId::from_timestamp(after),
            _ => false,
        }
    }

    /// Buffer one page; returns false when nothing in it moved the cursor
    fn absorb(&mut self, page: Vec<serde_json::Value>, after: Option<DateTime<Utc>>) -> bool {
        let mut advanced = false;
        for value in page {
            let id = raw_id(&value);
            if let Some(id) = id {
                self.before = Some(self.before.map_or(id, |b| b.min(id)));
                advanced = true;
            }
            let item = match WireMessage::deserialize(&value) {
                Ok(wire) => {
                    let message = wire.into_message();
                    if after.is_some_and(|after| message.created_at <= after) {
                        self.exhausted = true;
                        break;
                    }
                    Ok(message)
                }
                Err(e) => Err(SourceError::Malformed {
                    id,
                    reason: e.to_string(),
                }),
            };
            if !self.take_slot() {
                break;
            }
            self.buffer.push_back(item);
        }
        advanced
    }
}

#[async_trait]
impl HistorySource for DiscordHistorySource {
    async fn resolve_channel(&self, channel: ChannelId) -> Result<()> {
        let url = format!("{}/channels/{}", self.api_base, channel);
        let response = send_with_retry(&self.policy, "resolve channel", || self.get(&url))
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        match response.status() {
            s if s.is_success() => {
                tracing::debug!(%channel, "channel resolved");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(Error::ChannelUnreachable(channel)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Forbidden(channel)),
            other => Err(Error::Source(SourceError::Transport(format!(
                "unexpected status {} resolving channel {}",
                other, channel
            )))),
        }
    }

    fn stream(
        &self,
        query: HistoryQuery,
    ) -> BoxStream<'_, std::result::Result<SourceMessage, SourceError>> {
        let walk = Walk {
            before: query.before,
            remaining: query.limit,
            buffer: VecDeque::new(),
            exhausted: false,
        };

        futures::stream::unfold(walk, move |mut walk| async move {
            loop {
                if let Some(item) = walk.buffer.pop_front() {
                    return Some((item, walk));
                }
                if walk.exhausted || walk.remaining == Some(0) || walk.below_floor(query.after) {
                    return None;
                }

                let page_limit = walk
                    .remaining
                    .map_or(self.page_size, |r| r.min(self.page_size));
                match self.fetch_page(query.channel, walk.before, page_limit).await {
                    Ok(page) => {
                        tracing::debug!(channel = %query.channel, before = ?walk.before, received = page.len(), "history page fetched");
                        if page.len() < page_limit {
                            walk.exhausted = true;
                        }
                        if !walk.absorb(page, query.after) {
                            walk.exhausted = true;
                        }
                    }
                    Err(e) => {
                        walk.exhausted = true;
                        return Some((Err(e), walk));
                    }
                }
            }
        })
        .boxed()
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

impl RawId {
    fn get(&self) -> Option<u64> {
        match self {
            RawId::Text(s) => s.parse().ok(),
            RawId::Number(n) => Some(*n),
        }
    }
}

fn snowflake<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: From<u64>,
{
    RawId::deserialize(deserializer)?
        .get()
        .map(T::from)
        .ok_or_else(|| serde::de::Error::custom("snowflake is not an unsigned integer"))
}

fn raw_id(value: &serde_json::Value) -> Option<MessageId> {
    RawId::deserialize(value.get("id")?).ok()?.get().map(MessageId)
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(deserialize_with = "snowflake")]
    id: MessageId,
    author: WireAuthor,
    #[serde(default)]
    content: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    attachments: Vec<WireAttachment>,
}

#[derive(Deserialize)]
struct WireAuthor {
    username: String,
}

#[derive(Deserialize)]
struct WireAttachment {
    #[serde(deserialize_with = "snowflake")]
    id: AttachmentId,
    filename: String,
    url: String,
    #[serde(default)]
    size: Option<u64>,
}

impl WireMessage {
    fn into_message(self) -> SourceMessage {
        SourceMessage {
            id: self.id,
            author: self.author.username,
            content: self.content,
            created_at: self.timestamp,
            attachments: self
                .attachments
                .into_iter()
                .map(|a| SourceAttachment {
                    id: a.id,
                    filename: a.filename,
                    url: a.url,
                    size: a.size,
                })
                .collect(),
        }
    }
}
