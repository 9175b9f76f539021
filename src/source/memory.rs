//! In-memory history source

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{HistoryQuery, HistorySource, SourceMessage};
use crate::error::{Error, Result, SourceError};
use crate::types::{ChannelId, MessageId};

#[derive(Clone, Debug)]
enum Entry {
    Message(SourceMessage),
    Malformed {
        created_at: DateTime<Utc>,
        reason: String,
    },
}

impl Entry {
    fn created_at(&self) -> DateTime<Utc> {
        match self {
            Entry::Message(m) => m.created_at,
            Entry::Malformed { created_at, .. } => *created_at,
        }
    }
}

#[derive(Default)]
struct Channel {
    entries: BTreeMap<MessageId, Entry>,
    access: Option<Access>,
    fail_after: Option<usize>,
}

#[derive(Clone, Copy)]
enum Access {
    Unreachable,
    Forbidden,
}

/// History source backed by an in-memory map
///
/// Honours every [`HistoryQuery`] bound, counts calls and records queries so
/// callers can assert how the engine used it. Faults can be injected per
/// channel.
#[derive(Default)]
pub struct MemoryHistorySource {
    channels: Mutex<HashMap<ChannelId, Channel>>,
    queries: Mutex<Vec<HistoryQuery>>,
    resolve_calls: AtomicUsize,
}

impl MemoryHistorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message to `channel`; a message with the same id is replaced
    pub fn push(&self, channel: ChannelId, message: SourceMessage) {
        self.with_channel(channel, |c| {
            c.entries.insert(message.id, Entry::Message(message));
        });
    }

    /// Add a message that the source will report as undecodable
    pub fn push_malformed(
        &self,
        channel: ChannelId,
        id: MessageId,
        created_at: DateTime<Utc>,
        reason: impl Into<String>,
    ) {
        let reason = reason.into();
        self.with_channel(channel, |c| {
            c.entries.insert(id, Entry::Malformed { created_at, reason });
        });
    }

    /// Make `channel` resolve as missing
    pub fn set_unreachable(&self, channel: ChannelId) {
        self.with_channel(channel, |c| c.access = Some(Access::Unreachable));
    }

    /// Make `channel` resolve as not readable
    pub fn set_forbidden(&self, channel: ChannelId) {
        self.with_channel(channel, |c| c.access = Some(Access::Forbidden));
    }

    /// End every stream for `channel` with a transport error after `n` items
    pub fn fail_after(&self, channel: ChannelId, n: usize) {
        self.with_channel(channel, |c| c.fail_after = Some(n));
    }

    /// Number of `stream` calls so far
    pub fn stream_calls(&self) -> usize {
        self.lock_queries().len()
    }

    /// Number of `resolve_channel` calls so far
    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    /// Every query received, in order
    pub fn queries(&self) -> Vec<HistoryQuery> {
        self.lock_queries().clone()
    }

    fn with_channel<R>(&self, channel: ChannelId, f: impl FnOnce(&mut Channel) -> R) -> R {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(channels.entry(channel).or_default())
    }

    fn lock_queries(&self) -> std::sync::MutexGuard<'_, Vec<HistoryQuery>> {
        self.queries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HistorySource for MemoryHistorySource {
    async fn resolve_channel(&self, channel: ChannelId) -> Result<()> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        match self.with_channel(channel, |c| c.access) {
            Some(Access::Unreachable) => Err(Error::ChannelUnreachable(channel)),
            Some(Access::Forbidden) => Err(Error::Forbidden(channel)),
            None => Ok(()),
        }
    }

    fn stream(
        &self,
        query: HistoryQuery,
    ) -> BoxStream<'_, std::result::Result<SourceMessage, SourceError>> {
        self.lock_queries().push(query);

        let (mut items, fail_after) = self.with_channel(query.channel, |c| {
            let items: Vec<_> = c
                .entries
                .iter()
                .rev()
                .filter(|(id, entry)| query.admits(**id, entry.created_at()))
                .take(query.limit.unwrap_or(usize::MAX))
                .map(|(id, entry)| match entry {
                    Entry::Message(m) => Ok(m.clone()),
                    Entry::Malformed { reason, .. } => Err(SourceError::Malformed {
                        id: Some(*id),
                        reason: reason.clone(),
                    }),
                })
                .collect();
            (items, c.fail_after)
        });

        if let Some(n) = fail_after {
            items.truncate(n);
            items.push(Err(SourceError::Transport("injected connection reset".into())));
        }

        futures::stream::iter(items).boxed()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures::TryStreamExt;

    fn message(id: u64, minute: u32) -> SourceMessage {
        SourceMessage {
            id: MessageId(id),
            author: "ana".into(),
            content: format!("message {id}"),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
            attachments: vec![],
        }
    }

    fn source_with(ids: &[u64]) -> MemoryHistorySource {
        let source = MemoryHistorySource::new();
        for (i, id) in ids.iter().enumerate() {
            source.push(ChannelId(1), message(*id, i as u32));
        }
        source
    }

    #[tokio::test]
    async fn yields_newest_first_within_limit() {
        let source = source_with(&[10, 20, 30, 40]);
        let query = HistoryQuery {
            limit: Some(3),
            ..HistoryQuery::new(ChannelId(1))
        };

        let ids: Vec<u64> = source
            .stream(query)
            .map_ok(|m| m.id.get())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(ids, vec![40, 30, 20]);
        assert_eq!(source.stream_calls(), 1);
    }

    #[tokio::test]
    async fn honours_before_and_after() {
        let source = source_with(&[10, 20, 30, 40]);
        let query = HistoryQuery {
            before: Some(MessageId(40)),
            after: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            ..HistoryQuery::new(ChannelId(1))
        };

        let ids: Vec<u64> = source
            .stream(query)
            .map_ok(|m| m.id.get())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(ids, vec![30, 20], "40 is excluded by before, 10 by after");
    }

    #[tokio::test]
    async fn malformed_entries_surface_in_place() {
        let source = source_with(&[10, 30]);
        source.push_malformed(
            ChannelId(1),
            MessageId(20),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap(),
            "bad payload",
        );

        let items: Vec<_> = source.stream(HistoryQuery::new(ChannelId(1))).collect().await;

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(matches!(
            items[1],
            Err(SourceError::Malformed {
                id: Some(MessageId(20)),
                ..
            })
        ));
        assert!(items[2].is_ok());
    }

    #[tokio::test]
    async fn injected_faults() {
        let source = source_with(&[10, 20, 30]);
        source.fail_after(ChannelId(1), 1);
        source.set_forbidden(ChannelId(2));
        source.set_unreachable(ChannelId(3));

        let items: Vec<_> = source.stream(HistoryQuery::new(ChannelId(1))).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(SourceError::Transport(_))));

        assert!(source.resolve_channel(ChannelId(1)).await.is_ok());
        assert!(matches!(
            source.resolve_channel(ChannelId(2)).await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            source.resolve_channel(ChannelId(3)).await,
            Err(Error::ChannelUnreachable(_))
        ));
        assert_eq!(source.resolve_calls(), 3);
    }
}
