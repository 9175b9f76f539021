//! Tests for batch crawling and orchestration.

mod batch;

use super::*;
use crate::source::{MemoryHistorySource, SourceAttachment, SourceMessage};
use crate::types::{AttachmentId, MessageId};
use crate::upload::RecordingUploadSink;
use chrono::{DateTime, TimeZone};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub(super) const CHANNEL: ChannelId = ChannelId(4242);

pub(super) fn test_config(dir: &TempDir) -> Config {
    let mut config = Config {
        channels: vec![CHANNEL],
        ..Config::default()
    };
    config.storage.output_dir = dir.path().join("out");
    config.storage.state_dir = dir.path().join("state");
    config.download.backoff_base = Duration::from_millis(10);
    config.download.rate_limit_backoff = Some(Duration::from_millis(5));
    config.crawl.autorun_sleep = Duration::ZERO;
    config
}

pub(super) fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 10, minute, 0).unwrap()
}

pub(super) fn message(id: u64, attachments: Vec<SourceAttachment>) -> SourceMessage {
    SourceMessage {
        id: MessageId(id),
        author: "ana".into(),
        content: format!("message {id}"),
        created_at: at((id % 60) as u32),
        attachments,
    }
}

pub(super) fn attachment(id: u64, filename: &str, url: String, size: Option<u64>) -> SourceAttachment {
    SourceAttachment {
        id: AttachmentId(id),
        filename: filename.into(),
        url,
        size,
    }
}

/// Source holding messages with ids `1..=count` and no attachments
pub(super) fn plain_source(count: u64) -> Arc<MemoryHistorySource> {
    let source = MemoryHistorySource::new();
    for id in 1..=count {
        source.push(CHANNEL, message(id, vec![]));
    }
    Arc::new(source)
}

pub(super) fn archiver(config: &Config, source: Arc<MemoryHistorySource>) -> Archiver {
    Archiver::new(
        Arc::new(config.clone()),
        source,
        Arc::new(RecordingUploadSink::new()),
    )
    .unwrap()
}

pub(super) async fn serve(server: &MockServer, file: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/{file}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

pub(super) fn read_state(config: &Config) -> serde_json::Value {
    let raw = std::fs::read_to_string(config.state_path(CHANNEL)).unwrap();
    serde_json::from_str(&raw).unwrap()
}

pub(super) fn read_archive(config: &Config, relative: &std::path::Path) -> serde_json::Value {
    let raw = std::fs::read_to_string(config.output_dir(CHANNEL).join(relative)).unwrap();
    serde_json::from_str(&raw).unwrap()
}
