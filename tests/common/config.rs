//! Configuration builders for integration tests

use channel_archiver::{ChannelId, Config};
use std::time::Duration;
use tempfile::TempDir;

/// Channel every integration scenario archives
pub const CHANNEL: ChannelId = ChannelId(777);

/// Config rooted in `dir` with fast retries and no autorun pause
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config {
        channels: vec![CHANNEL],
        ..Config::default()
    };
    config.storage.output_dir = dir.path().join("out");
    config.storage.state_dir = dir.path().join("state");
    config.storage.event_log = Some(dir.path().join("events.jsonl"));
    config.download.backoff_base = Duration::from_millis(10);
    config.download.rate_limit_backoff = Some(Duration::from_millis(5));
    config.crawl.autorun_sleep = Duration::ZERO;
    config
}
