//! Tests for the attachment downloader.


use super::*;
use crate::upload::RecordingUploadSink;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::{Request, Respond, ResponseTemplate};

pub(super) fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.output_dir = dir.path().to_path_buf();
    config.download.backoff_base = Duration::from_millis(40);
    config.download.rate_limit_backoff = Some(Duration::from_millis(5));
    config.download.timeout = Duration::from_secs(5);
    config
}

pub(super) fn downloader(config: &Config) -> (AttachmentDownloader, Arc<RecordingUploadSink>) {
    let sink = Arc::new(RecordingUploadSink::new());
    let downloader = AttachmentDownloader::new(config, sink.clone()).unwrap();
    (downloader, sink)
}

/// Answers `failures` times with `status`, then 200 with `body`, recording when each request arrived
pub(super) struct Scripted {
    pub failures: usize,
    pub status: u16,
    pub body: &'static [u8],
    pub arrivals: Arc<Mutex<Vec<Instant>>>,
}

impl Scripted {
    pub fn new(failures: usize, status: u16) -> Self {
        Self {
            failures,
            status,
            body: b"attachment bytes",
            arrivals: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Respond for Scripted {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let mut arrivals = self.arrivals.lock().unwrap();
        arrivals.push(Instant::now());
        if arrivals.len() <= self.failures {
            ResponseTemplate::new(self.status)
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.body)
        }
    }
}
