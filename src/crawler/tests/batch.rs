use super::*;
use crate::error::SourceError;

struct Fixture {
    _dir: TempDir,
    server: MockServer,
    config: Config,
    source: MemoryHistorySource,
    sink: RecordingUploadSink,
}

impl Fixture {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        Self {
            _dir: dir,
            server: MockServer::start().await,
            config,
            source: MemoryHistorySource::new(),
            sink: RecordingUploadSink::new(),
        }
    }

    fn url(&self, file: &str) -> String {
        format!("{}/{}", self.server.uri(), file)
    }

    async fn dedupe(&self) -> DedupeIndex {
        DedupeIndex::load(self.config.dedupe_path(CHANNEL)).await
    }

    async fn run(&self, dedupe: &mut DedupeIndex, limit: Option<usize>) -> Result<BatchOutcome> {
        let downloader = AttachmentDownloader::new(&self.config, Arc::new(RecordingUploadSink::new())).unwrap();
        let batch = CrawlBatch::new(&self.config, &self.source, &downloader, &self.sink);
        batch
            .run(
                dedupe,
                BatchParams {
                    channel: CHANNEL,
                    limit,
                    after: None,
                    before: None,
                    batch_no: 1,
                    run_started: at(59),
                },
            )
            .await
    }
}

#[tokio::test]
async fn saved_attachment_is_recorded_and_deduped() {
    let fx = Fixture::new().await;
    serve(&fx.server, "cat.png", b"png").await;
    fx.source.push(
        CHANNEL,
        message(1, vec![attachment(10, "Cat.PNG", fx.url("cat.png"), Some(3))]),
    );

    let mut dedupe = fx.dedupe().await;
    let outcome = fx.run(&mut dedupe, None).await.unwrap();

    assert_eq!(outcome.stats.messages_processed, 1);
    assert_eq!(outcome.stats.attachments_considered, 1);
    assert_eq!(outcome.stats.attachments_downloaded, 1);
    assert_eq!(outcome.oldest_id, Some(MessageId(1)));
    assert_eq!(outcome.stats.oldest_message_at, Some(at(1)));
    assert!(dedupe.contains(AttachmentId(10)));

    let out = fx.config.output_dir(CHANNEL);
    assert_eq!(std::fs::read(out.join("scraped_images/10_Cat.PNG")).unwrap(), b"png");

    let archive = read_archive(&fx.config, outcome.archive.as_deref().unwrap());
    assert_eq!(archive[0]["attachments"][0], "scraped_images/10_Cat.PNG");
    assert_eq!(archive[0]["author"], "ana");
    assert_eq!(archive[0]["timestamp"], "2024-01-01T10:01:00+00:00");
}

#[tokio::test]
async fn dedupe_hit_skips_without_request() {
    let fx = Fixture::new().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fx.server)
        .await;
    fx.source.push(
        CHANNEL,
        message(1, vec![attachment(10, "a.png", fx.url("a.png"), None)]),
    );

    let mut dedupe = fx.dedupe().await;
    dedupe.record(AttachmentId(10), "a.png").await.unwrap();
    let outcome = fx.run(&mut dedupe, None).await.unwrap();

    assert_eq!(outcome.stats.attachments_skipped_dedupe, 1);
    assert_eq!(outcome.stats.attachments_downloaded, 0);
    let archive = read_archive(&fx.config, outcome.archive.as_deref().unwrap());
    assert_eq!(archive[0]["attachments"], serde_json::json!([]));
    assert_eq!(archive[0]["errors"], serde_json::json!([]));
}

#[tokio::test]
async fn declared_size_over_limit_skips_before_request() {
    let mut fx = Fixture::new().await;
    fx.config.download.max_attachment_bytes = Some(50);
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fx.server)
        .await;
    fx.source.push(
        CHANNEL,
        message(1, vec![attachment(10, "big.mp4", fx.url("big.mp4"), Some(100))]),
    );

    let mut dedupe = fx.dedupe().await;
    let outcome = fx.run(&mut dedupe, None).await.unwrap();

    assert_eq!(outcome.stats.attachments_considered, 1);
    assert_eq!(outcome.stats.attachments_skipped_size, 1);
    assert!(dedupe.is_empty());
}

#[tokio::test]
async fn unrecognised_attachments_are_ignored() {
    let fx = Fixture::new().await;
    fx.source.push(
        CHANNEL,
        message(1, vec![attachment(11, "setup.exe", fx.url("setup.exe"), Some(5))]),
    );

    let mut dedupe = fx.dedupe().await;
    let outcome = fx.run(&mut dedupe, None).await.unwrap();

    assert_eq!(outcome.stats.messages_processed, 1);
    assert_eq!(outcome.stats.attachments_considered, 0);
    assert_eq!(outcome.stats.attachments_failed, 0);
    assert!(fx.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_attachment_lands_in_errors() {
    let fx = Fixture::new().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&fx.server)
        .await;
    let url = fx.url("gone.pdf");
    fx.source.push(
        CHANNEL,
        message(1, vec![attachment(12, "gone.pdf", url.clone(), None)]),
    );

    let mut dedupe = fx.dedupe().await;
    let outcome = fx.run(&mut dedupe, None).await.unwrap();

    assert_eq!(outcome.stats.attachments_failed, 1);
    assert_eq!(outcome.stats.messages_processed, 1);
    assert!(!dedupe.contains(AttachmentId(12)));
    let archive = read_archive(&fx.config, outcome.archive.as_deref().unwrap());
    assert_eq!(
        archive[0]["errors"],
        serde_json::json!([{"filename": "gone.pdf", "url": url}])
    );
}

#[tokio::test]
async fn malformed_message_is_skipped_and_batch_continues() {
    let fx = Fixture::new().await;
    fx.source.push(CHANNEL, message(1, vec![]));
    fx.source
        .push_malformed(CHANNEL, MessageId(2), at(2), "missing author");
    fx.source.push(CHANNEL, message(3, vec![]));

    let mut dedupe = fx.dedupe().await;
    let outcome = fx.run(&mut dedupe, None).await.unwrap();

    assert_eq!(outcome.stats.messages_processed, 2);
    assert_eq!(outcome.stats.messages_skipped, 1);
    assert_eq!(outcome.stats.messages_seen(), 3);
    let archive = read_archive(&fx.config, outcome.archive.as_deref().unwrap());
    assert_eq!(archive.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unusable_media_directory_skips_only_that_message() {
    let fx = Fixture::new().await;
    serve(&fx.server, "doc.pdf", b"pdf").await;
    let out = fx.config.output_dir(CHANNEL);
    std::fs::create_dir_all(&out).unwrap();
    // A regular file where the image directory should be
    std::fs::write(out.join("scraped_images"), "occupied").unwrap();

    fx.source.push(
        CHANNEL,
        message(1, vec![attachment(10, "a.png", fx.url("a.png"), None)]),
    );
    fx.source.push(
        CHANNEL,
        message(2, vec![attachment(20, "doc.pdf", fx.url("doc.pdf"), None)]),
    );

    let mut dedupe = fx.dedupe().await;
    let outcome = fx.run(&mut dedupe, None).await.unwrap();

    assert_eq!(outcome.stats.messages_processed, 1);
    assert_eq!(outcome.stats.messages_skipped, 1);
    assert_eq!(outcome.stats.attachments_downloaded, 1);
    assert!(dedupe.contains(AttachmentId(20)));
    assert!(!dedupe.contains(AttachmentId(10)));
}

#[tokio::test]
async fn transport_failure_aborts_batch_without_archive() {
    let fx = Fixture::new().await;
    for id in 1..=3 {
        fx.source.push(CHANNEL, message(id, vec![]));
    }
    fx.source.fail_after(CHANNEL, 1);

    let mut dedupe = fx.dedupe().await;
    let err = fx.run(&mut dedupe, None).await.unwrap_err();

    assert!(matches!(err, Error::Source(SourceError::Transport(_))));
    assert!(!fx.config.output_dir(CHANNEL).join(ARCHIVE_DIR).exists());
}

#[tokio::test]
async fn dedupe_log_failure_escalates() {
    let fx = Fixture::new().await;
    serve(&fx.server, "a.png", b"png").await;
    fx.source.push(
        CHANNEL,
        message(1, vec![attachment(10, "a.png", fx.url("a.png"), None)]),
    );
    // The dedupe log path is a directory, so appends fail
    std::fs::create_dir_all(fx.config.dedupe_path(CHANNEL)).unwrap();

    let mut dedupe = fx.dedupe().await;
    let err = fx.run(&mut dedupe, None).await.unwrap_err();

    assert!(matches!(err, Error::Io(_)), "got {err:?}");
}

#[tokio::test]
async fn limit_bounds_the_batch_and_reports_oldest_id() {
    let fx = Fixture::new().await;
    for id in 1..=5 {
        fx.source.push(CHANNEL, message(id, vec![]));
    }

    let mut dedupe = fx.dedupe().await;
    let outcome = fx.run(&mut dedupe, Some(2)).await.unwrap();

    assert_eq!(outcome.stats.messages_processed, 2);
    assert_eq!(outcome.oldest_id, Some(MessageId(4)));
    assert_eq!(outcome.stats.oldest_message_at, Some(at(4)));
}

#[tokio::test]
async fn uploads_archive_when_enabled() {
    let mut fx = Fixture::new().await;
    fx.config.storage.enable_uploads = true;
    fx.source.push(CHANNEL, message(1, vec![]));

    let mut dedupe = fx.dedupe().await;
    let outcome = fx.run(&mut dedupe, None).await.unwrap();

    let archive = outcome.archive.unwrap();
    let uploads = fx.sink.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, fx.config.output_dir(CHANNEL).join(&archive));
    assert_eq!(
        uploads[0].1,
        format!("/DiscordBot/{}", archive.to_string_lossy())
    );
}

#[tokio::test]
async fn count_only_writes_nothing() {
    let mut fx = Fixture::new().await;
    fx.config.mode.count_only = true;
    fx.source.push(
        CHANNEL,
        message(1, vec![attachment(10, "a.png", fx.url("a.png"), None)]),
    );

    let mut dedupe = fx.dedupe().await;
    let outcome = fx.run(&mut dedupe, None).await.unwrap();

    assert_eq!(outcome.stats.attachments_downloaded, 1);
    assert!(outcome.archive.is_none());
    assert!(dedupe.is_empty());
    assert!(!fx.config.output_dir(CHANNEL).exists());
    assert!(fx.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn metadata_only_writes_archive_but_no_media() {
    let mut fx = Fixture::new().await;
    fx.config.mode.metadata_only = true;
    fx.source.push(
        CHANNEL,
        message(1, vec![attachment(10, "a.png", fx.url("a.png"), None)]),
    );

    let mut dedupe = fx.dedupe().await;
    let outcome = fx.run(&mut dedupe, None).await.unwrap();

    let archive = read_archive(&fx.config, outcome.archive.as_deref().unwrap());
    assert_eq!(archive[0]["attachments"][0], "scraped_images/10_a.png");
    assert!(!fx.config.output_dir(CHANNEL).join("scraped_images").exists());
    assert!(dedupe.is_empty());
}

#[tokio::test]
async fn undecodable_message_with_readable_id_sets_oldest_id() {
    let fx = Fixture::new().await;
    fx.source
        .push_malformed(CHANNEL, MessageId(7), at(7), "bad payload");

    let mut dedupe = fx.dedupe().await;
    let outcome = fx.run(&mut dedupe, None).await.unwrap();

    assert_eq!(outcome.stats.messages_skipped, 1);
    assert_eq!(outcome.stats.messages_processed, 0);
    assert_eq!(outcome.oldest_id, Some(MessageId(7)));
}
