//! channel-archiver command line entry point

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use channel_archiver::config::LogConfig;
use channel_archiver::crawler::summarize;
use channel_archiver::source::DiscordHistorySource;
use channel_archiver::upload::{LocalMirrorSink, NoOpUploadSink, UploadSink};
use channel_archiver::{Archiver, ChannelId, Config};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Archive channel messages and attachments incrementally
#[derive(Debug, Parser)]
#[command(name = "channel-archiver", version, about)]
struct Cli {
    /// Channel to archive (repeatable, or a comma separated list)
    #[arg(short, long = "channel", value_delimiter = ',')]
    channels: Vec<ChannelId>,

    /// Walk history backward instead of fetching the latest messages
    #[arg(long)]
    backfill: bool,

    /// Keep running backfill batches until history is exhausted
    #[arg(long)]
    autorun: bool,

    /// Fetch and count but write nothing
    #[arg(long)]
    dry_run: bool,

    /// Write archives but download no media
    #[arg(long, conflicts_with = "count_only")]
    metadata_only: bool,

    /// Only count messages and attachments
    #[arg(long)]
    count_only: bool,

    /// Maximum messages per latest-mode run
    #[arg(long)]
    limit: Option<usize>,

    /// Ignore messages older than this many days
    #[arg(long)]
    since_days: Option<u32>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if !self.channels.is_empty() {
            config.channels = self.channels;
        }
        config.crawl.backfill |= self.backfill;
        config.crawl.autorun |= self.autorun;
        config.mode.dry_run |= self.dry_run;
        config.mode.metadata_only |= self.metadata_only;
        config.mode.count_only |= self.count_only;
        if self.limit.is_some() {
            config.crawl.limit = self.limit;
        }
        if self.since_days.is_some() {
            config.crawl.since_days = self.since_days;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let verbose = cli.verbose;

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("channel-archiver: {e}");
            return ExitCode::from(2);
        }
    };
    cli.apply(&mut config);
    init_logging(&config.logging, verbose);

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        return ExitCode::from(2);
    }

    match run(config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "archiver could not start");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every channel succeeded
async fn run(config: Config) -> channel_archiver::Result<bool> {
    let source = DiscordHistorySource::new(&config.discord, &config.download)?;
    let sink: Arc<dyn UploadSink> = match (&config.storage.mirror_dir, config.storage.enable_uploads) {
        (Some(dir), true) => Arc::new(LocalMirrorSink::new(dir)),
        (None, true) => {
            tracing::warn!("uploads enabled but MIRROR_DIR is unset, nothing will be mirrored");
            Arc::new(NoOpUploadSink)
        }
        _ => Arc::new(NoOpUploadSink),
    };

    tracing::info!(
        channels = config.channels.len(),
        mode = %config.crawl_mode(),
        dry_run = config.mode.dry_run,
        "starting archive run"
    );
    let archiver = Archiver::new(Arc::new(config), Arc::new(source), sink)?;
    let reports = archiver.run_all().await;

    let (ok, failed, stats) = summarize(&reports);
    tracing::info!(
        channels_ok = ok,
        channels_failed = failed,
        messages = stats.messages_processed,
        downloaded = stats.attachments_downloaded,
        failed_attachments = stats.attachments_failed,
        "run finished"
    );
    Ok(failed == 0)
}

fn init_logging(config: &LogConfig, verbose: bool) {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        EnvFilter::new("channel_archiver=debug,info")
    } else {
        EnvFilter::new("info")
    };

    let file_layer = if config.log_to_file {
        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_path)
        {
            Ok(file) => Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
            Err(e) => {
                eprintln!(
                    "channel-archiver: cannot open log file {}: {e}",
                    config.log_path.display()
                );
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(verbose))
        .with(file_layer)
        .try_init()
        .ok();
}
