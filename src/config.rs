//! Configuration types for channel-archiver
//!
//! A [`Config`] is built once at startup (defaults, then environment, then
//! command-line overrides) and shared read-only with the engine.

use crate::error::{Error, Result};
use crate::types::{ChannelId, CrawlMode};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, time::Duration};

/// Main configuration for an archive run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Channels to archive, processed in order
    #[serde(default)]
    pub channels: Vec<ChannelId>,

    /// Per-channel state/output directory overrides
    #[serde(default)]
    pub channel_overrides: HashMap<ChannelId, ChannelPaths>,

    /// Cursor and batching behaviour
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Preview and measurement toggles
    #[serde(default)]
    pub mode: RunMode,

    /// Attachment fetch policy
    #[serde(default)]
    pub download: DownloadConfig,

    /// Extension sets used to classify attachments
    #[serde(default)]
    pub extensions: ExtensionConfig,

    /// Local directories, mirroring and the event log
    #[serde(default)]
    pub storage: StorageConfig,

    /// Platform connection settings
    #[serde(default)]
    pub discord: DiscordConfig,

    /// Log sink settings used by the binary
    #[serde(default)]
    pub logging: LogConfig,
}

/// Directory overrides for a single channel
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPaths {
    /// Where this channel's cursor file and dedupe log live
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Where this channel's media and archive files are written
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

/// Cursor and batching configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Maximum messages per latest-mode run (None = unlimited)
    #[serde(default)]
    pub limit: Option<usize>,

    /// Only fetch messages from the last N days in latest mode
    #[serde(default)]
    pub since_days: Option<u32>,

    /// Persist and honour the last successful run time (default: true)
    #[serde(default = "default_true")]
    pub use_last_run: bool,

    /// Walk older history instead of fetching the latest messages
    #[serde(default)]
    pub backfill: bool,

    /// Messages per backfill batch (default: 200)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Keep running backfill batches until history is exhausted
    #[serde(default)]
    pub autorun: bool,

    /// Pause between autorun batches (default: 10 seconds)
    #[serde(default = "default_autorun_sleep", with = "duration_serde")]
    pub autorun_sleep: Duration,

    /// Maximum backfill batches per invocation (0 = unlimited)
    #[serde(default)]
    pub max_batches: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            limit: None,
            since_days: None,
            use_last_run: true,
            backfill: false,
            batch_size: default_batch_size(),
            autorun: false,
            autorun_sleep: default_autorun_sleep(),
            max_batches: 0,
        }
    }
}

/// Toggles that trade completeness for speed or safety
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMode {
    /// Log what would be fetched; write nothing
    #[serde(default)]
    pub dry_run: bool,
    /// Archive message records but do not fetch attachment bytes
    #[serde(default)]
    pub metadata_only: bool,
    /// Only count messages and attachments; no fetches, no archive files
    #[serde(default)]
    pub count_only: bool,
}

impl RunMode {
    /// Attachments are reported saved without any network I/O
    pub fn skips_fetch(&self) -> bool {
        self.dry_run || self.metadata_only || self.count_only
    }

    /// Saved attachments are recorded in the dedupe index
    pub fn records_dedupe(&self) -> bool {
        !self.skips_fetch()
    }

    /// A batch archive file is written
    pub fn writes_archive(&self) -> bool {
        !self.count_only && !self.dry_run
    }

    /// Cursor files may be created and updated
    pub fn persists_state(&self) -> bool {
        !self.dry_run
    }
}

/// Attachment download configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum fetch attempts for transient failures (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Linear backoff unit; attempt N waits N times this (default: 2 seconds)
    #[serde(default = "default_backoff_base", with = "duration_serde")]
    pub backoff_base: Duration,

    /// Wait after a 429 without a Retry-After hint (default: backoff_base)
    #[serde(default, with = "optional_duration_serde")]
    pub rate_limit_backoff: Option<Duration>,

    /// Total timeout for one request (default: 30 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Skip attachments larger than this many bytes (None = no limit)
    #[serde(default)]
    pub max_attachment_bytes: Option<u64>,

    /// Add random jitter to backoff delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl DownloadConfig {
    /// Wait applied to a rate-limited response that carries no hint
    pub fn rate_limit_fallback(&self) -> Duration {
        self.rate_limit_backoff.unwrap_or(self.backoff_base)
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base: default_backoff_base(),
            rate_limit_backoff: None,
            timeout: default_timeout(),
            max_attachment_bytes: None,
            jitter: false,
        }
    }
}

/// Extension allow-lists, stored lower-case with a leading dot
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtensionConfig {
    /// Image suffixes (default: .png .jpg .jpeg .gif)
    #[serde(default = "default_image_extensions")]
    pub image: Vec<String>,
    /// Video suffixes (default: .mp4 .mov .webm .mkv .avi)
    #[serde(default = "default_video_extensions")]
    pub video: Vec<String>,
    /// Document suffixes (default: .pdf .txt .doc .docx .zip)
    #[serde(default = "default_document_extensions")]
    pub document: Vec<String>,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            image: default_image_extensions(),
            video: default_video_extensions(),
            document: default_document_extensions(),
        }
    }
}

/// Storage layout and mirroring
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for media and archive directories (default: ".")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Directory holding cursor files and dedupe logs (default: "state")
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Forward saved files to the upload sink
    #[serde(default)]
    pub enable_uploads: bool,

    /// Local directory used as the mirror when uploads are enabled
    #[serde(default)]
    pub mirror_dir: Option<PathBuf>,

    /// Prefix for remote paths (default: "/DiscordBot")
    #[serde(default = "default_remote_prefix")]
    pub remote_prefix: String,

    /// JSON-lines structured event log
    #[serde(default)]
    pub event_log: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            state_dir: default_state_dir(),
            enable_uploads: false,
            mirror_dir: None,
            remote_prefix: default_remote_prefix(),
            event_log: None,
        }
    }
}

/// Discord REST settings
#[derive(Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot token
    #[serde(default)]
    pub token: String,
    /// API root (default: "https://discord.com/api/v10")
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: default_api_base(),
        }
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Log sink configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogConfig {
    /// Also append log lines to `log_path`
    #[serde(default)]
    pub log_to_file: bool,
    /// Log file (default: "scrape.log")
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_to_file: false,
            log_path: default_log_path(),
        }
    }
}

impl Config {
    /// Build a configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    ///
    /// Parsing is lenient: unparseable numbers and booleans fall back to the
    /// default. Only an unparseable channel id is an error.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader(lookup);
        let mut config = Config::default();

        if let Some(raw) = env.get("SCRAPE_CHANNEL_ID") {
            config.channels = parse_channel_list(&raw)?;
        }

        let crawl = &mut config.crawl;
        crawl.limit = env.positive("SCRAPE_LIMIT");
        crawl.since_days = env.positive("SCRAPE_SINCE_DAYS");
        crawl.use_last_run = env.bool("SCRAPE_USE_LAST_RUN", crawl.use_last_run);
        crawl.backfill = env.bool("SCRAPE_BACKFILL", crawl.backfill);
        crawl.batch_size = env.int("SCRAPE_BATCH_SIZE", crawl.batch_size);
        crawl.autorun = env.bool("SCRAPE_BACKFILL_AUTORUN", crawl.autorun);
        crawl.autorun_sleep = Duration::from_secs(env.int(
            "SCRAPE_BACKFILL_SLEEP_SECONDS",
            crawl.autorun_sleep.as_secs(),
        ));
        crawl.max_batches = env.int("SCRAPE_BACKFILL_MAX_BATCHES", 0);

        config.mode = RunMode {
            dry_run: env.bool("SCRAPE_DRY_RUN", false),
            metadata_only: env.bool("SCRAPE_METADATA_ONLY", false),
            count_only: env.bool("SCRAPE_COUNT_ONLY", false),
        };

        let download = &mut config.download;
        download.max_attempts = env.int("DOWNLOAD_RETRIES", download.max_attempts);
        download.backoff_base = Duration::from_secs(env.int(
            "DOWNLOAD_BACKOFF_SECONDS",
            download.backoff_base.as_secs(),
        ));
        download.timeout =
            Duration::from_secs(env.int("DOWNLOAD_TIMEOUT_SECONDS", download.timeout.as_secs()));
        download.max_attachment_bytes = env.positive("SCRAPE_MAX_ATTACHMENT_BYTES");

        let extensions = &mut config.extensions;
        if let Some(list) = env.extension_list("IMAGE_EXTENSIONS") {
            extensions.image = list;
        }
        if let Some(list) = env.extension_list("VIDEO_EXTENSIONS") {
            extensions.video = list;
        }
        if let Some(list) = env.extension_list("DOCUMENT_EXTENSIONS") {
            extensions.document = list;
        }

        let storage = &mut config.storage;
        storage.enable_uploads = env.bool("ENABLE_UPLOADS", storage.enable_uploads);
        storage.mirror_dir = env.get("MIRROR_DIR").map(PathBuf::from);
        if let Some(dir) = env.get("SCRAPE_OUTPUT_DIR") {
            storage.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env.get("SCRAPE_STATE_DIR") {
            storage.state_dir = PathBuf::from(dir);
        }
        storage.event_log = env.get("EVENT_LOG_PATH").map(PathBuf::from);

        config.discord.token = env.get("DISCORD_BOT_TOKEN").unwrap_or_default();
        if let Some(base) = env.get("DISCORD_API_BASE") {
            config.discord.api_base = base;
        }

        config.logging.log_to_file = env.bool("LOG_TO_FILE", false);
        if let Some(path) = env.get("LOG_PATH") {
            config.logging.log_path = PathBuf::from(path);
        }

        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(Error::config(
                "no channel configured to archive",
                "SCRAPE_CHANNEL_ID",
            ));
        }
        if self.crawl.batch_size == 0 {
            return Err(Error::config(
                "batch size must be at least 1",
                "SCRAPE_BATCH_SIZE",
            ));
        }
        if self.download.max_attempts == 0 {
            return Err(Error::config(
                "at least one download attempt is required",
                "DOWNLOAD_RETRIES",
            ));
        }
        if self.download.timeout.is_zero() {
            return Err(Error::config(
                "request timeout must be non-zero",
                "DOWNLOAD_TIMEOUT_SECONDS",
            ));
        }
        url::Url::parse(&self.discord.api_base).map_err(|e| {
            Error::config(format!("invalid API base URL: {}", e), "DISCORD_API_BASE")
        })?;
        Ok(())
    }

    /// Mode governing every channel in this run
    pub fn crawl_mode(&self) -> CrawlMode {
        if self.crawl.backfill {
            CrawlMode::Backfill
        } else {
            CrawlMode::Latest
        }
    }

    /// Whether any cursor is tracked at all
    pub fn tracks_cursor(&self) -> bool {
        self.crawl.use_last_run || self.crawl.backfill
    }

    /// Cursor file for a channel
    pub fn state_path(&self, channel: ChannelId) -> PathBuf {
        self.state_dir(channel).join(format!("{}.json", channel))
    }

    /// Dedupe log for a channel
    pub fn dedupe_path(&self, channel: ChannelId) -> PathBuf {
        self.state_dir(channel)
            .join(format!("{}.dedupe.jsonl", channel))
    }

    /// Root for a channel's media and archive files
    pub fn output_dir(&self, channel: ChannelId) -> PathBuf {
        self.channel_overrides
            .get(&channel)
            .and_then(|paths| paths.output_dir.clone())
            .unwrap_or_else(|| self.storage.output_dir.clone())
    }

    fn state_dir(&self, channel: ChannelId) -> PathBuf {
        self.channel_overrides
            .get(&channel)
            .and_then(|paths| paths.state_dir.clone())
            .unwrap_or_else(|| self.storage.state_dir.clone())
    }
}

struct EnvReader<F>(F);

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        match (self.0)(key) {
            Some(value) => matches!(
                value.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            None => default,
        }
    }

    /// Values that do not parse or do not fit in `T` fall back to `default`
    fn int<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Zero and negative values mean "unset", as do values too large for `T`
    fn positive<T: TryFrom<i64>>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|n| *n > 0)
            .and_then(|n| T::try_from(n).ok())
    }

    fn extension_list(&self, key: &str) -> Option<Vec<String>> {
        let raw = (self.0)(key)?;
        let list = normalize_extensions(raw.split(','));
        (!list.is_empty()).then_some(list)
    }
}

/// Lower-case each entry and give it a leading dot, dropping blanks
pub fn normalize_extensions<'a>(items: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    items
        .into_iter()
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let lower = item.to_lowercase();
            if lower.starts_with('.') {
                lower
            } else {
                format!(".{}", lower)
            }
        })
        .collect()
}

fn parse_channel_list(raw: &str) -> Result<Vec<ChannelId>> {
    let mut channels = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let id: ChannelId = item.parse().map_err(|_| {
            Error::config(
                format!("invalid channel id {:?}", item),
                "SCRAPE_CHANNEL_ID",
            )
        })?;
        if id.get() != 0 && !channels.contains(&id) {
            channels.push(id);
        }
    }
    Ok(channels)
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    200
}

fn default_autorun_sleep() -> Duration {
    Duration::from_secs(10)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> Duration {
    Duration::from_secs(2)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_image_extensions() -> Vec<String> {
    vec![".png".into(), ".jpg".into(), ".jpeg".into(), ".gif".into()]
}

fn default_video_extensions() -> Vec<String> {
    vec![
        ".mp4".into(),
        ".mov".into(),
        ".webm".into(),
        ".mkv".into(),
        ".avi".into(),
    ]
}

fn default_document_extensions() -> Vec<String> {
    vec![
        ".pdf".into(),
        ".txt".into(),
        ".doc".into(),
        ".docx".into(),
        ".zip".into(),
    ]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_remote_prefix() -> String {
    "/DiscordBot".to_string()
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_log_path() -> PathBuf {
    PathBuf::from("scrape.log")
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
