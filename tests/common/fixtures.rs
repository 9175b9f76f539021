//! Message fixtures and filesystem helpers

use channel_archiver::source::{SourceAttachment, SourceMessage};
use channel_archiver::{AttachmentId, MessageId};
use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Fixed instant on 2024-03-01 at `minute` past ten
pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap()
}

pub fn message(id: u64, content: &str, attachments: Vec<SourceAttachment>) -> SourceMessage {
    SourceMessage {
        id: MessageId(id),
        author: "rin".into(),
        content: content.into(),
        created_at: at((id % 60) as u32),
        attachments,
    }
}

pub fn attachment(id: u64, filename: &str, url: String, size: Option<u64>) -> SourceAttachment {
    SourceAttachment {
        id: AttachmentId(id),
        filename: filename.into(),
        url,
        size,
    }
}

/// Serve `body` for GET `/<file>`
pub async fn serve(server: &MockServer, file: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/{file}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

/// Every regular file under `root`, relative to it, sorted
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().strip_prefix(root).unwrap().to_path_buf())
        .collect();
    files.sort();
    files
}

/// Archive files written under the output directory
pub fn archives(output: &Path) -> Vec<PathBuf> {
    files_under(&output.join("scraped_data"))
        .into_iter()
        .map(|relative| output.join("scraped_data").join(relative))
        .collect()
}

pub fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

/// Non-empty lines of a JSON-lines file
pub fn read_lines(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}
