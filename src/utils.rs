//! Utility functions for file naming and serialization

use crate::error::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Longest sanitized filename component, in bytes
const MAX_FILENAME_BYTES: usize = 200;

/// Serialize `value` as pretty JSON with four-space indentation
///
/// Non-ASCII text is written as UTF-8, not escaped.
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    out.push(b'\n');
    Ok(out)
}

/// Append `value` as one compact JSON line, creating parent directories as needed
pub async fn append_json_line<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}

/// `path` with `suffix` appended to its file name (`a/b.json` + `.tmp` = `a/b.json.tmp`)
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Turn a platform-supplied filename into a single safe path component
///
/// Path separators and control characters are replaced with `_`. Returns
/// `None` when nothing usable remains (empty, `.` or `..`).
///
/// # Examples
///
/// ```
/// use channel_archiver::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("cat.png").as_deref(), Some("cat.png"));
/// assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some(".._.._etc_passwd"));
/// assert_eq!(sanitize_filename(".."), None);
/// ```
pub fn sanitize_filename(name: &str) -> Option<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let cleaned = truncate_to_boundary(&cleaned, MAX_FILENAME_BYTES);
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return None;
    }
    Some(cleaned.to_string())
}

fn truncate_to_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Get a path that does not exist yet, adding ` (1)`, ` (2)`, ... before the extension
///
/// # Examples
///
/// ```
/// use channel_archiver::utils::get_unique_path;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/does-not-exist-archive.json");
/// assert_eq!(get_unique_path(path).unwrap(), path);
/// ```
pub fn get_unique_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Other(format!("cannot extract file stem from {}", path.display())))?;
    let extension = path.extension().and_then(|e| e.to_str());
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let new_name = match extension {
            Some(ext) => format!("{} ({}).{}", stem, i, ext),
            None => format!("{} ({})", stem, i),
        };
        let new_path = parent.join(new_name);
        if !new_path.exists() {
            return Ok(new_path);
        }
    }

    Err(Error::Other(format!(
        "could not find a free name for {} after {} attempts",
        path.display(),
        MAX_RENAME_ATTEMPTS
    )))
}

/// Render a relative path with forward slashes for use in remote paths
pub fn to_remote_component(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            std::path::Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a remote prefix and a relative path with exactly one `/` between them
pub fn join_remote(prefix: &str, rest: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let rest = rest.trim_start_matches('/');
    if prefix.is_empty() {
        format!("/{}", rest)
    } else {
        format!("{}/{}", prefix, rest)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn pretty_json_uses_four_spaces_and_raw_utf8() {
        let value = serde_json::json!({"content": "naïve ☕", "list": [1]});
        let text = String::from_utf8(to_pretty_json(&value).unwrap()).unwrap();
        assert!(text.contains("\n    \"content\": \"naïve ☕\""), "got {text}");
        assert!(text.contains("\n        1\n"), "got {text}");
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn sibling_suffix_keeps_directory() {
        let p = sibling_with_suffix(Path::new("state/1.json"), ".tmp");
        assert_eq!(p, PathBuf::from("state/1.json.tmp"));
        let p = sibling_with_suffix(Path::new("scraped_images/10_a.png"), ".part");
        assert_eq!(p, PathBuf::from("scraped_images/10_a.png.part"));
    }

    #[test]
    fn sanitize_replaces_separators_and_controls() {
        assert_eq!(sanitize_filename("a/b\\c.png").as_deref(), Some("a_b_c.png"));
        assert_eq!(sanitize_filename("line\nbreak.txt").as_deref(), Some("line_break.txt"));
        assert_eq!(sanitize_filename("  spaced.pdf ").as_deref(), Some("spaced.pdf"));
        assert_eq!(sanitize_filename("日本語.png").as_deref(), Some("日本語.png"));
    }

    #[test]
    fn sanitize_rejects_empty_and_dot_names() {
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("   "), None);
        assert_eq!(sanitize_filename("."), None);
        assert_eq!(sanitize_filename("..."), None);
    }

    #[test]
    fn sanitize_truncates_on_char_boundary() {
        let long = "é".repeat(150);
        let cleaned = sanitize_filename(&long).unwrap();
        assert!(cleaned.len() <= MAX_FILENAME_BYTES);
        assert_eq!(cleaned.chars().count(), MAX_FILENAME_BYTES / 2);
    }

    #[test]
    fn unique_path_returns_original_when_free() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1_20240101T000000Z_1.json");
        assert_eq!(get_unique_path(&path).unwrap(), path);
    }

    #[test]
    fn unique_path_adds_counter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.json");
        File::create(&path).unwrap();
        File::create(dir.path().join("archive (1).json")).unwrap();

        assert_eq!(
            get_unique_path(&path).unwrap(),
            dir.path().join("archive (2).json")
        );
    }

    #[test]
    fn unique_path_without_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive");
        File::create(&path).unwrap();
        assert_eq!(get_unique_path(&path).unwrap(), dir.path().join("archive (1)"));
    }

    #[test]
    fn remote_paths_use_single_slashes() {
        assert_eq!(join_remote("/DiscordBot", "ImageBank/1_a.png"), "/DiscordBot/ImageBank/1_a.png");
        assert_eq!(join_remote("/DiscordBot/", "/scraped_data/x.json"), "/DiscordBot/scraped_data/x.json");
        assert_eq!(join_remote("", "x.json"), "/x.json");
        assert_eq!(
            to_remote_component(Path::new("scraped_data/1_x.json")),
            "scraped_data/1_x.json"
        );
    }
}
