//! Attachment classification by filename suffix

use crate::config::ExtensionConfig;
use crate::types::AttachmentKind;

/// Classify an attachment by its lower-cased filename suffix
///
/// Image extensions are checked first, then video, then document. Returns
/// `None` for anything unrecognised; such attachments are ignored entirely.
pub fn classify(filename: &str, extensions: &ExtensionConfig) -> Option<AttachmentKind> {
    let lower = filename.to_lowercase();
    let matches = |set: &[String]| set.iter().any(|ext| lower.ends_with(ext.as_str()));

    if matches(&extensions.image) {
        Some(AttachmentKind::Image)
    } else if matches(&extensions.video) {
        Some(AttachmentKind::Video)
    } else if matches(&extensions.document) {
        Some(AttachmentKind::Document)
    } else {
        None
    }
}
