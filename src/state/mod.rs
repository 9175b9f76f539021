//! Persisted per-channel state: crawl cursors and the attachment dedupe log.
//!
//! Both stores are plain files owned by a single process at a time. Missing or
//! corrupt content is treated as "no prior state"; only the inability to write
//! is reported as an error.

mod cursor;
mod dedupe;

pub use cursor::{CursorState, CursorStore};
pub use dedupe::{DedupeEntry, DedupeIndex, append_entry, load_log};
