//! Record model for extracted community content.
//!
//! Two record kinds come out of the extractors: discussion threads from the
//! topic feed and reviews from the rating feed. Records are immutable once
//! built; deduplication works off derived identity keys, never off mutation.

use serde::{Deserialize, Serialize};

pub const THREAD_KIND: &str = "topic";
pub const REVIEW_KIND: &str = "review";

/// Display caps, counted in chars since feed content is mostly CJK.
pub const TITLE_MAX_CHARS: usize = 150;
pub const AUTHOR_MAX_CHARS: usize = 50;
pub const SUMMARY_MAX_CHARS: usize = 200;
pub const PREVIEW_MAX_CHARS: usize = 300;
pub const REVIEW_CONTENT_MAX_CHARS: usize = 300;

/// Chars of review content that participate in the identity key.
pub const REVIEW_KEY_CHARS: usize = 100;

/// One discussion thread from the community topic feed.
///
/// Counters stay string-typed: the source frequently reports them as
/// formatted text ("1.2k") or not at all, in which case they default to "0".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub title: String,
    pub link: String,
    pub author: String,
    pub time: String,
    pub likes: String,
    pub comments: String,
    pub content_preview: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub fetched_at: String,
}

impl ThreadRecord {
    /// Identity key used for deduplication. A thread without a link is not
    /// identifiable and can never be matched against a later extraction of
    /// the same post.
    pub fn identity(&self) -> Option<&str> {
        if self.link.is_empty() {
            None
        } else {
            Some(&self.link)
        }
    }
}

/// One review from the rating feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub rating: String,
    pub content: String,
    pub author: String,
    pub time: String,
    pub likes: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub fetched_at: String,
}

impl ReviewRecord {
    /// Approximate identity: the first 100 chars of content plus the author.
    /// Two long reviews by the same author sharing that prefix collapse to
    /// one; accepted as a heuristic key, not a true primary key.
    pub fn identity(&self) -> String {
        format!(
            "{}_{}",
            truncate_chars(&self.content, REVIEW_KEY_CHARS),
            self.author
        )
    }
}

/// First `max` chars of `s`, with no truncation marker.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Clip `s` to `max` chars, appending an ellipsis only when something was cut.
pub fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut clipped: String = s.chars().take(max).collect();
        clipped.push_str("...");
        clipped
    }
}

/// Local-time ISO timestamp, used for `fetched_at` and snapshot metadata.
pub fn now_iso() -> String {
    chrono::Local::now().to_rfc3339()
}
