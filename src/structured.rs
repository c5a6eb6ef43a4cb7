//! Structured extraction from the page's embedded application state.
//!
//! TapTap is a Nuxt SPA: once rendered, the page exposes its full hydration
//! state under `window.__NUXT__`. When that tree can be captured it is far
//! more reliable than scraping markup, so it is always tried first. The tree
//! shape varies across page versions, so instead of fixed paths we search it
//! recursively for sub-trees that look like record collections.

use serde_json::Value;
use tracing::debug;

use crate::record::{
    clip, now_iso, truncate_chars, ReviewRecord, ThreadRecord, AUTHOR_MAX_CHARS,
    REVIEW_CONTENT_MAX_CHARS, REVIEW_KIND, SUMMARY_MAX_CHARS, THREAD_KIND, TITLE_MAX_CHARS,
};

// Depth bounds guard against pathologically deep or cyclic-looking trees.
const TOPIC_SEARCH_MAX_DEPTH: usize = 15;
const REVIEW_SEARCH_MAX_DEPTH: usize = 10;

/// Extract thread records from the application state tree.
///
/// Every mapping holding a `"list"` array whose first element carries a
/// `"moment"` key is treated as a topic collection; all of them are unioned,
/// deduplicated by link, and truncated to `max`. Items that fail to map are
/// skipped, never fatal.
pub fn extract_topics(state: &Value, base_url: &str, max: usize) -> Vec<ThreadRecord> {
    let mut lists = Vec::new();
    find_moment_lists(state, 0, &mut lists);
    debug!("found {} moment list(s) in app state", lists.len());

    let mut topics = Vec::new();
    for list in lists {
        for item in list.iter().take(max) {
            if let Some(topic) = map_topic(item, base_url) {
                topics.push(topic);
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    let mut unique: Vec<ThreadRecord> = topics
        .into_iter()
        .filter(|t| !t.link.is_empty() && seen.insert(t.link.clone()))
        .collect();
    unique.truncate(max);
    unique
}

/// Extract review records from the application state tree.
///
/// Unlike topics, the search stops at the first matching collection: review
/// shaped lists can appear elsewhere in the tree (e.g. related games) and
/// unioning them would pull in unrelated content.
pub fn extract_reviews(state: &Value, max: usize) -> Vec<ReviewRecord> {
    let Some(items) = find_review_list(state, 0) else {
        return Vec::new();
    };
    items.iter().take(max).filter_map(map_review).collect()
}

fn find_moment_lists<'a>(value: &'a Value, depth: usize, out: &mut Vec<&'a Vec<Value>>) {
    if depth > TOPIC_SEARCH_MAX_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(list)) = map.get("list") {
                let first_has_moment = list
                    .first()
                    .and_then(Value::as_object)
                    .is_some_and(|first| first.contains_key("moment"));
                if first_has_moment {
                    out.push(list);
                }
            }
            for child in map.values() {
                find_moment_lists(child, depth + 1, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                find_moment_lists(item, depth + 1, out);
            }
        }
        _ => {}
    }
}

fn find_review_list(value: &Value, depth: usize) -> Option<&Vec<Value>> {
    if depth > REVIEW_SEARCH_MAX_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(reviews)) = map.get("reviews") {
                return Some(reviews);
            }
            if let Some(Value::Array(list)) = map.get("list") {
                let first_is_review = list.first().and_then(Value::as_object).is_some_and(|f| {
                    ["rating", "score", "review"].iter().any(|k| f.contains_key(*k))
                });
                if first_is_review {
                    return Some(list);
                }
            }
            map.values().find_map(|v| find_review_list(v, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|v| find_review_list(v, depth + 1)),
        _ => None,
    }
}

fn map_topic(item: &Value, base_url: &str) -> Option<ThreadRecord> {
    let moment = item.get("moment")?;
    if !moment.is_object() {
        return None;
    }

    let post_id = field_chain(&[moment.get("id_str"), moment.get("id")]);

    let title = moment
        .pointer("/topic/title")
        .and_then(Value::as_str)
        .unwrap_or("");
    let summary = moment
        .pointer("/topic/summary")
        .and_then(Value::as_str)
        .unwrap_or("");
    let content = if summary.is_empty() { title } else { summary };

    let resolved_title = if title.is_empty() { content } else { title };
    if resolved_title.is_empty() {
        return None;
    }

    let author = moment
        .pointer("/author/user/name")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    let time = format_timestamp(field_value(&[
        moment.get("created_time"),
        moment.get("publish_time"),
    ]));

    let likes = counter(moment.pointer("/stat/ups"));
    let comments = counter(moment.pointer("/stat/comments"));

    let link = match post_id {
        Some(id) => format!("{base_url}/moment/{id}"),
        None => String::new(),
    };

    Some(ThreadRecord {
        title: clip(resolved_title, TITLE_MAX_CHARS),
        link,
        author: truncate_chars(author, AUTHOR_MAX_CHARS),
        time,
        likes,
        comments,
        content_preview: truncate_chars(content, SUMMARY_MAX_CHARS),
        kind: THREAD_KIND.to_string(),
        fetched_at: now_iso(),
    })
}

fn map_review(item: &Value) -> Option<ReviewRecord> {
    let content = item
        .get("content")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .or_else(|| item.get("text").and_then(Value::as_str))
        .unwrap_or("");
    if content.is_empty() {
        return None;
    }

    let rating = field_chain(&[item.get("rating"), item.get("score")]).unwrap_or_default();

    let author = item
        .pointer("/user/name")
        .and_then(Value::as_str)
        .filter(|a| !a.is_empty())
        .or_else(|| item.pointer("/author/name").and_then(Value::as_str))
        .unwrap_or("unknown");

    let time = format_timestamp(field_value(&[
        item.get("created_time"),
        item.get("created_at"),
    ]));

    let likes =
        field_chain(&[item.get("likes_count"), item.get("useful_count")]).unwrap_or_else(|| "0".into());

    Some(ReviewRecord {
        rating,
        content: truncate_chars(content, REVIEW_CONTENT_MAX_CHARS),
        author: truncate_chars(author, AUTHOR_MAX_CHARS),
        time,
        likes,
        kind: REVIEW_KIND.to_string(),
        fetched_at: now_iso(),
    })
}

/// First present, non-null candidate.
fn field_value<'a>(candidates: &[Option<&'a Value>]) -> Option<&'a Value> {
    candidates
        .iter()
        .flatten()
        .find(|v| !v.is_null())
        .copied()
}

/// First present candidate rendered as a string, skipping nulls and
/// structured values.
fn field_chain(candidates: &[Option<&Value>]) -> Option<String> {
    candidates.iter().flatten().find_map(|v| scalar_string(v))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn counter(value: Option<&Value>) -> String {
    value.and_then(scalar_string).unwrap_or_else(|| "0".into())
}

/// Render an epoch timestamp for display.
///
/// Magnitudes above 10^12 are millisecond precision and get scaled down.
/// Non-numeric inputs pass through as their string form; absent inputs
/// render empty.
pub fn format_timestamp(value: Option<&Value>) -> String {
    use chrono::{Local, TimeZone};

    let Some(value) = value else {
        return String::new();
    };
    if let Some(n) = value.as_f64() {
        if n == 0.0 {
            return String::new();
        }
        let secs = if n > 1e12 { n / 1000.0 } else { n };
        return match Local.timestamp_opt(secs as i64, 0).single() {
            Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
            None => n.to_string(),
        };
    }
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASE: &str = "https://www.taptap.cn";

    #[test]
    fn test_moment_list_anywhere_in_tree() {
        let state = json!({"a": {"list": [{"moment": {
            "id_str": "9",
            "topic": {"title": "Hello"},
            "author": {"user": {"name": "Bob"}},
            "stat": {"ups": 3, "comments": 1}
        }}]}});

        let topics = extract_topics(&state, BASE, 10);
        assert_eq!(topics.len(), 1);
        let t = &topics[0];
        assert_eq!(t.title, "Hello");
        assert_eq!(t.author, "Bob");
        assert_eq!(t.likes, "3");
        assert_eq!(t.comments, "1");
        assert!(t.link.ends_with("/moment/9"));
        assert_eq!(t.kind, "topic");
    }

    #[test]
    fn test_numeric_id_and_summary_fallback() {
        let state = json!({"list": [{"moment": {
            "id": 42,
            "topic": {"title": "", "summary": "summary text"},
        }}]});

        let topics = extract_topics(&state, BASE, 10);
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].title, "summary text");
        assert_eq!(topics[0].link, format!("{BASE}/moment/42"));
        assert_eq!(topics[0].author, "unknown");
        assert_eq!(topics[0].likes, "0");
    }

    #[test]
    fn test_empty_title_discarded() {
        let state = json!({"list": [{"moment": {"id_str": "1", "topic": {}}}]});
        assert!(extract_topics(&state, BASE, 10).is_empty());
    }

    #[test]
    fn test_union_deduplicates_by_link() {
        let moment = json!({"moment": {"id_str": "7", "topic": {"title": "dup"}}});
        let state = json!({
            "x": {"list": [moment.clone()]},
            "y": {"list": [moment]},
        });
        assert_eq!(extract_topics(&state, BASE, 10).len(), 1);
    }

    #[test]
    fn test_max_count_applied_after_dedup() {
        let items: Vec<Value> = (0..6)
            .map(|i| json!({"moment": {"id_str": i.to_string(), "topic": {"title": format!("t{i}")}}}))
            .collect();
        let state = json!({"list": items});
        assert_eq!(extract_topics(&state, BASE, 3).len(), 3);
    }

    #[test]
    fn test_malformed_items_skipped() {
        let state = json!({"list": [
            {"moment": {"id_str": "1", "topic": {"title": "ok"}}},
            {"moment": "not a mapping"},
            {"moment": {"topic": {}}},
        ]});
        let topics = extract_topics(&state, BASE, 10);
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].title, "ok");
    }

    #[test]
    fn test_depth_bound_stops_search() {
        // Nest a valid collection one level past the depth limit.
        let mut state = json!({"list": [{"moment": {"id_str": "1", "topic": {"title": "deep"}}}]});
        for _ in 0..=TOPIC_SEARCH_MAX_DEPTH {
            state = json!({"wrap": state});
        }
        assert!(extract_topics(&state, BASE, 10).is_empty());
    }

    #[test]
    fn test_review_first_match_wins() {
        let state = json!({
            "a": {"reviews": [{"content": "first", "rating": 5}]},
            "z": {"list": [{"rating": 1, "content": "second"}]},
        });
        let reviews = extract_reviews(&state, 10);
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].content, "first");
    }

    #[test]
    fn test_review_search_follows_document_order() {
        // The earlier key in the document wins even when it sorts later
        // alphabetically; the state tree is walked in page order.
        let state = json!({
            "z": {"reviews": [{"content": "document first", "rating": 5}]},
            "a": {"list": [{"rating": 1, "content": "document second"}]},
        });
        let reviews = extract_reviews(&state, 10);
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].content, "document first");
    }

    #[test]
    fn test_review_list_discriminated_by_keys() {
        let state = json!({"data": {"list": [
            {"score": 4, "content": "nice game", "user": {"name": "Ann"}},
            {"score": 2, "text": "meh"},
        ]}});
        let reviews = extract_reviews(&state, 10);
        assert_eq!(reviews.len(), 2);
        assert_eq!(reviews[0].rating, "4");
        assert_eq!(reviews[0].author, "Ann");
        assert_eq!(reviews[1].content, "meh");
        assert_eq!(reviews[1].author, "unknown");
    }

    #[test]
    fn test_empty_content_review_rejected() {
        let state = json!({"reviews": [
            {"rating": 5, "content": ""},
            {"rating": 4},
            {"rating": 3, "content": "kept"},
        ]});
        let reviews = extract_reviews(&state, 10);
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].content, "kept");
    }

    #[test]
    fn test_timestamp_seconds_and_millis_agree() {
        let secs = format_timestamp(Some(&json!(1_700_000_000)));
        let millis = format_timestamp(Some(&json!(1_700_000_000_000i64)));
        assert_eq!(secs, millis);
        assert!(!secs.is_empty());
    }

    #[test]
    fn test_timestamp_passthrough_and_absent() {
        assert_eq!(format_timestamp(Some(&json!("昨天 12:00"))), "昨天 12:00");
        assert_eq!(format_timestamp(None), "");
        assert_eq!(format_timestamp(Some(&json!(0))), "");
    }
}
