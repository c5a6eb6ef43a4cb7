//! Heuristic extraction from rendered markup.
//!
//! Fallback path for when the embedded application state is missing or
//! yields nothing. The page structure drifts between releases, so every
//! field is resolved through an ordered rule list: prioritized descendant
//! selectors first, positional text heuristics last. Each tier is a pure
//! function so the fallbacks can be tested in isolation.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::record::{
    clip, now_iso, truncate_chars, ReviewRecord, ThreadRecord, AUTHOR_MAX_CHARS,
    PREVIEW_MAX_CHARS, REVIEW_CONTENT_MAX_CHARS, REVIEW_KIND, THREAD_KIND, TITLE_MAX_CHARS,
};

/// Elements shorter than this are not real post cards.
const MIN_ELEMENT_CHARS: usize = 10;
/// Titles shorter than this are noise (labels, counters).
const MIN_TITLE_CHARS: usize = 5;
/// Author names are short; longer matches are misidentified content.
const MAX_AUTHOR_CHARS: usize = 30;

const TOPIC_BATCH_SELECTORS: &[&str] = &[
    ".moment-card",
    ".moment-list-item",
    r#"[class*="moment-card"]"#,
    r#"[class*="topic-item"]"#,
    r#"article[class*="card"]"#,
];

const REVIEW_BATCH_SELECTORS: &[&str] = &[
    ".review-item",
    ".review-card",
    r#"[class*="review"]"#,
    r#"article[class*="review"]"#,
];

const GENERIC_BATCH_SELECTOR: &str = r#"div[class*="card"], div[class*="item"], article"#;

const TITLE_SELECTORS: &[&str] = &[
    "h2",
    "h3",
    "h4",
    ".title",
    r#"[class*="title"]"#,
    ".moment-card__title",
    ".moment-card__content",
    r#"[class*="content"]"#,
    r#"[class*="text"]"#,
    "p",
];

const AUTHOR_SELECTORS: &[&str] = &[
    ".author",
    ".user-name",
    r#"[class*="author"]"#,
    r#"[class*="user"]"#,
    r#"[class*="name"]"#,
];

const KNOWN_LINK_SELECTOR: &str = r#"a[href*="/moment/"], a[href*="/topic/"]"#;
const ANY_LINK_SELECTOR: &str = "a[href]";
const FOOTER_SELECTOR: &str =
    r#"[class*="footer"], [class*="action"], [class*="stat"], [class*="interact"]"#;
const RATING_SELECTOR: &str = r#"[class*="rating"], [class*="score"], [class*="star"]"#;
const REVIEW_CONTENT_SELECTOR: &str = r#"[class*="content"], [class*="text"], p"#;
const REVIEW_AUTHOR_SELECTOR: &str = r#"[class*="author"], [class*="user"]"#;
const REVIEW_TIME_SELECTOR: &str = r#"time, [class*="time"], [class*="date"]"#;

// Time/date shapes as the feed renders them ("3天前", "刚刚", "2024/5/1").
static RELATIVE_TIME_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\s*(?:天|小时|分钟|秒|刚刚)").unwrap());
static RELATIVE_TIME_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\s*(?:天|小时|分钟|秒|刚刚)前$").unwrap());
static DATE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}/\d{1,2}/\d{1,2}$").unwrap());
static YEAR_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}/\d").unwrap());
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

// Tried in priority order: relative first, then absolute, then abbreviated.
static TIME_PATTERNS: Lazy<[Regex; 4]> = Lazy::new(|| {
    [
        Regex::new(r"\d+\s*(?:天|小时|分钟|秒)前").unwrap(),
        Regex::new("刚刚").unwrap(),
        Regex::new(r"\d{4}/\d{1,2}/\d{1,2}").unwrap(),
        Regex::new(r"\d{1,2}/\d{1,2}").unwrap(),
    ]
});

/// Minimal view of a rendered element. The production implementation wraps
/// `scraper::ElementRef`; tests substitute fixed stubs.
pub trait PageElement: Sized {
    /// Combined inner text, one line per text node.
    fn text(&self) -> String;
    /// First descendant matching a CSS selector string.
    fn find(&self, selector: &str) -> Option<Self>;
    /// Attribute lookup on this element.
    fn attr(&self, name: &str) -> Option<String>;
}

/// `PageElement` over a parsed document node.
#[derive(Clone, Copy)]
pub struct DomElement<'a>(pub ElementRef<'a>);

impl PageElement for DomElement<'_> {
    fn text(&self) -> String {
        self.0
            .text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn find(&self, selector: &str) -> Option<Self> {
        let sel = Selector::parse(selector).ok()?;
        self.0.select(&sel).next().map(DomElement)
    }

    fn attr(&self, name: &str) -> Option<String> {
        self.0.value().attr(name).map(str::to_string)
    }
}

/// Best-effort thread extraction from a rendered document.
pub fn extract_topics_from_page(doc: &Html, base_url: &str, max: usize) -> Vec<ThreadRecord> {
    let batch = collect_batch(doc, TOPIC_BATCH_SELECTORS, max);
    let mut topics = Vec::new();
    for element in batch {
        if let Some(topic) = parse_topic_element(&element, base_url) {
            topics.push(topic);
            if topics.len() >= max {
                break;
            }
        }
    }
    topics
}

/// Best-effort review extraction from a rendered document.
pub fn extract_reviews_from_page(doc: &Html, max: usize) -> Vec<ReviewRecord> {
    let batch = collect_batch(doc, REVIEW_BATCH_SELECTORS, max);
    let mut reviews = Vec::new();
    for element in batch {
        if let Some(review) = parse_review_element(&element) {
            reviews.push(review);
            if reviews.len() >= max {
                break;
            }
        }
    }
    reviews
}

/// Locate the candidate element batch: first selector pattern with at least
/// one match wins, then a broad generic pattern as last resort. The batch is
/// capped at twice the requested count so partial parse failures still leave
/// room to reach the target.
fn collect_batch<'a>(doc: &'a Html, selectors: &[&str], max: usize) -> Vec<DomElement<'a>> {
    for pattern in selectors {
        if let Ok(sel) = Selector::parse(pattern) {
            let found: Vec<DomElement<'a>> =
                doc.select(&sel).take(max * 2).map(DomElement).collect();
            if !found.is_empty() {
                debug!("selector '{}' matched {} element(s)", pattern, found.len());
                return found;
            }
        }
    }
    debug!("no specific selector matched, using generic card/item pattern");
    match Selector::parse(GENERIC_BATCH_SELECTOR) {
        Ok(sel) => doc.select(&sel).take(max * 2).map(DomElement).collect(),
        Err(_) => Vec::new(),
    }
}

/// Parse one candidate element into a thread record. Returns `None` for
/// elements that are too short to be post cards or whose title cannot be
/// resolved by any tier.
pub fn parse_topic_element<E: PageElement>(element: &E, base_url: &str) -> Option<ThreadRecord> {
    let text = element.text();
    if text.chars().count() < MIN_ELEMENT_CHARS {
        return None;
    }

    let title = resolve_title(element, &text)?;
    let author = resolve_author(element, &text);
    let (likes, comments) = resolve_counters(element, &text);

    Some(ThreadRecord {
        title: clip(&title, TITLE_MAX_CHARS),
        link: resolve_link(element, base_url),
        author: truncate_chars(&author, AUTHOR_MAX_CHARS),
        time: resolve_time(&text),
        likes,
        comments,
        content_preview: truncate_chars(&text, PREVIEW_MAX_CHARS),
        kind: THREAD_KIND.to_string(),
        fetched_at: now_iso(),
    })
}

/// Parse one candidate element into a review record.
pub fn parse_review_element<E: PageElement>(element: &E) -> Option<ReviewRecord> {
    let text = element.text();
    if text.chars().count() < MIN_ELEMENT_CHARS {
        return None;
    }

    let content = element
        .find(REVIEW_CONTENT_SELECTOR)
        .map(|e| e.text().trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| truncate_chars(&text, REVIEW_CONTENT_MAX_CHARS));
    if content.is_empty() {
        return None;
    }

    let rating = element
        .find(RATING_SELECTOR)
        .map(|e| {
            let raw = e.text().trim().to_string();
            NUMBER
                .find(&raw)
                .map(|m| m.as_str().to_string())
                .unwrap_or(raw)
        })
        .unwrap_or_default();

    let author = element
        .find(REVIEW_AUTHOR_SELECTOR)
        .and_then(|e| e.text().lines().next().map(|l| l.trim().to_string()))
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let time = element
        .find(REVIEW_TIME_SELECTOR)
        .map(|e| e.text().trim().to_string())
        .unwrap_or_default();

    Some(ReviewRecord {
        rating,
        content: truncate_chars(&content, REVIEW_CONTENT_MAX_CHARS),
        author: truncate_chars(&author, AUTHOR_MAX_CHARS),
        time,
        likes: "0".to_string(),
        kind: REVIEW_KIND.to_string(),
        fetched_at: now_iso(),
    })
}

/// Title tier 1: prioritized descendant selectors, accepting the first
/// candidate long enough that is not a bare time or date string.
/// Tier 2: the longest plausible line of the element's own text.
fn resolve_title<E: PageElement>(element: &E, text: &str) -> Option<String> {
    title_from_selectors(element).or_else(|| longest_plausible_line(text))
}

fn title_from_selectors<E: PageElement>(element: &E) -> Option<String> {
    for selector in TITLE_SELECTORS {
        if let Some(candidate) = element.find(selector) {
            let candidate = candidate.text().trim().to_string();
            if candidate.chars().count() > MIN_TITLE_CHARS
                && !RELATIVE_TIME_START.is_match(&candidate)
                && !DATE_LINE.is_match(&candidate)
            {
                return Some(candidate);
            }
        }
    }
    None
}

fn longest_plausible_line(text: &str) -> Option<String> {
    let mut best: Option<&str> = None;
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if RELATIVE_TIME_LINE.is_match(line) || DATE_LINE.is_match(line) {
            continue;
        }
        if line.chars().count() < MIN_TITLE_CHARS {
            continue;
        }
        if line.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if best.is_none_or(|b| line.chars().count() > b.chars().count()) {
            best = Some(line);
        }
    }
    best.map(str::to_string)
}

/// Author tier 1: class-pattern selectors, first line of the match.
/// Tier 2: the line immediately preceding a timestamp line, on the
/// assumption that the author name precedes the post time in reading order.
fn resolve_author<E: PageElement>(element: &E, text: &str) -> String {
    for selector in AUTHOR_SELECTORS {
        if let Some(found) = element.find(selector) {
            if let Some(first_line) = found.text().lines().next() {
                let name = first_line.trim();
                if !name.is_empty() && name.chars().count() < MAX_AUTHOR_CHARS {
                    return name.to_string();
                }
            }
        }
    }

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    for (i, line) in lines.iter().enumerate() {
        if RELATIVE_TIME_START.is_match(line) || YEAR_START.is_match(line) {
            if i > 0 && lines[i - 1].chars().count() < MAX_AUTHOR_CHARS {
                return lines[i - 1].to_string();
            }
        }
    }

    "unknown".to_string()
}

/// First anchor pointing at a known content path, else any anchor; relative
/// hrefs are resolved against the site base.
fn resolve_link<E: PageElement>(element: &E, base_url: &str) -> String {
    let anchor = element
        .find(KNOWN_LINK_SELECTOR)
        .or_else(|| element.find(ANY_LINK_SELECTOR));
    if let Some(href) = anchor.and_then(|a| a.attr("href")) {
        if href.starts_with("http") {
            return href;
        }
        return format!("{base_url}{href}");
    }
    String::new()
}

fn resolve_time(text: &str) -> String {
    for pattern in TIME_PATTERNS.iter() {
        if let Some(m) = pattern.find(text) {
            return m.as_str().to_string();
        }
    }
    String::new()
}

/// Engagement counters. Preferred source is a footer/stat descendant where
/// the first two numbers are likes and comments. Without one, fall back to
/// the last two numbers anywhere in the element text; purely positional and
/// fragile, but the bound of last resort.
fn resolve_counters<E: PageElement>(element: &E, text: &str) -> (String, String) {
    if let Some(footer) = element.find(FOOTER_SELECTOR) {
        let numbers = extract_numbers(&footer.text());
        let likes = numbers.first().cloned().unwrap_or_else(|| "0".into());
        let comments = numbers.get(1).cloned().unwrap_or_else(|| "0".into());
        return (likes, comments);
    }

    let numbers = extract_numbers(text);
    if numbers.len() >= 2 {
        let likes = numbers[numbers.len() - 2].clone();
        let comments = numbers[numbers.len() - 1].clone();
        (likes, comments)
    } else {
        ("0".into(), "0".into())
    }
}

fn extract_numbers(text: &str) -> Vec<String> {
    NUMBER
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://www.taptap.cn";

    /// Element stub with an explicit selector→child table.
    #[derive(Clone, Default)]
    struct StubElement {
        text: String,
        children: Vec<(&'static str, StubElement)>,
        attrs: Vec<(&'static str, String)>,
    }

    impl StubElement {
        fn with_text(text: &str) -> Self {
            Self {
                text: text.to_string(),
                ..Default::default()
            }
        }

        fn child(mut self, selector: &'static str, child: StubElement) -> Self {
            self.children.push((selector, child));
            self
        }

        fn attr(mut self, name: &'static str, value: &str) -> Self {
            self.attrs.push((name, value.to_string()));
            self
        }
    }

    impl PageElement for StubElement {
        fn text(&self) -> String {
            self.text.clone()
        }

        fn find(&self, selector: &str) -> Option<Self> {
            self.children
                .iter()
                .find(|(s, _)| *s == selector)
                .map(|(_, c)| c.clone())
        }

        fn attr(&self, name: &str) -> Option<String> {
            self.attrs
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.clone())
        }
    }

    #[test]
    fn test_bare_text_card_positional_fallbacks() {
        let element = StubElement::with_text("Great update\n小王\n3天前\n12\n4");
        let topic = parse_topic_element(&element, BASE).unwrap();
        assert_eq!(topic.title, "Great update");
        assert_eq!(topic.time, "3天前");
        assert_eq!(topic.likes, "12");
        assert_eq!(topic.comments, "4");
        // Tier-2 author inference: the line preceding the timestamp.
        assert_eq!(topic.author, "小王");
        assert_eq!(topic.link, "");
    }

    #[test]
    fn test_author_unknown_without_time_line() {
        // No timestamp line anywhere, so the preceding-line rule has no
        // anchor and the author stays at its default.
        let element = StubElement::with_text("Great update arriving soon\n12\n4");
        let topic = parse_topic_element(&element, BASE).unwrap();
        assert_eq!(topic.author, "unknown");
    }

    #[test]
    fn test_short_element_rejected() {
        assert!(parse_topic_element(&StubElement::with_text("short"), BASE).is_none());
    }

    #[test]
    fn test_title_selector_tier_beats_line_scan() {
        let element = StubElement::with_text("ignored line that is longer\n3天前\n1\n2")
            .child("h2", StubElement::with_text("Patch notes 1.2"));
        let topic = parse_topic_element(&element, BASE).unwrap();
        assert_eq!(topic.title, "Patch notes 1.2");
    }

    #[test]
    fn test_title_selector_rejects_time_shaped_text() {
        // The h2 holds a bare relative time; the next tier must win.
        let element = StubElement::with_text("An actual post title here\n2\n3")
            .child("h2", StubElement::with_text("3小时前更新"));
        let topic = parse_topic_element(&element, BASE).unwrap();
        assert_eq!(topic.title, "An actual post title here");
    }

    #[test]
    fn test_title_clipped_with_ellipsis() {
        let long = "字".repeat(200);
        let element = StubElement::with_text(&format!("{long}\n1\n2"));
        let topic = parse_topic_element(&element, BASE).unwrap();
        assert_eq!(topic.title.chars().count(), TITLE_MAX_CHARS + 3);
        assert!(topic.title.ends_with("..."));
    }

    #[test]
    fn test_author_from_selector_first_line() {
        let element = StubElement::with_text("Some post body long enough\n5\n6")
            .child(".author", StubElement::with_text("小明\nLv.12"));
        let topic = parse_topic_element(&element, BASE).unwrap();
        assert_eq!(topic.author, "小明");
    }

    #[test]
    fn test_author_line_precedes_time_line() {
        let element = StubElement::with_text("A reasonably long post title\n小红\n3天前\n7\n8");
        let topic = parse_topic_element(&element, BASE).unwrap();
        assert_eq!(topic.author, "小红");
    }

    #[test]
    fn test_relative_link_resolved_against_base() {
        let element = StubElement::with_text("Post with a link inside it\n1\n2").child(
            KNOWN_LINK_SELECTOR,
            StubElement::default().attr("href", "/moment/555"),
        );
        let topic = parse_topic_element(&element, BASE).unwrap();
        assert_eq!(topic.link, format!("{BASE}/moment/555"));
    }

    #[test]
    fn test_footer_counters_preferred_over_positional() {
        let element = StubElement::with_text("Post body text 99 goes here\n100\n200")
            .child(FOOTER_SELECTOR, StubElement::with_text("赞 12 · 评论 4"));
        let topic = parse_topic_element(&element, BASE).unwrap();
        assert_eq!(topic.likes, "12");
        assert_eq!(topic.comments, "4");
    }

    #[test]
    fn test_preview_always_populated() {
        let body = "b".repeat(400);
        let element = StubElement::with_text(&body);
        let topic = parse_topic_element(&element, BASE).unwrap();
        assert_eq!(topic.content_preview.chars().count(), PREVIEW_MAX_CHARS);
    }

    #[test]
    fn test_review_fields_from_selectors() {
        let element = StubElement::with_text("filler filler filler")
            .child(RATING_SELECTOR, StubElement::with_text("5 星"))
            .child(REVIEW_CONTENT_SELECTOR, StubElement::with_text("很好玩的游戏"))
            .child(REVIEW_AUTHOR_SELECTOR, StubElement::with_text("玩家甲\n其他"))
            .child(REVIEW_TIME_SELECTOR, StubElement::with_text("2024/5/1"));
        let review = parse_review_element(&element).unwrap();
        assert_eq!(review.rating, "5");
        assert_eq!(review.content, "很好玩的游戏");
        assert_eq!(review.author, "玩家甲");
        assert_eq!(review.time, "2024/5/1");
        assert_eq!(review.likes, "0");
    }

    #[test]
    fn test_review_content_falls_back_to_text() {
        let element = StubElement::with_text("这个评价没有结构化标记但足够长");
        let review = parse_review_element(&element).unwrap();
        assert_eq!(review.content, "这个评价没有结构化标记但足够长");
    }

    #[test]
    fn test_dom_batch_discovery_and_parse() {
        let html = Html::parse_document(
            r#"<html><body>
            <div class="moment-card">
              <h3>New event starts today</h3>
              <span class="user-name">Carol</span>
              <a href="/moment/42">view</a>
              <div class="moment-footer">31 8</div>
            </div>
            <div class="moment-card"><p>tiny</p></div>
            </body></html>"#,
        );
        let topics = extract_topics_from_page(&html, BASE, 10);
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].title, "New event starts today");
        assert_eq!(topics[0].author, "Carol");
        assert_eq!(topics[0].link, format!("{BASE}/moment/42"));
        assert_eq!(topics[0].likes, "31");
        assert_eq!(topics[0].comments, "8");
    }

    #[test]
    fn test_generic_selector_last_resort() {
        let html = Html::parse_document(
            r#"<html><body>
            <article><h2>Fallback card content</h2><p>body text 3 5</p></article>
            </body></html>"#,
        );
        let topics = extract_topics_from_page(&html, BASE, 10);
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].title, "Fallback card content");
    }

    #[test]
    fn test_batch_capped_at_twice_max() {
        let cards: String = (0..20)
            .map(|i| format!(r#"<div class="moment-card"><h3>Post number {i} title</h3></div>"#))
            .collect();
        let html = Html::parse_document(&format!("<html><body>{cards}</body></html>"));
        let topics = extract_topics_from_page(&html, BASE, 3);
        assert_eq!(topics.len(), 3);
    }
}
