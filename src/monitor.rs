//! Poll scheduler: fetch, extract, merge, persist.
//!
//! Single sequential flow. Each cycle fetches the topic and review feeds,
//! tries structured extraction first with the heuristic path as fallback,
//! merges against history, reports the new subset, and persists when
//! anything changed. Interruption is honored between cycles and at the
//! sleep boundary; an in-flight fetch always completes or times out first.
//! Stopping always ends with one final unconditional persist.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::browser::{PageFetcher, RenderedPage};
use crate::config::Config;
use crate::heuristic;
use crate::record::{truncate_chars, ReviewRecord, ThreadRecord};
use crate::store::Store;
use crate::structured;

/// Readiness hint for the render layer: the feed has cards.
const CONTENT_READY_SELECTOR: &str = r#".moment-card, .moment-list-item, [class*="moment"]"#;

pub struct Monitor<F: PageFetcher> {
    fetcher: F,
    store: Store,
    config: Config,
    data_file: PathBuf,
    /// History diverged from disk after a failed persist; retry next cycle.
    dirty: bool,
}

/// New records found by one cycle; the downstream notification boundary.
pub struct CycleOutcome {
    pub new_topics: Vec<ThreadRecord>,
    pub new_reviews: Vec<ReviewRecord>,
}

impl CycleOutcome {
    fn is_empty(&self) -> bool {
        self.new_topics.is_empty() && self.new_reviews.is_empty()
    }
}

impl<F: PageFetcher> Monitor<F> {
    pub fn new(fetcher: F, store: Store, config: Config) -> Self {
        let data_file = config.data_file();
        Self {
            fetcher,
            store,
            config,
            data_file,
            dirty: false,
        }
    }

    /// Run fetch cycles until interrupted. `interval_minutes` of 0 means one
    /// cycle only. Always writes a final snapshot before returning.
    pub async fn run(&mut self, interval_minutes: u64) -> Result<()> {
        info!(
            "monitoring app {} every {} minute(s)",
            self.store.app_id(),
            interval_minutes
        );

        let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = stop_tx.send(true);
            }
        });

        loop {
            let outcome = self.run_cycle().await;
            self.report(&outcome);

            // Skip snapshot churn when nothing changed, unless a previous
            // write failed and history has diverged from disk.
            if !outcome.is_empty() || self.dirty {
                self.persist();
            }

            if interval_minutes == 0 {
                break;
            }
            if *stop_rx.borrow() {
                info!("interrupt received, stopping");
                break;
            }

            info!("next cycle in {} minute(s)", interval_minutes);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(interval_minutes * 60)) => {}
                _ = stop_rx.changed() => {
                    info!("interrupt received, stopping");
                    break;
                }
            }
        }

        // Final flush regardless of what the last cycle found.
        self.store.save(&self.data_file)?;
        info!("final snapshot written to {}", self.data_file.display());
        Ok(())
    }

    async fn run_cycle(&mut self) -> CycleOutcome {
        let topics = self.fetch_topics().await;
        let reviews = self.fetch_reviews().await;
        CycleOutcome {
            new_topics: self.store.merge_topics(topics),
            new_reviews: self.store.merge_reviews(reviews),
        }
    }

    async fn fetch_topics(&self) -> Vec<ThreadRecord> {
        let monitor = &self.config.monitor;
        let url = format!("{}/app/{}/topic?sort=new", monitor.base_url, monitor.app_id);
        match self.fetcher.fetch(&url, CONTENT_READY_SELECTOR).await {
            Ok(page) => self.extract_topics(&page),
            Err(e) => {
                warn!("topic fetch failed: {e:#}");
                Vec::new()
            }
        }
    }

    async fn fetch_reviews(&self) -> Vec<ReviewRecord> {
        let monitor = &self.config.monitor;
        let url = format!("{}/app/{}/review", monitor.base_url, monitor.app_id);
        match self.fetcher.fetch(&url, CONTENT_READY_SELECTOR).await {
            Ok(page) => self.extract_reviews(&page),
            Err(e) => {
                warn!("review fetch failed: {e:#}");
                Vec::new()
            }
        }
    }

    fn extract_topics(&self, page: &RenderedPage) -> Vec<ThreadRecord> {
        let monitor = &self.config.monitor;
        if let Some(state) = &page.app_state {
            let topics = structured::extract_topics(state, &monitor.base_url, monitor.max_topics);
            if !topics.is_empty() {
                debug!("structured extraction yielded {} topic(s)", topics.len());
                return topics;
            }
        }
        debug!("falling back to heuristic topic extraction");
        heuristic::extract_topics_from_page(&page.document(), &monitor.base_url, monitor.max_topics)
    }

    fn extract_reviews(&self, page: &RenderedPage) -> Vec<ReviewRecord> {
        let monitor = &self.config.monitor;
        if let Some(state) = &page.app_state {
            let reviews = structured::extract_reviews(state, monitor.max_reviews);
            if !reviews.is_empty() {
                debug!("structured extraction yielded {} review(s)", reviews.len());
                return reviews;
            }
        }
        debug!("falling back to heuristic review extraction");
        heuristic::extract_reviews_from_page(&page.document(), monitor.max_reviews)
    }

    fn report(&self, outcome: &CycleOutcome) {
        if outcome.new_topics.is_empty() {
            info!("no new topics ({} recorded)", self.store.topic_count());
        } else {
            info!("{} new topic(s):", outcome.new_topics.len());
            for topic in &outcome.new_topics {
                info!(
                    "  {} | {} | {} | likes {} comments {} | {}",
                    topic.title, topic.author, topic.time, topic.likes, topic.comments, topic.link
                );
            }
        }

        if outcome.new_reviews.is_empty() {
            info!("no new reviews ({} recorded)", self.store.review_count());
        } else {
            info!("{} new review(s):", outcome.new_reviews.len());
            for review in &outcome.new_reviews {
                info!(
                    "  rating {} | {} | {}",
                    review.rating,
                    review.author,
                    truncate_chars(&review.content, 100)
                );
            }
        }
    }

    fn persist(&mut self) {
        match self.store.save(&self.data_file) {
            Ok(()) => {
                self.dirty = false;
                info!("snapshot saved to {}", self.data_file.display());
            }
            Err(e) => {
                // History now diverges from disk; keep flag set so the next
                // cycle persists even if it finds nothing new.
                self.dirty = true;
                warn!("snapshot write failed, retrying next cycle: {e:#}");
            }
        }
    }
}
