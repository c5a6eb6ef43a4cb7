//! Incremental history store with JSON snapshot persistence.
//!
//! Holds every record ever seen for one monitored app, keyed by derived
//! identity. Merging a batch returns only the unseen subset; history entries
//! are never overwritten. The snapshot on disk is replaced atomically so a
//! crash mid-write cannot corrupt what the next run loads.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::record::{now_iso, ReviewRecord, ThreadRecord};

/// On-disk snapshot layout, one file per monitored app.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    last_updated: String,
    app_id: String,
    topics: Vec<ThreadRecord>,
    reviews: Vec<ReviewRecord>,
}

pub struct Store {
    app_id: String,
    topics: HashMap<String, ThreadRecord>,
    reviews: HashMap<String, ReviewRecord>,
}

impl Store {
    pub fn new(app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            topics: HashMap::new(),
            reviews: HashMap::new(),
        }
    }

    /// Restore history from a snapshot. A missing or unreadable file is not
    /// fatal: monitoring continues with empty history and rebuilds the file
    /// on the next persist.
    pub fn load(path: &Path, app_id: &str) -> Self {
        let mut store = Self::new(app_id);
        if !path.exists() {
            info!("no snapshot at {}, starting with empty history", path.display());
            return store;
        }

        let parsed = fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| serde_json::from_str::<Snapshot>(&raw).map_err(Into::into));
        match parsed {
            Ok(snapshot) => {
                if snapshot.app_id != app_id {
                    warn!(
                        "snapshot {} belongs to app {}, monitoring app {}",
                        path.display(),
                        snapshot.app_id,
                        app_id
                    );
                }
                for topic in snapshot.topics {
                    if let Some(key) = topic.identity() {
                        let key = key.to_string();
                        store.topics.entry(key).or_insert(topic);
                    }
                }
                for review in snapshot.reviews {
                    store.reviews.entry(review.identity()).or_insert(review);
                }
                info!(
                    "loaded {} topics, {} reviews from {}",
                    store.topics.len(),
                    store.reviews.len(),
                    path.display()
                );
            }
            Err(e) => {
                warn!("failed to load snapshot {}: {e:#}", path.display());
            }
        }
        store
    }

    /// Merge a batch of threads, returning only the unseen ones. First-seen
    /// wins: a duplicate key never replaces the stored record. Threads
    /// without a link are not identifiable, so they are reported as new on
    /// every run; accepted limitation of the link-based identity.
    pub fn merge_topics(&mut self, batch: Vec<ThreadRecord>) -> Vec<ThreadRecord> {
        let mut fresh = Vec::new();
        for topic in batch {
            if topic.link.is_empty() {
                fresh.push(topic);
                continue;
            }
            if self.topics.contains_key(&topic.link) {
                continue;
            }
            self.topics.insert(topic.link.clone(), topic.clone());
            fresh.push(topic);
        }
        fresh
    }

    /// Merge a batch of reviews, returning only the unseen ones.
    pub fn merge_reviews(&mut self, batch: Vec<ReviewRecord>) -> Vec<ReviewRecord> {
        let mut fresh = Vec::new();
        for review in batch {
            let key = review.identity();
            if self.reviews.contains_key(&key) {
                continue;
            }
            self.reviews.insert(key, review.clone());
            fresh.push(review);
        }
        fresh
    }

    /// Write the full history plus metadata, atomically replacing any prior
    /// snapshot (write to a sibling temp file, then rename over).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating snapshot dir {}", parent.display()))?;
            }
        }

        let snapshot = Snapshot {
            last_updated: now_iso(),
            app_id: self.app_id.clone(),
            topics: self.topics.values().cloned().collect(),
            reviews: self.reviews.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("writing snapshot temp file {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("replacing snapshot {}", path.display()))?;
        Ok(())
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn review_count(&self) -> usize {
        self.reviews.len()
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }
}
