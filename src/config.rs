//! Configuration loading and management
//!
//! Every field has a sensible default so the binary runs without a config
//! file; a TOML file (and CLI flags on top) override selectively.

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub browser: BrowserConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// TapTap app id; 236096 is the community this monitor was built for.
    pub app_id: String,
    pub base_url: String,
    /// Minutes between cycles; 0 means a single cycle.
    pub poll_interval_minutes: u64,
    pub max_topics: usize,
    pub max_reviews: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            app_id: "236096".to_string(),
            base_url: "https://www.taptap.cn".to_string(),
            poll_interval_minutes: 30,
            max_topics: 10,
            max_reviews: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Browserless endpoint handling the actual Chromium sessions.
    pub endpoint: String,
    pub token: Option<String>,
    pub headless: bool,
    pub nav_timeout_ms: u64,
    pub selector_timeout_ms: u64,
    pub scroll_passes: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000".to_string(),
            token: None,
            headless: true,
            nav_timeout_ms: 30_000,
            selector_timeout_ms: 15_000,
            scroll_passes: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Snapshot path override; defaults to `data/{app_id}_data.json`.
    pub data_file: Option<String>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn data_file(&self) -> PathBuf {
        match &self.storage.data_file {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(format!("data/{}_data.json", self.monitor.app_id)),
        }
    }
}
