//! TapTap Community Monitor
//!
//! Core functionality for incrementally monitoring a TapTap game community:
//! rendered-page acquisition, structured and heuristic extraction, and
//! deduplicated history with snapshot persistence.

pub mod browser;
pub mod config;
pub mod heuristic;
pub mod monitor;
pub mod record;
pub mod store;
pub mod structured;

pub use browser::{BrowserlessRenderer, PageFetcher, RenderedPage};
pub use config::Config;
pub use monitor::Monitor;
pub use store::Store;
