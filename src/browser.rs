//! Rendered-page acquisition through a Browserless instance.
//!
//! TapTap pages are client-rendered; a plain HTTP fetch returns an empty
//! shell. A Browserless `/function` call drives a real Chromium session:
//! navigate, wait for the feed to appear, scroll to trigger lazy loading,
//! then hand back both the hydration state and the final DOM in one round
//! trip. The extraction core only sees the `PageFetcher` trait.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use scraper::Html;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::BrowserConfig;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A fully rendered page: the captured application state (when the page
/// exposed one) and the final markup.
pub struct RenderedPage {
    pub app_state: Option<Value>,
    pub html: String,
}

impl RenderedPage {
    pub fn document(&self) -> Html {
        Html::parse_document(&self.html)
    }
}

/// Supplies rendered pages to the monitor. `wait_selector` is a readiness
/// hint: its absence after the timeout is non-fatal.
#[async_trait]
pub trait PageFetcher {
    async fn fetch(&self, url: &str, wait_selector: &str) -> Result<RenderedPage>;
}

pub struct BrowserlessRenderer {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    headless: bool,
    nav_timeout_ms: u64,
    selector_timeout_ms: u64,
    scroll_passes: u32,
}

/// Payload returned by the injected page function.
#[derive(Deserialize)]
struct FunctionResult {
    state: Option<String>,
    html: String,
}

impl BrowserlessRenderer {
    pub fn new(config: &BrowserConfig) -> Result<Self> {
        // Leave headroom beyond the in-page navigation timeout.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.nav_timeout_ms + 30_000))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            headless: config.headless,
            nav_timeout_ms: config.nav_timeout_ms,
            selector_timeout_ms: config.selector_timeout_ms,
            scroll_passes: config.scroll_passes,
        })
    }

    /// Puppeteer script executed inside Browserless. Mirrors a human visit:
    /// network-idle navigation, best-effort wait for the feed selector,
    /// scroll passes to load more cards, scroll back, capture state + DOM.
    fn function_code(&self, url: &str, wait_selector: &str) -> String {
        format!(
            r#"export default async function ({{ page }}) {{
  await page.goto({url:?}, {{ waitUntil: "networkidle2", timeout: {nav} }});
  try {{
    await page.waitForSelector('{selector}', {{ timeout: {wait} }});
  }} catch (err) {{
    // content selector never appeared; proceed with whatever rendered
  }}
  for (let i = 0; i < {scrolls}; i++) {{
    await page.evaluate("window.scrollBy(0, 800)");
    await new Promise((resolve) => setTimeout(resolve, 500));
  }}
  await page.evaluate("window.scrollTo(0, 0)");
  const state = await page.evaluate(
    () => (window.__NUXT__ ? JSON.stringify(window.__NUXT__) : null)
  );
  const html = await page.content();
  return {{ data: {{ state, html }}, type: "application/json" }};
}}"#,
            nav = self.nav_timeout_ms,
            selector = wait_selector,
            wait = self.selector_timeout_ms,
            scrolls = self.scroll_passes,
        )
    }
}

#[async_trait]
impl PageFetcher for BrowserlessRenderer {
    async fn fetch(&self, url: &str, wait_selector: &str) -> Result<RenderedPage> {
        let endpoint = format!("{}/function", self.endpoint);
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(ref token) = self.token {
            query.push(("token", token.clone()));
        }
        if !self.headless {
            query.push(("launch", r#"{"headless":false}"#.to_string()));
        }

        debug!("rendering {url}");
        let body = serde_json::json!({ "code": self.function_code(url, wait_selector) });
        let resp = self
            .client
            .post(&endpoint)
            .query(&query)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(anyhow!("render of {url} failed: {status} {message}"));
        }

        let result: FunctionResult = resp.json().await?;
        let app_state = result
            .state
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        if app_state.is_none() {
            debug!("no application state captured for {url}");
        }

        Ok(RenderedPage {
            app_state,
            html: result.html,
        })
    }
}
