//! Page rendering collaborators
//!
//! `Err` from a renderer always means the page could not be loaded (network,
//! timeout, HTTP status). An element that never shows up is `Ok(false)`.

use crate::error::{HarvestError, Result};
use crate::extractor::{has_match, parse_selector, trigger_target};
use crate::model::Snapshot;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[async_trait]
pub trait PageRenderer: Send {
    /// Navigate to `url` and return its rendered content
    async fn load(&mut self, url: &str) -> Result<Snapshot>;

    /// Current rendered content of the page last loaded
    async fn snapshot(&mut self) -> Result<Snapshot>;

    /// Wait until an element matching `selector` is present
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool>;

    /// Click the element matching `selector` once it is clickable
    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<bool>;
}

/// Renderer over plain HTTP.
///
/// Load-more triggers are followed through the URL they carry and the
/// response is appended to the current document, so the snapshot grows the
/// way a browser page does.
pub struct HttpRenderer {
    client: Client,
    current: Option<Snapshot>,
    followed: HashSet<String>,
}

impl HttpRenderer {
    pub fn new(timeout: Duration, insecure: bool) -> Result<Self> {
        let client = Client::builder()
            .user_agent("ReviewHarvester/0.1 (Educational Review Harvester)")
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure)
            .build()?;

        Ok(HttpRenderer {
            client,
            current: None,
            followed: HashSet::new(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| HarvestError::fetch(url, e))?;

        response.text().await.map_err(|e| HarvestError::fetch(url, e))
    }

    fn current(&self) -> Result<&Snapshot> {
        self.current
            .as_ref()
            .ok_or_else(|| HarvestError::Config("no page loaded".to_string()))
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn load(&mut self, url: &str) -> Result<Snapshot> {
        let html = self.fetch(url).await?;
        let snapshot = Snapshot::new(url, html);
        self.current = Some(snapshot.clone());
        self.followed.clear();
        Ok(snapshot)
    }

    async fn snapshot(&mut self) -> Result<Snapshot> {
        self.current().cloned()
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let url = {
                let current = self.current()?;
                if has_match(&current.html, selector)? {
                    return Ok(true);
                }
                current.url.clone()
            };

            if tokio::time::Instant::now() + WAIT_POLL_INTERVAL > deadline {
                debug!(selector, url = %url, "Element never appeared");
                return Ok(false);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;

            let html = self.fetch(&url).await?;
            self.current = Some(Snapshot::new(url, html));
        }
    }

    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<bool> {
        let (target, snapshot_url) = {
            let parsed = parse_selector(selector)?;
            let current = self.current()?;
            let base = Url::parse(&current.url)?;
            (trigger_target(&current.html, &parsed, &base), current.url.clone())
        };

        let target = match target {
            Some(target) => target.to_string(),
            None => {
                debug!(selector, url = %snapshot_url, "No clickable trigger");
                return Ok(false);
            }
        };

        if !self.followed.insert(target.clone()) {
            debug!(target = %target, "Trigger target already followed");
            return Ok(false);
        }

        let html = match tokio::time::timeout(timeout, self.fetch(&target)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(target = %target, "Trigger timed out");
                return Ok(false);
            }
        };

        if let Some(current) = self.current.as_mut() {
            current.html.push_str(&html);
        }
        Ok(true)
    }
}
