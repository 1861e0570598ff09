//! Source enumeration
//!
//! Directory pages are assumed not to overlap, so sources are passed on
//! without deduplication. Enumeration ends at the first empty page, at the
//! last known page, or when the per-run source budget is spent.

use crate::error::{HarvestError, Result};
use crate::extractor::{extract_page_count, extract_sources, parse_selector, DirectorySelectors};
use crate::model::Source;
use async_trait::async_trait;
use futures::stream::{self, Stream};
use reqwest::Client;
use scraper::Selector;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

#[async_trait]
pub trait DirectorySource: Send {
    /// Sources listed on one 1-based directory page
    async fn list_page(&mut self, page: u32) -> Result<Vec<Source>>;

    /// Total number of directory pages, when the directory advertises it
    async fn page_count(&mut self) -> Result<Option<u32>> {
        Ok(None)
    }
}

#[async_trait]
impl<T: DirectorySource + ?Sized> DirectorySource for Box<T> {
    async fn list_page(&mut self, page: u32) -> Result<Vec<Source>> {
        (**self).list_page(page).await
    }

    async fn page_count(&mut self) -> Result<Option<u32>> {
        (**self).page_count().await
    }
}

/// Directory listing served as paged HTML (`?page=N`)
pub struct HtmlDirectory {
    client: Client,
    base_url: Url,
    card: Selector,
    name: Selector,
    pagination: Selector,
}

impl HtmlDirectory {
    pub fn new(base_url: &str, selectors: &DirectorySelectors, timeout: Duration, insecure: bool) -> Result<Self> {
        let client = Client::builder()
            .user_agent("ReviewHarvester/0.1 (Educational Review Harvester)")
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure)
            .build()?;

        Ok(HtmlDirectory {
            client,
            base_url: Url::parse(base_url)?,
            card: parse_selector(&selectors.card)?,
            name: parse_selector(&selectors.name)?,
            pagination: parse_selector(&selectors.pagination)?,
        })
    }

    fn page_url(&self, page: u32) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().append_pair("page", &page.to_string());
        url
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| HarvestError::fetch(url.as_str(), e))?;

        response
            .text()
            .await
            .map_err(|e| HarvestError::fetch(url.as_str(), e))
    }
}

#[async_trait]
impl DirectorySource for HtmlDirectory {
    async fn list_page(&mut self, page: u32) -> Result<Vec<Source>> {
        let url = self.page_url(page);
        let html = self.fetch(&url).await?;
        Ok(extract_sources(&html, &url, &self.card, &self.name))
    }

    async fn page_count(&mut self) -> Result<Option<u32>> {
        let html = self.fetch(&self.base_url).await?;
        Ok(extract_page_count(&html, &self.pagination))
    }
}

/// A directory of known sources, listed entirely on page 1
pub struct FixedDirectory {
    sources: Vec<Source>,
}

impl FixedDirectory {
    pub fn new(sources: Vec<Source>) -> Self {
        FixedDirectory { sources }
    }
}

#[async_trait]
impl DirectorySource for FixedDirectory {
    async fn list_page(&mut self, page: u32) -> Result<Vec<Source>> {
        Ok(if page == 1 { self.sources.clone() } else { Vec::new() })
    }

    async fn page_count(&mut self) -> Result<Option<u32>> {
        Ok(Some(1))
    }
}

/// Bounds on a directory walk
#[derive(Debug, Clone, Copy)]
pub struct IteratorLimits {
    pub first_page: u32,
    pub last_page: Option<u32>,
    pub max_sources: Option<usize>,
}

impl Default for IteratorLimits {
    fn default() -> Self {
        IteratorLimits {
            first_page: 1,
            last_page: None,
            max_sources: None,
        }
    }
}

/// Lazy, finite and restartable walk over a directory
pub struct SourceIterator<D> {
    directory: D,
    limits: IteratorLimits,
    next_page: u32,
    last_page: Option<u32>,
    buffer: VecDeque<Source>,
    yielded: usize,
    exhausted: bool,
    resolved_last_page: bool,
}

impl<D: DirectorySource> SourceIterator<D> {
    pub fn new(directory: D, limits: IteratorLimits) -> Self {
        SourceIterator {
            directory,
            next_page: limits.first_page.max(1),
            last_page: limits.last_page,
            limits,
            buffer: VecDeque::new(),
            yielded: 0,
            exhausted: false,
            resolved_last_page: limits.last_page.is_some(),
        }
    }

    /// Start the walk over from the first page
    pub fn restart(&mut self) {
        self.next_page = self.limits.first_page.max(1);
        self.buffer.clear();
        self.yielded = 0;
        self.exhausted = false;
    }

    /// Next source, fetching the next directory page when the buffer runs dry.
    ///
    /// A directory error is yielded once and ends the walk.
    pub async fn next_source(&mut self) -> Option<Result<Source>> {
        if self.limits.max_sources.is_some_and(|max| self.yielded >= max) {
            return None;
        }

        while self.buffer.is_empty() {
            if self.exhausted {
                return None;
            }
            self.resolve_last_page().await;
            if self.last_page.is_some_and(|last| self.next_page > last) {
                self.exhausted = true;
                return None;
            }

            let page = self.next_page;
            self.next_page += 1;
            match self.directory.list_page(page).await {
                Ok(sources) if sources.is_empty() => {
                    debug!(page, "Directory page is empty, stopping");
                    self.exhausted = true;
                }
                Ok(sources) => {
                    info!(page, sources = sources.len(), "Directory page listed");
                    self.buffer.extend(sources);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        self.yielded += 1;
        self.buffer.pop_front().map(Ok)
    }

    /// Look up the page count once per iterator when no last page was configured
    async fn resolve_last_page(&mut self) {
        if self.resolved_last_page {
            return;
        }
        self.resolved_last_page = true;

        match self.directory.page_count().await {
            Ok(Some(count)) => {
                info!(pages = count, "Directory page count discovered");
                self.last_page = Some(count);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Could not read directory page count, walking until an empty page");
            }
        }
    }

    /// Adapt the walk into a stream of sources
    pub fn into_stream(self) -> impl Stream<Item = Result<Source>> {
        stream::unfold(self, |mut iter| async move {
            let next = iter.next_source().await?;
            Some((next, iter))
        })
    }
}
