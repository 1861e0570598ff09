use crate::error::{HarvestError, Result};
use crate::model::{RawItem, Snapshot, Source};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

/// Attributes a load-more trigger may carry its target in, in lookup order
const TRIGGER_TARGET_ATTRS: [&str; 4] = ["href", "data-href", "data-url", "formaction"];

/// Parse a CSS selector, keeping the offending text in the error
pub fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| HarvestError::Selector {
        selector: selector.to_string(),
        reason: format!("{:?}", e),
    })
}

/// Turns a snapshot into raw items
pub trait ContentExtractor: Send + Sync {
    fn parse(&self, snapshot: &Snapshot, item_selector: &str) -> Result<Vec<RawItem>>;
}

/// CSS selectors for the fields inside one review element
#[derive(Debug, Clone)]
pub struct ReviewSelectors {
    pub text: String,
    pub author: String,
    pub rating: String,
}

/// Review extractor backed by `scraper`
pub struct ReviewExtractor {
    text: Selector,
    author: Selector,
    rating: Selector,
}

impl ReviewExtractor {
    pub fn new(selectors: &ReviewSelectors) -> Result<Self> {
        Ok(ReviewExtractor {
            text: parse_selector(&selectors.text)?,
            author: parse_selector(&selectors.author)?,
            rating: parse_selector(&selectors.rating)?,
        })
    }
}

impl ContentExtractor for ReviewExtractor {
    fn parse(&self, snapshot: &Snapshot, item_selector: &str) -> Result<Vec<RawItem>> {
        let item_selector = parse_selector(item_selector)?;
        let document = Html::parse_document(&snapshot.html);

        let items = document
            .select(&item_selector)
            .map(|element| RawItem {
                text: first_text(&element, &self.text),
                rating: first_text(&element, &self.rating),
                author: first_text(&element, &self.author),
            })
            .collect();

        Ok(items)
    }
}

/// Trimmed text of the first descendant matching `selector`; empty counts as absent
fn first_text(element: &ElementRef, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(|node| node.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Whether any element in the HTML matches the selector
pub fn has_match(html: &str, selector: &str) -> Result<bool> {
    let selector = parse_selector(selector)?;
    Ok(Html::parse_document(html).select(&selector).next().is_some())
}

/// Target URL of the last matching trigger element, resolved against `base_url`
pub fn trigger_target(html: &str, selector: &Selector, base_url: &Url) -> Option<Url> {
    let document = Html::parse_document(html);
    let element = document.select(selector).last()?;

    TRIGGER_TARGET_ATTRS
        .iter()
        .filter_map(|attr| element.value().attr(attr))
        .map(str::trim)
        .find(|target| !target.is_empty() && !target.starts_with("javascript:") && *target != "#")
        .and_then(|target| base_url.join(target).ok())
        .filter(|url| url.scheme() == "http" || url.scheme() == "https")
}

/// CSS selectors for a directory listing page
#[derive(Debug, Clone)]
pub struct DirectorySelectors {
    pub card: String,
    pub name: String,
    pub pagination: String,
}

/// Extract sources from a directory page.
///
/// Each card must carry a name and a link; cards missing either are skipped.
pub fn extract_sources(
    html: &str,
    page_url: &Url,
    card: &Selector,
    name: &Selector,
) -> Vec<Source> {
    let document = Html::parse_document(html);
    let link = Selector::parse("a[href]").unwrap();
    let mut sources = Vec::new();

    for element in document.select(card) {
        let display_name = first_text(&element, name);
        let href = element
            .select(&link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| page_url.join(href).ok());

        match (display_name, href) {
            (Some(display_name), Some(mut href)) => {
                href.set_fragment(None);
                sources.push(Source::new(&display_name, href.to_string()));
            }
            (display_name, _) => {
                debug!(?display_name, page = %page_url, "Skipping directory card without name or link");
            }
        }
    }

    sources
}

/// Total number of directory pages, read from the pagination widget.
///
/// The last entry is the "next" arrow, so the page count is the one before it.
pub fn extract_page_count(html: &str, pagination: &Selector) -> Option<u32> {
    let document = Html::parse_document(html);
    let entries: Vec<String> = document
        .select(pagination)
        .map(|li| li.text().collect::<String>().trim().to_string())
        .collect();

    let index = entries.len().checked_sub(2)?;
    entries[index].parse().ok()
}
