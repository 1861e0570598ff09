//! Error types for the harvester

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    /// Network, timeout or HTTP status failure while loading a page
    #[error("Fetch failed for {url}: {reason}")]
    FetchFailure { url: String, reason: String },

    /// A raw item lacks one of its required fields
    #[error("Malformed item: missing {0}")]
    MalformedItem(&'static str),

    /// The durable store cannot be reached; nothing can be persisted
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HarvestError {
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        HarvestError::FetchFailure {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error must abort the whole run rather than one item or source
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, HarvestError::StorageUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
