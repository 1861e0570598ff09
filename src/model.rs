use crate::error::{HarvestError, Result};
use regex::Regex;

lazy_static::lazy_static! {
    static ref SEPARATOR_REGEX: Regex = Regex::new(r"[\s&]+").unwrap();
    static ref DASH_RUN_REGEX: Regex = Regex::new(r"-{2,}").unwrap();
    static ref RATING_REGEX: Regex = Regex::new(r"\d+(?:[.,]\d+)?").unwrap();
}

/// Full rendered content of a page at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub url: String,
    pub html: String,
}

impl Snapshot {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Snapshot {
            url: url.into(),
            html: html.into(),
        }
    }
}

/// An item as it came out of the extractor, every field optional
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    pub text: Option<String>,
    pub rating: Option<String>,
    pub author: Option<String>,
}

/// A validated review, ready to be fingerprinted and persisted
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub text: String,
    pub rating: Option<f64>,
    pub author: String,
    pub source_tag: String,
    pub collection_id: String,
}

impl Item {
    /// Validate a raw item for the given collection.
    ///
    /// `text` and `author` are required. The rating is best effort: an
    /// unparseable or out-of-scale rating becomes `None` rather than an error.
    pub fn from_raw(
        raw: RawItem,
        source_tag: &str,
        collection_id: &str,
        rating_scale: f64,
    ) -> Result<Self> {
        let text = raw.text.ok_or(HarvestError::MalformedItem("text"))?;
        let author = raw.author.ok_or(HarvestError::MalformedItem("author"))?;
        let rating = raw
            .rating
            .as_deref()
            .and_then(|r| parse_rating(r, rating_scale));

        Ok(Item {
            text,
            rating,
            author,
            source_tag: source_tag.to_string(),
            collection_id: collection_id.to_string(),
        })
    }
}

/// A harvesting target (one restaurant)
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub collection_id: String,
    pub display_name: String,
    pub page_link: String,
}

impl Source {
    pub fn new(display_name: &str, page_link: impl Into<String>) -> Self {
        Source {
            collection_id: normalize_collection_id(display_name),
            display_name: display_name.trim().to_string(),
            page_link: page_link.into(),
        }
    }
}

/// Normalize a display name into a collection identifier.
///
/// Lower-cases, collapses whitespace and `&` into `-`, strips anything that is
/// not alphanumeric or `-`, and squeezes repeated separators.
pub fn normalize_collection_id(name: &str) -> String {
    let lowered = name.to_lowercase();
    let separated = SEPARATOR_REGEX.replace_all(&lowered, "-");
    let stripped: String = separated
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .collect();
    DASH_RUN_REGEX
        .replace_all(&stripped, "-")
        .trim_matches('-')
        .to_string()
}

/// Parse a rating widget's text into a one-decimal score within `0..=scale`
pub fn parse_rating(text: &str, scale: f64) -> Option<f64> {
    let number = RATING_REGEX.find(text)?.as_str().replace(',', ".");
    let value: f64 = number.parse().ok()?;
    let rounded = (value * 10.0).round() / 10.0;
    if (0.0..=scale).contains(&rounded) {
        Some(rounded)
    } else {
        None
    }
}
