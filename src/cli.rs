use crate::error::{HarvestError, Result};
use crate::extractor::{parse_selector, DirectorySelectors, ReviewSelectors};
use crate::harvester::{HarvestConfig, Pacing};
use clap::Parser;
use std::time::Duration;

/// Review Harvester - collects restaurant reviews behind "load more" buttons
#[derive(Parser, Debug, Clone)]
#[command(name = "review-harvester")]
#[command(author = "Arthur")]
#[command(version = "0.1.0")]
#[command(about = "Harvest restaurant reviews into SQLite, each review stored once", long_about = None)]
pub struct Args {
    /// Harvest a single restaurant by name instead of walking the directory
    #[arg(short, long)]
    pub restaurant: Option<String>,

    /// Base URL a restaurant's normalized name is appended to
    #[arg(long, default_value = "https://www.talabat.com/uae")]
    pub restaurant_base_url: String,

    /// Directory listing URL, paged with ?page=N
    #[arg(long, default_value = "https://www.talabat.com/egypt/restaurants/")]
    pub directory_url: String,

    /// First directory page to visit
    #[arg(long, default_value_t = 1)]
    pub first_page: u32,

    /// Last directory page to visit (default: read from the pagination widget)
    #[arg(long)]
    pub last_page: Option<u32>,

    /// Maximum number of restaurants to harvest in this run
    #[arg(short = 'n', long)]
    pub max_sources: Option<usize>,

    /// Maximum load-more cycles per restaurant (0 = until convergence)
    #[arg(long, default_value_t = 0)]
    pub max_cycles: u32,

    /// SQLite database path
    #[arg(long, default_value = "reviews.db")]
    pub db: String,

    /// HTTP request timeout in milliseconds
    #[arg(short = 't', long, default_value_t = 30000)]
    pub timeout: u64,

    /// How long to wait for reviews or the load-more button, in milliseconds
    #[arg(long, default_value_t = 10000)]
    pub wait_timeout: u64,

    /// Minimum pause between load-more cycles, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub min_delay: u64,

    /// Maximum pause between load-more cycles, in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub max_delay: u64,

    /// Platform name stored with every review
    #[arg(long, default_value = "Talabat")]
    pub source_tag: String,

    /// Highest valid rating; ratings above it are dropped
    #[arg(long, default_value_t = 5.0)]
    pub rating_scale: f64,

    /// Selector for one review element
    #[arg(long, default_value = r#"div[data-testid="reviews-item-component"]"#)]
    pub item_selector: String,

    /// Selector for the review text inside a review element
    #[arg(long, default_value = r#"p[data-testid="customer-review"]"#)]
    pub text_selector: String,

    /// Selector for the author inside a review element
    #[arg(long, default_value = r#"div[data-testid="customer-name"]"#)]
    pub author_selector: String,

    /// Selector for the rating inside a review element
    #[arg(long, default_value = r#"div[data-testid="restaurant-rating-comp"] > div > div"#)]
    pub rating_selector: String,

    /// Selector for the load-more button
    #[arg(long, default_value = r#"button[data-testid="btn-load-more"]"#)]
    pub load_more_selector: String,

    /// Selector for a restaurant card on a directory page
    #[arg(long, default_value = r#"div[data-testid="vendor"]"#)]
    pub card_selector: String,

    /// Selector for the restaurant name inside a card
    #[arg(long, default_value = r#"p[data-testid="vendor-name"]"#)]
    pub name_selector: String,

    /// Selector for the directory pagination entries
    #[arg(long, default_value = r#"ul[data-test="pagination"] li"#)]
    pub pagination_selector: String,

    /// Verbose output
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Output logs as JSON
    #[arg(long, default_value_t = false)]
    pub json_logs: bool,

    /// Disable SSL certificate verification
    #[arg(short = 'k', long, default_value_t = false)]
    pub insecure: bool,
}

impl Args {
    /// Check every selector and bound before any network or storage work
    pub fn validate(&self) -> Result<()> {
        for selector in [
            &self.item_selector,
            &self.text_selector,
            &self.author_selector,
            &self.rating_selector,
            &self.load_more_selector,
            &self.card_selector,
            &self.name_selector,
            &self.pagination_selector,
        ] {
            parse_selector(selector)?;
        }

        if self.min_delay > self.max_delay {
            return Err(HarvestError::Config(format!(
                "--min-delay ({}) exceeds --max-delay ({})",
                self.min_delay, self.max_delay
            )));
        }
        if self.rating_scale.is_nan() || self.rating_scale <= 0.0 {
            return Err(HarvestError::Config("--rating-scale must be positive".to_string()));
        }
        if let Some(last) = self.last_page {
            if last < self.first_page {
                return Err(HarvestError::Config(format!(
                    "--last-page ({}) is before --first-page ({})",
                    last, self.first_page
                )));
            }
        }
        Ok(())
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            min: Duration::from_millis(self.min_delay),
            max: Duration::from_millis(self.max_delay),
        }
    }

    pub fn harvest_config(&self) -> HarvestConfig {
        HarvestConfig {
            item_selector: self.item_selector.clone(),
            load_more_selector: self.load_more_selector.clone(),
            source_tag: self.source_tag.clone(),
            rating_scale: self.rating_scale,
            wait_timeout: Duration::from_millis(self.wait_timeout),
            pacing: self.pacing(),
        }
    }

    pub fn review_selectors(&self) -> ReviewSelectors {
        ReviewSelectors {
            text: self.text_selector.clone(),
            author: self.author_selector.clone(),
            rating: self.rating_selector.clone(),
        }
    }

    pub fn directory_selectors(&self) -> DirectorySelectors {
        DirectorySelectors {
            card: self.card_selector.clone(),
            name: self.name_selector.clone(),
            pagination: self.pagination_selector.clone(),
        }
    }

    pub fn max_cycles(&self) -> Option<u32> {
        (self.max_cycles > 0).then_some(self.max_cycles)
    }
}

pub fn parse_args() -> Args {
    Args::parse()
}
