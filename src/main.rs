mod cli;
mod convergence;
mod crawler;
mod database;
mod directory;
mod error;
mod extractor;
mod fingerprint;
mod harvester;
mod model;
mod persister;
mod renderer;

use cli::{parse_args, Args};
use colored::*;
use crawler::{Crawler, RunConfig, RunSummary};
use database::SqliteStore;
use directory::{DirectorySource, FixedDirectory, HtmlDirectory, IteratorLimits, SourceIterator};
use extractor::ReviewExtractor;
use harvester::Pacing;
use model::{normalize_collection_id, Source};
use renderer::HttpRenderer;
use std::time::{Duration, Instant};
use tracing::{info, info_span, Instrument};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sets up structured logging with tracing
fn setup_logging(verbose: bool, json_output: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

/// Single restaurant from the command line, or the paged directory
fn directory_for(args: &Args, timeout: Duration) -> error::Result<Box<dyn DirectorySource>> {
    match &args.restaurant {
        Some(name) => {
            let link = format!(
                "{}/{}",
                args.restaurant_base_url.trim_end_matches('/'),
                normalize_collection_id(name)
            );
            Ok(Box::new(FixedDirectory::new(vec![Source::new(name, link)])))
        }
        None => Ok(Box::new(HtmlDirectory::new(
            &args.directory_url,
            &args.directory_selectors(),
            timeout,
            args.insecure,
        )?)),
    }
}

async fn run(args: &Args, store: &SqliteStore) -> error::Result<RunSummary> {
    let timeout = Duration::from_millis(args.timeout);
    let renderer = HttpRenderer::new(timeout, args.insecure)?;
    let extractor = ReviewExtractor::new(&args.review_selectors())?;

    let limits = IteratorLimits {
        first_page: args.first_page,
        last_page: args.last_page,
        max_sources: args.max_sources,
    };
    let sources = SourceIterator::new(directory_for(args, timeout)?, limits);

    let config = RunConfig {
        harvest: args.harvest_config(),
        max_cycles: args.max_cycles(),
        source_pause: Pacing {
            min: Duration::from_secs(2),
            max: Duration::from_secs(5),
        },
    };

    let mut crawler = Crawler::new(renderer, extractor, store, config);
    crawler.run(sources.into_stream()).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();
    setup_logging(args.verbose, args.json_logs);
    args.validate()?;

    let run_id = uuid::Uuid::new_v4().to_string();

    println!("Review Harvester v0.1.0");
    println!("==========================");
    match &args.restaurant {
        Some(name) => println!("Restaurant: {}", name),
        None => println!("Directory: {}", args.directory_url),
    }
    println!("Max sources: {}", args.max_sources.map_or("unlimited".to_string(), |n| n.to_string()));
    println!("Database: {}", args.db);
    println!("Run: {}", run_id);
    println!();

    // Opened once for the whole run and closed on every exit path below
    let store = SqliteStore::open(&args.db)?;

    let start_time = Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting harvest");

    let result = run(&args, &store)
        .instrument(info_span!("run", run_id = %run_id))
        .await;

    let totals = store
        .review_count()
        .and_then(|reviews| store.collection_count().map(|collections| (reviews, collections)));
    store.close()?;
    let summary = result?;
    let (total_reviews, total_collections) = totals?;

    let elapsed = start_time.elapsed();

    println!();
    println!("==========================");
    println!("{}", "Harvest complete!".green().bold());
    println!("Time elapsed: {:.2}s", elapsed.as_secs_f64());
    println!("Restaurants visited: {}", summary.sources.len());
    println!("Reviews inserted: {}", summary.inserted());
    println!("Reviews already stored: {}", summary.skipped());
    if summary.failed() > 0 {
        println!("{}", format!("Reviews failed: {}", summary.failed()).yellow());
    }
    if let Some(e) = &summary.directory_error {
        println!("{}", format!("Directory stopped early: {}", e).red());
    }
    println!("Reviews in database: {} across {} restaurants", total_reviews, total_collections);
    println!("Results saved to: {}", args.db);

    Ok(())
}
