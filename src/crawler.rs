use crate::convergence::policy_for;
use crate::database::ReviewStore;
use crate::error::Result;
use crate::extractor::ContentExtractor;
use crate::harvester::{HarvestConfig, Pacing, SessionEnd, SessionHarvester};
use crate::model::Source;
use crate::persister::{PersistReport, Persister};
use crate::renderer::PageRenderer;
use colored::*;
use futures::{pin_mut, Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, info_span, warn, Instrument};

/// Settings for one harvesting run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub harvest: HarvestConfig,
    /// Cap on load-more cycles per source, on top of growth detection
    pub max_cycles: Option<u32>,
    /// Pause between two sources
    pub source_pause: Pacing,
}

/// Outcome of one source
#[derive(Debug)]
pub struct SourceReport {
    pub collection_id: String,
    pub display_name: String,
    pub harvested: usize,
    pub malformed: usize,
    pub cycles: u32,
    pub persisted: PersistReport,
    pub end: SessionEnd,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub sources: Vec<SourceReport>,
    /// Set when the directory walk stopped on an error
    pub directory_error: Option<String>,
}

impl RunSummary {
    pub fn inserted(&self) -> usize {
        self.sources.iter().map(|s| s.persisted.inserted).sum()
    }

    pub fn skipped(&self) -> usize {
        self.sources.iter().map(|s| s.persisted.skipped).sum()
    }

    pub fn failed(&self) -> usize {
        self.sources.iter().map(|s| s.persisted.failed + s.malformed).sum()
    }
}

/// Harvests sources one after another over a single renderer and store
pub struct Crawler<'a, R, E, S> {
    renderer: R,
    extractor: E,
    store: &'a S,
    config: RunConfig,
    progress: ProgressBar,
}

impl<'a, R, E, S> Crawler<'a, R, E, S>
where
    R: PageRenderer,
    E: ContentExtractor,
    S: ReviewStore,
{
    pub fn new(renderer: R, extractor: E, store: &'a S, config: RunConfig) -> Self {
        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} sources {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        Crawler {
            renderer,
            extractor,
            store,
            config,
            progress,
        }
    }

    /// Replace the progress display, e.g. with `ProgressBar::hidden()`
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Run every source to convergence and persist its batch.
    ///
    /// A failed session only truncates its own source. An unavailable store
    /// aborts the run.
    pub async fn run<St>(&mut self, sources: St) -> Result<RunSummary>
    where
        St: Stream<Item = Result<Source>>,
    {
        pin_mut!(sources);
        let mut summary = RunSummary::default();

        while let Some(next) = sources.next().await {
            let source = match next {
                Ok(source) => source,
                Err(e) => {
                    warn!(error = %e, "Directory listing failed, stopping enumeration");
                    summary.directory_error = Some(e.to_string());
                    break;
                }
            };

            if !summary.sources.is_empty() {
                self.config.source_pause.pause().await;
            }

            self.progress.set_message(source.display_name.clone());
            let span = info_span!("source", collection = %source.collection_id);
            match self.harvest_source(&source).instrument(span).await {
                Ok(report) => {
                    self.print_report(&report);
                    summary.sources.push(report);
                    self.progress.inc(1);
                }
                Err(e) => {
                    error!(
                        error = %e,
                        sources_done = summary.sources.len(),
                        inserted = summary.inserted(),
                        "Storage unavailable, aborting run"
                    );
                    self.progress.abandon();
                    return Err(e);
                }
            }
        }

        self.progress.finish_and_clear();
        Ok(summary)
    }

    async fn harvest_source(&mut self, source: &Source) -> Result<SourceReport> {
        info!(name = %source.display_name, url = %source.page_link, "Harvesting source");

        let mut policy = policy_for(self.config.max_cycles);
        let session = SessionHarvester::new(&mut self.renderer, &self.extractor, &self.config.harvest)
            .harvest(source, policy.as_mut())
            .await;

        // partial batches from failed sessions are still worth keeping
        let persisted = Persister::new(self.store).persist_batch(&session.items)?;

        info!(
            harvested = session.items.len(),
            inserted = persisted.inserted,
            skipped = persisted.skipped,
            failed = persisted.failed,
            "Source done"
        );

        Ok(SourceReport {
            collection_id: source.collection_id.clone(),
            display_name: source.display_name.clone(),
            harvested: session.items.len(),
            malformed: session.malformed,
            cycles: session.cycles,
            persisted,
            end: session.end,
        })
    }

    fn print_report(&self, report: &SourceReport) {
        let line = format!(
            "[{}] {} new, {} already stored, {} failed ({} cycles, {})",
            report.display_name,
            report.persisted.inserted,
            report.persisted.skipped,
            report.persisted.failed + report.malformed,
            report.cycles,
            report.end
        );
        let line = match report.end {
            SessionEnd::FetchFailed(_) => line.red(),
            SessionEnd::Empty => line.yellow(),
            SessionEnd::Converged(_) if report.persisted.failed + report.malformed > 0 => line.yellow(),
            SessionEnd::Converged(_) => line.green(),
        };
        self.progress.println(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteStore;
    use crate::directory::{FixedDirectory, IteratorLimits, SourceIterator};
    use crate::error::HarvestError;
    use crate::harvester::tests::{config, LineExtractor, ScriptedRenderer};
    use crate::model::Item;
    use futures::stream;

    fn run_config() -> RunConfig {
        RunConfig {
            harvest: config(),
            max_cycles: None,
            source_pause: Pacing::none(),
        }
    }

    fn listing(n: usize) -> String {
        (1..=n)
            .map(|i| format!("review {}|author {}", i, i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn sources() -> FixedDirectory {
        FixedDirectory::new(vec![
            Source::new("Mo's & Joe's Diner", "https://example.com/diner"),
            Source::new("Pizza Hut", "https://example.com/pizza"),
        ])
    }

    #[tokio::test]
    async fn test_run_persists_each_source() {
        let store = SqliteStore::open_in_memory().unwrap();
        // one snapshot and one failed click per source
        let renderer = ScriptedRenderer::new(vec![listing(3), listing(2)], vec![false, false]);
        let mut crawler = Crawler::new(renderer, LineExtractor, &store, run_config())
            .with_progress(ProgressBar::hidden());

        let stream = SourceIterator::new(sources(), IteratorLimits::default()).into_stream();
        let summary = crawler.run(stream).await.unwrap();

        assert_eq!(summary.sources.len(), 2);
        assert_eq!(summary.sources[0].collection_id, "mos-joes-diner");
        assert_eq!(summary.sources[0].persisted.inserted, 3);
        assert_eq!(summary.sources[1].persisted.inserted, 2);
        assert_eq!(summary.inserted(), 5);
        assert_eq!(store.review_count().unwrap(), 5);
        assert_eq!(store.collection_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_malformed_review_fails_once_per_source() {
        let store = SqliteStore::open_in_memory().unwrap();
        let snapshot = |n: usize| format!("bad|\n{}", listing(n));
        let renderer = ScriptedRenderer::new(
            vec![snapshot(1), snapshot(2), snapshot(3), snapshot(3)],
            vec![true, true, true],
        );
        let mut crawler = Crawler::new(renderer, LineExtractor, &store, run_config())
            .with_progress(ProgressBar::hidden());
        let source = Source::new("Mo's & Joe's Diner", "https://example.com/diner");
        let summary = crawler.run(stream::iter(vec![Ok(source)])).await.unwrap();

        assert_eq!(summary.inserted(), 3);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.sources[0].cycles, 4);
        assert_eq!(crawler.renderer.click_count, 3);
    }

    #[tokio::test]
    async fn test_rerun_skips_everything() {
        let store = SqliteStore::open_in_memory().unwrap();

        for expected_inserted in [3, 0] {
            let renderer = ScriptedRenderer::new(vec![listing(3)], vec![false]);
            let mut crawler = Crawler::new(renderer, LineExtractor, &store, run_config())
                .with_progress(ProgressBar::hidden());
            let source = Source::new("Mo's & Joe's Diner", "https://example.com/diner");
            let summary = crawler.run(stream::iter(vec![Ok(source)])).await.unwrap();

            assert_eq!(summary.inserted(), expected_inserted);
            assert_eq!(summary.skipped(), 3 - expected_inserted);
        }
        assert_eq!(store.review_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failed_session_does_not_stop_run() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut renderer = ScriptedRenderer::default();
        renderer
            .snapshots
            .push_back(Err(HarvestError::fetch("https://example.com/diner", "timed out")));
        renderer.snapshots.push_back(Ok(listing(2)));
        let mut crawler = Crawler::new(renderer, LineExtractor, &store, run_config())
            .with_progress(ProgressBar::hidden());

        let stream = SourceIterator::new(sources(), IteratorLimits::default()).into_stream();
        let summary = crawler.run(stream).await.unwrap();

        assert_eq!(summary.sources.len(), 2);
        assert!(matches!(summary.sources[0].end, SessionEnd::FetchFailed(_)));
        assert_eq!(summary.sources[1].persisted.inserted, 2);
    }

    #[tokio::test]
    async fn test_directory_error_is_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        let renderer = ScriptedRenderer::new(vec![listing(1)], vec![false]);
        let mut crawler = Crawler::new(renderer, LineExtractor, &store, run_config())
            .with_progress(ProgressBar::hidden());

        let items = vec![
            Ok(Source::new("Diner", "https://example.com/diner")),
            Err(HarvestError::fetch("https://example.com/restaurants?page=2", "timed out")),
            Ok(Source::new("Never reached", "https://example.com/never")),
        ];
        let summary = crawler.run(stream::iter(items)).await.unwrap();

        assert_eq!(summary.sources.len(), 1);
        assert!(summary.directory_error.is_some());
    }

    struct DownStore;

    impl ReviewStore for DownStore {
        fn exists(&self, _: &str, _: &str, _: &str) -> Result<bool> {
            Err(HarvestError::StorageUnavailable("database is locked".to_string()))
        }

        fn insert(&self, _: &Item) -> Result<bool> {
            Err(HarvestError::StorageUnavailable("database is locked".to_string()))
        }
    }

    #[tokio::test]
    async fn test_storage_unavailable_aborts_run() {
        let renderer = ScriptedRenderer::new(vec![listing(2), listing(2)], vec![false, false]);
        let mut crawler = Crawler::new(renderer, LineExtractor, &DownStore, run_config())
            .with_progress(ProgressBar::hidden());

        let stream = SourceIterator::new(sources(), IteratorLimits::default()).into_stream();
        let result = crawler.run(stream).await;

        assert!(matches!(result, Err(HarvestError::StorageUnavailable(_))));
        assert_eq!(crawler.renderer.loads.len(), 1);
    }
}
