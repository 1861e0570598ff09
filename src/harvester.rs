//! Session harvester
//!
//! Drives one source through FETCHING → EXTRACTING → DEDUPING → TRIGGERING
//! until its convergence policy says stop. Snapshots are cumulative, so every
//! cycle re-reads items already collected; the fingerprint index keeps only
//! the first sighting of each.
//!
//! Extraction of a cycle always completes before its trigger is pressed, and
//! the trigger outcome is judged against that same extraction. A session that
//! has already stopped growing does not press the trigger again.

use crate::convergence::{ConvergencePolicy, CycleObservation, Decision, StopReason, TriggerOutcome};
use crate::error::{HarvestError, Result};
use crate::extractor::ContentExtractor;
use crate::fingerprint::{identity, raw_identity, Fingerprint, FingerprintIndex};
use crate::model::{Item, Snapshot, Source};
use crate::renderer::PageRenderer;
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Bounded random delay between cycles
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub min: Duration,
    pub max: Duration,
}

impl Pacing {
    #[cfg(test)]
    pub fn none() -> Self {
        Pacing {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }

    pub async fn pause(&self) {
        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Harvesting knobs shared by every session of a run
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub item_selector: String,
    pub load_more_selector: String,
    pub source_tag: String,
    pub rating_scale: f64,
    /// Bound on waiting for items to appear and for the trigger to be clickable
    pub wait_timeout: Duration,
    pub pacing: Pacing,
}

/// How a session came to an end
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    Converged(StopReason),
    /// The first extraction found nothing
    Empty,
    /// The page or its next batch could not be fetched; items gathered so far are kept
    FetchFailed(String),
}

impl std::fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEnd::Converged(reason) => write!(f, "{}", reason),
            SessionEnd::Empty => write!(f, "no items"),
            SessionEnd::FetchFailed(reason) => write!(f, "fetch failed: {}", reason),
        }
    }
}

/// Final state of one session
#[derive(Debug)]
pub struct SessionReport {
    pub items: Vec<Item>,
    pub cycles: u32,
    pub malformed: usize,
    pub end: SessionEnd,
}

/// Ephemeral per-source state; never persisted
#[derive(Debug, Default)]
struct SessionState {
    seen_fingerprints: FingerprintIndex,
    previous_snapshot_size: usize,
    accumulated_items: Vec<Item>,
    cycles: u32,
    /// Malformed entries already counted; cumulative snapshots repeat them
    malformed_seen: FingerprintIndex,
    malformed: usize,
}

enum Phase {
    Fetching,
    Extracting(Snapshot),
    Deduping(Vec<(Fingerprint, Item)>),
    Triggering { current_size: usize },
    Converged(SessionEnd),
}

pub struct SessionHarvester<'a, R, E> {
    renderer: &'a mut R,
    extractor: &'a E,
    config: &'a HarvestConfig,
}

impl<'a, R: PageRenderer, E: ContentExtractor> SessionHarvester<'a, R, E> {
    pub fn new(renderer: &'a mut R, extractor: &'a E, config: &'a HarvestConfig) -> Self {
        SessionHarvester {
            renderer,
            extractor,
            config,
        }
    }

    /// Harvest one source until convergence, returning its deduplicated batch
    #[instrument(skip(self, source, policy), fields(collection = %source.collection_id))]
    pub async fn harvest(
        &mut self,
        source: &Source,
        policy: &mut dyn ConvergencePolicy,
    ) -> SessionReport {
        let mut state = SessionState::default();
        let mut phase = Phase::Fetching;

        let end = loop {
            phase = match phase {
                Phase::Fetching => {
                    state.cycles += 1;
                    match self.fetch(source, state.cycles).await {
                        Ok(snapshot) => Phase::Extracting(snapshot),
                        Err(e) => {
                            warn!(cycle = state.cycles, error = %e, "Fetch failed, keeping partial batch");
                            Phase::Converged(SessionEnd::FetchFailed(e.to_string()))
                        }
                    }
                }
                Phase::Extracting(snapshot) => match self.extract(&snapshot, source, &mut state) {
                    Ok(items) if items.is_empty() && state.cycles == 1 => {
                        Phase::Converged(SessionEnd::Empty)
                    }
                    Ok(items) => Phase::Deduping(items),
                    Err(e) => {
                        warn!(cycle = state.cycles, error = %e, "Extraction failed, keeping partial batch");
                        Phase::Converged(SessionEnd::FetchFailed(e.to_string()))
                    }
                },
                Phase::Deduping(items) => {
                    let current_size = distinct_count(&items);
                    for (fp, item) in items {
                        if !state.seen_fingerprints.seen(&fp) {
                            debug!(fingerprint = fp.as_str(), author = %item.author, "New review");
                            state.seen_fingerprints.record(fp);
                            state.accumulated_items.push(item);
                        }
                    }
                    Phase::Triggering { current_size }
                }
                Phase::Triggering { current_size } => {
                    let mut observation = CycleObservation {
                        cycle: state.cycles,
                        previous_size: state.previous_snapshot_size,
                        current_size,
                        trigger: None,
                    };
                    state.previous_snapshot_size = current_size;

                    if let Decision::Stop(reason) = policy.decide(&observation) {
                        debug!(?observation, total = state.accumulated_items.len(), "Stopping before trigger");
                        Phase::Converged(SessionEnd::Converged(reason))
                    } else {
                        match self.trigger().await {
                            Ok(trigger) => {
                                observation.trigger = Some(trigger);
                                debug!(?observation, total = state.accumulated_items.len(), "Cycle complete");
                                match policy.decide(&observation) {
                                    Decision::Stop(reason) => Phase::Converged(SessionEnd::Converged(reason)),
                                    Decision::Continue => {
                                        self.config.pacing.pause().await;
                                        Phase::Fetching
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(cycle = state.cycles, error = %e, "Load more failed, keeping partial batch");
                                Phase::Converged(SessionEnd::FetchFailed(e.to_string()))
                            }
                        }
                    }
                }
                Phase::Converged(end) => break end,
            };
        };

        info!(
            items = state.accumulated_items.len(),
            cycles = state.cycles,
            malformed = state.malformed,
            end = %end,
            "Session converged"
        );

        SessionReport {
            items: state.accumulated_items,
            cycles: state.cycles,
            malformed: state.malformed,
            end,
        }
    }

    /// Load the source on the first cycle, then read the live page
    async fn fetch(&mut self, source: &Source, cycle: u32) -> Result<Snapshot> {
        if cycle > 1 {
            return self.renderer.snapshot().await;
        }

        let snapshot = self.renderer.load(&source.page_link).await?;
        let present = self
            .renderer
            .wait_for(&self.config.item_selector, self.config.wait_timeout)
            .await?;
        if !present {
            debug!(url = %source.page_link, "No review items appeared");
            return Ok(snapshot);
        }
        self.renderer.snapshot().await
    }

    /// Parse and validate the snapshot; malformed items are skipped and counted once
    fn extract(
        &self,
        snapshot: &Snapshot,
        source: &Source,
        state: &mut SessionState,
    ) -> Result<Vec<(Fingerprint, Item)>> {
        let raw_items = self.extractor.parse(snapshot, &self.config.item_selector)?;
        let mut items = Vec::with_capacity(raw_items.len());

        for raw in raw_items {
            let raw_fp = raw_identity(&raw);
            match Item::from_raw(
                raw,
                &self.config.source_tag,
                &source.collection_id,
                self.config.rating_scale,
            ) {
                Ok(item) => items.push((identity(&item), item)),
                Err(e) => {
                    if !state.malformed_seen.seen(&raw_fp) {
                        warn!(cycle = state.cycles, error = %e, "Skipping malformed review");
                        state.malformed_seen.record(raw_fp);
                        state.malformed += 1;
                    }
                }
            }
        }

        Ok(items)
    }

    /// Press load-more. A missing or timed-out trigger means the listing is
    /// exhausted; a failed fetch of the next batch is returned as an error.
    async fn trigger(&mut self) -> Result<TriggerOutcome> {
        match self
            .renderer
            .click(&self.config.load_more_selector, self.config.wait_timeout)
            .await
        {
            Ok(true) => Ok(TriggerOutcome::Advanced),
            Ok(false) => Ok(TriggerOutcome::Exhausted),
            Err(e @ HarvestError::FetchFailure { .. }) => Err(e),
            Err(e) => {
                warn!(error = %e, "Load more unusable, treating listing as exhausted");
                Ok(TriggerOutcome::Exhausted)
            }
        }
    }
}

/// Number of distinct items visible in one snapshot
fn distinct_count(items: &[(Fingerprint, Item)]) -> usize {
    items.iter().map(|(fp, _)| fp).collect::<HashSet<_>>().len()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::convergence::{policy_for, GrowthDetector};
    use crate::model::RawItem;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Encodes each review as `text|author` lines; `text|` marks a missing author
    pub(crate) fn page(reviews: &[&str]) -> String {
        reviews.join("\n")
    }

    pub(crate) struct LineExtractor;

    impl ContentExtractor for LineExtractor {
        fn parse(&self, snapshot: &Snapshot, _item_selector: &str) -> Result<Vec<RawItem>> {
            Ok(snapshot
                .html
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| {
                    let mut parts = line.splitn(2, '|');
                    let text = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
                    let author = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
                    RawItem {
                        text,
                        rating: Some("4.0".to_string()),
                        author,
                    }
                })
                .collect())
        }
    }

    /// Replays a fixed sequence of snapshots and click outcomes
    #[derive(Default)]
    pub(crate) struct ScriptedRenderer {
        pub snapshots: VecDeque<Result<String>>,
        pub clicks: VecDeque<Result<bool>>,
        pub loads: Vec<String>,
        pub click_count: usize,
        current: String,
    }

    impl ScriptedRenderer {
        pub fn new(snapshots: Vec<String>, clicks: Vec<bool>) -> Self {
            ScriptedRenderer {
                snapshots: snapshots.into_iter().map(Ok).collect(),
                clicks: clicks.into_iter().map(Ok).collect(),
                ..Default::default()
            }
        }

        fn advance(&mut self) -> Result<Snapshot> {
            if let Some(next) = self.snapshots.pop_front() {
                self.current = next?;
            }
            Ok(Snapshot::new("https://example.com/diner", self.current.clone()))
        }
    }

    #[async_trait]
    impl PageRenderer for ScriptedRenderer {
        async fn load(&mut self, url: &str) -> Result<Snapshot> {
            self.loads.push(url.to_string());
            self.advance()
        }

        async fn snapshot(&mut self) -> Result<Snapshot> {
            Ok(Snapshot::new("https://example.com/diner", self.current.clone()))
        }

        async fn wait_for(&mut self, _selector: &str, _timeout: Duration) -> Result<bool> {
            Ok(!self.current.is_empty())
        }

        async fn click(&mut self, _selector: &str, _timeout: Duration) -> Result<bool> {
            self.click_count += 1;
            let clicked = self.clicks.pop_front().unwrap_or(Ok(false))?;
            if clicked {
                self.advance()?;
            }
            Ok(clicked)
        }
    }

    pub(crate) fn config() -> HarvestConfig {
        HarvestConfig {
            item_selector: "review".to_string(),
            load_more_selector: "load-more".to_string(),
            source_tag: "Talabat".to_string(),
            rating_scale: 5.0,
            wait_timeout: Duration::from_millis(10),
            pacing: Pacing::none(),
        }
    }

    fn source() -> Source {
        Source::new("Mo's & Joe's Diner", "https://example.com/diner")
    }

    fn reviews(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("review {}|author {}", i, i)).collect()
    }

    fn cumulative(n: usize) -> String {
        reviews(n).join("\n")
    }

    async fn run(renderer: &mut ScriptedRenderer, policy: &mut dyn ConvergencePolicy) -> SessionReport {
        let extractor = LineExtractor;
        let config = config();
        SessionHarvester::new(renderer, &extractor, &config)
            .harvest(&source(), policy)
            .await
    }

    #[tokio::test]
    async fn test_stops_on_stagnation() {
        let mut renderer = ScriptedRenderer::new(
            vec![cumulative(3), cumulative(5), cumulative(5)],
            vec![true, true, true],
        );
        let report = run(&mut renderer, &mut GrowthDetector).await;

        assert_eq!(report.items.len(), 5);
        assert_eq!(report.cycles, 3);
        assert_eq!(report.end, SessionEnd::Converged(StopReason::Stagnated));
        // the stagnant third cycle does not press load-more
        assert_eq!(renderer.click_count, 2);
        assert_eq!(renderer.loads, vec!["https://example.com/diner".to_string()]);
    }

    #[tokio::test]
    async fn test_stops_on_trigger_exhaustion() {
        let mut renderer = ScriptedRenderer::new(vec![cumulative(3)], vec![false]);
        let report = run(&mut renderer, &mut GrowthDetector).await;

        assert_eq!(report.items.len(), 3);
        assert_eq!(report.cycles, 1);
        assert_eq!(report.end, SessionEnd::Converged(StopReason::TriggerExhausted));
    }

    #[tokio::test]
    async fn test_cumulative_snapshots_are_deduplicated() {
        let mut renderer = ScriptedRenderer::new(
            vec![cumulative(2), cumulative(4), cumulative(6)],
            vec![true, true, false],
        );
        let report = run(&mut renderer, &mut GrowthDetector).await;

        let texts: Vec<&str> = report.items.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["review 1", "review 2", "review 3", "review 4", "review 5", "review 6"]
        );
        assert!(report.items.iter().all(|i| i.collection_id == "mos-joes-diner"));
    }

    #[tokio::test]
    async fn test_same_text_different_author_kept() {
        let mut renderer = ScriptedRenderer::new(
            vec![page(&["Great!|Sara", "Great!|Omar", "Great!|Sara"])],
            vec![false],
        );
        let report = run(&mut renderer, &mut GrowthDetector).await;
        assert_eq!(report.items.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_first_extraction() {
        let mut renderer = ScriptedRenderer::new(vec![String::new()], vec![true]);
        let report = run(&mut renderer, &mut GrowthDetector).await;

        assert!(report.items.is_empty());
        assert_eq!(report.end, SessionEnd::Empty);
        assert_eq!(renderer.click_count, 0);
    }

    #[tokio::test]
    async fn test_malformed_item_is_skipped() {
        let mut cycle_two = reviews(2);
        cycle_two.insert(1, "no author here|".to_string());
        cycle_two.extend(reviews(4).into_iter().skip(2));
        let cycle_two = cycle_two.join("\n");

        let mut renderer = ScriptedRenderer::new(
            vec![cumulative(2), cycle_two.clone(), cycle_two],
            vec![true, true, true],
        );
        let report = run(&mut renderer, &mut GrowthDetector).await;

        assert_eq!(report.items.len(), 4);
        assert_eq!(report.cycles, 3);
        assert_eq!(report.malformed, 1);
        assert_eq!(renderer.click_count, 2);
        assert_eq!(report.end, SessionEnd::Converged(StopReason::Stagnated));
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_partial_batch() {
        let mut renderer = ScriptedRenderer::new(vec![cumulative(3)], vec![]);
        renderer
            .snapshots
            .push_back(Err(HarvestError::fetch("https://example.com/diner", "connection reset")));
        renderer.clicks.push_back(Ok(true));
        let mut renderer = FailingSnapshot(renderer);

        let extractor = LineExtractor;
        let config = config();
        let report = SessionHarvester::new(&mut renderer, &extractor, &config)
            .harvest(&source(), &mut GrowthDetector)
            .await;

        assert_eq!(report.items.len(), 3);
        assert!(matches!(report.end, SessionEnd::FetchFailed(_)));
    }

    #[tokio::test]
    async fn test_first_load_failure() {
        let mut renderer = ScriptedRenderer::default();
        renderer
            .snapshots
            .push_back(Err(HarvestError::fetch("https://example.com/diner", "timed out")));
        let report = run(&mut renderer, &mut GrowthDetector).await;

        assert!(report.items.is_empty());
        assert!(matches!(report.end, SessionEnd::FetchFailed(_)));
    }

    #[tokio::test]
    async fn test_repeated_malformed_entry_counted_once() {
        let snapshot = |n: usize| {
            let mut lines = vec!["bad|".to_string()];
            lines.extend(reviews(n));
            lines.join("\n")
        };
        let mut renderer = ScriptedRenderer::new(
            vec![snapshot(1), snapshot(2), snapshot(3), snapshot(3)],
            vec![true, true, true],
        );
        let report = run(&mut renderer, &mut GrowthDetector).await;

        assert_eq!(report.items.len(), 3);
        assert_eq!(report.cycles, 4);
        assert_eq!(report.malformed, 1);
    }

    #[tokio::test]
    async fn test_load_more_fetch_failure_keeps_partial_batch() {
        let mut renderer = ScriptedRenderer::new(vec![cumulative(2)], vec![]);
        renderer
            .clicks
            .push_back(Err(HarvestError::fetch("https://example.com/more", "connection reset")));
        let report = run(&mut renderer, &mut GrowthDetector).await;

        assert_eq!(report.items.len(), 2);
        assert!(matches!(report.end, SessionEnd::FetchFailed(_)));
    }

    #[tokio::test]
    async fn test_unusable_trigger_means_exhausted() {
        let mut renderer = ScriptedRenderer::new(vec![cumulative(2)], vec![]);
        renderer
            .clicks
            .push_back(Err(HarvestError::Config("no page loaded".to_string())));
        let report = run(&mut renderer, &mut GrowthDetector).await;

        assert_eq!(report.items.len(), 2);
        assert_eq!(report.end, SessionEnd::Converged(StopReason::TriggerExhausted));
    }

    #[tokio::test]
    async fn test_cycle_cap_policy() {
        let mut renderer = ScriptedRenderer::new(
            vec![cumulative(1), cumulative(2), cumulative(3), cumulative(4)],
            vec![true, true, true, true],
        );
        let mut policy = policy_for(Some(2));
        let report = run(&mut renderer, policy.as_mut()).await;

        assert_eq!(report.items.len(), 2);
        assert_eq!(report.end, SessionEnd::Converged(StopReason::CycleLimit));
        assert_eq!(renderer.click_count, 1);
    }

    /// Serves the first page, then fails every later read of the live page
    struct FailingSnapshot(ScriptedRenderer);

    #[async_trait]
    impl PageRenderer for FailingSnapshot {
        async fn load(&mut self, url: &str) -> Result<Snapshot> {
            self.0.load(url).await
        }

        async fn snapshot(&mut self) -> Result<Snapshot> {
            if self.0.click_count == 0 {
                return self.0.snapshot().await;
            }
            match self.0.snapshots.pop_front() {
                Some(Err(e)) => Err(e),
                _ => self.0.snapshot().await,
            }
        }

        async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool> {
            self.0.wait_for(selector, timeout).await
        }

        async fn click(&mut self, _selector: &str, _timeout: Duration) -> Result<bool> {
            self.0.click_count += 1;
            self.0.clicks.pop_front().unwrap_or(Ok(false))
        }
    }
}
