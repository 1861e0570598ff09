//! Convergence detection for load-more listings
//!
//! Listings never announce how many items they hold, so exhaustion is inferred:
//! either the visible item count stopped growing, or the load-more trigger is
//! gone. Policies are pluggable so the harvesting loop does not change when a
//! different stopping rule is wanted.

/// Result of pressing the load-more trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The trigger was clicked
    Advanced,
    /// The trigger was absent, not clickable in time, or led nowhere new
    Exhausted,
}

/// What one fetch/extract/trigger cycle observed
#[derive(Debug, Clone, Copy)]
pub struct CycleObservation {
    /// 1-based cycle number
    pub cycle: u32,
    /// Distinct items visible after the previous extraction
    pub previous_size: usize,
    /// Distinct items visible after this cycle's extraction
    pub current_size: usize,
    /// `None` until the trigger has been pressed this cycle
    pub trigger: Option<TriggerOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Stagnated,
    TriggerExhausted,
    CycleLimit,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Stagnated => write!(f, "no new items"),
            StopReason::TriggerExhausted => write!(f, "load more exhausted"),
            StopReason::CycleLimit => write!(f, "cycle limit reached"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop(StopReason),
}

/// A stopping rule consulted twice per cycle: once before the trigger is
/// pressed and once with its outcome. Stopping early saves a useless click.
pub trait ConvergencePolicy: Send {
    fn decide(&mut self, observation: &CycleObservation) -> Decision;
}

/// Stops on stagnation or on trigger exhaustion, whichever comes first
#[derive(Debug, Default, Clone, Copy)]
pub struct GrowthDetector;

impl ConvergencePolicy for GrowthDetector {
    fn decide(&mut self, observation: &CycleObservation) -> Decision {
        if observation.cycle > 1 && observation.current_size == observation.previous_size {
            return Decision::Stop(StopReason::Stagnated);
        }
        if observation.trigger == Some(TriggerOutcome::Exhausted) {
            return Decision::Stop(StopReason::TriggerExhausted);
        }
        Decision::Continue
    }
}

/// Wraps another policy and stops after a fixed number of cycles
#[derive(Debug, Clone)]
pub struct CycleCap<P> {
    inner: P,
    max_cycles: u32,
}

impl<P: ConvergencePolicy> CycleCap<P> {
    pub fn new(inner: P, max_cycles: u32) -> Self {
        CycleCap { inner, max_cycles }
    }
}

impl<P: ConvergencePolicy> ConvergencePolicy for CycleCap<P> {
    fn decide(&mut self, observation: &CycleObservation) -> Decision {
        match self.inner.decide(observation) {
            Decision::Continue if observation.cycle >= self.max_cycles => {
                Decision::Stop(StopReason::CycleLimit)
            }
            decision => decision,
        }
    }
}

/// Build the policy for one session
pub fn policy_for(max_cycles: Option<u32>) -> Box<dyn ConvergencePolicy> {
    match max_cycles {
        Some(max) if max > 0 => Box::new(CycleCap::new(GrowthDetector, max)),
        _ => Box::new(GrowthDetector),
    }
}
