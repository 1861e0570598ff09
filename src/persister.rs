//! Idempotent persistence of harvested reviews
//!
//! Every write first checks the natural key, and the insert itself is
//! `INSERT OR IGNORE` against a UNIQUE constraint, so re-running a harvest
//! over the same restaurant never adds a second copy of a review.

use crate::database::ReviewStore;
use crate::error::Result;
use crate::model::Item;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted,
    Skipped,
}

/// Per-batch persistence counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PersistReport {
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Persister<'a, S: ReviewStore> {
    store: &'a S,
}

impl<'a, S: ReviewStore> Persister<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Persister { store }
    }

    /// Store one item unless its natural key is already present
    pub fn persist(&self, item: &Item) -> Result<PersistOutcome> {
        if self.store.exists(&item.text, &item.author, &item.collection_id)? {
            return Ok(PersistOutcome::Skipped);
        }

        // a concurrent writer may have won the race since the check
        if self.store.insert(item)? {
            Ok(PersistOutcome::Inserted)
        } else {
            Ok(PersistOutcome::Skipped)
        }
    }

    /// Persist a batch, absorbing per-item failures.
    ///
    /// Returns `Err` only when the store itself is unavailable.
    pub fn persist_batch(&self, items: &[Item]) -> Result<PersistReport> {
        let mut report = PersistReport::default();

        for item in items {
            match self.persist(item) {
                Ok(PersistOutcome::Inserted) => report.inserted += 1,
                Ok(PersistOutcome::Skipped) => {
                    debug!(collection = %item.collection_id, author = %item.author, "Review already stored");
                    report.skipped += 1;
                }
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => {
                    warn!(collection = %item.collection_id, error = %e, "Failed to persist review");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
