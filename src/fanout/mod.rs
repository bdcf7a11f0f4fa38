//! `PartitionTracker` and `FanOutExecutor` (§4.9, §4.10): splitting a scan, query, or
//! batch across the node set, tracking per-partition progress, and aggregating child
//! outcomes into one result.
//!
//! Grounded in the teacher's `sdam::topology` membership-grouping idiom (group
//! unfinished work by current owning `Server`) and in `operation.rs`'s
//! `Retryability`-driven "is this worth another round" decision, adapted from a single
//! retry flag to a per-partition status vector.

pub mod batch;
pub mod partition_tracker;
pub mod query;
pub mod scan;

pub use batch::{execute_batch, BatchKey};
pub use partition_tracker::{PartitionProgress, PartitionStatus, PartitionTracker};
pub use query::execute_query;
pub use scan::execute_scan;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::cluster::Node;
use crate::error::Error;
use std::sync::Arc;

/// Tracks completion of a fan-out command's children (§4.9). Children call
/// [`FanOutExecutor::child_success`] or [`FanOutExecutor::child_failure`] exactly
/// once; the executor decides, once every expected child has reported, whether the
/// whole command succeeded.
pub struct FanOutExecutor {
    inner: Mutex<Inner>,
}

struct Inner {
    expected: u32,
    completed: u32,
    failures: HashMap<String, Error>,
    row_errors: bool,
}

/// What the caller should do once a round of children has reported in.
#[derive(Debug)]
pub enum FanOutOutcome {
    /// Still waiting on more children.
    Pending,
    /// Every expected child reported; no hard failure; some may have set row errors.
    Success { partial: bool },
    /// Every expected child reported and at least one hard (non-row) failure
    /// occurred; carries the first failure observed.
    Failure(Error),
}

impl FanOutExecutor {
    pub fn new(expected: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                expected,
                completed: 0,
                failures: HashMap::new(),
                row_errors: false,
            }),
        }
    }

    /// Raises the expected-children count; used when a retry round re-issues a subset
    /// of partitions as new children (§4.9).
    pub fn expect_more(&self, additional: u32) {
        self.inner.lock().unwrap().expected += additional;
    }

    pub fn child_success(&self, node: &str) -> FanOutOutcome {
        let mut inner = self.inner.lock().unwrap();
        inner.completed += 1;
        let _ = node;
        Self::resolve(&inner)
    }

    /// Records a row-level error (§4.9's `setRowError`): counted as a completion, but
    /// flips the partial-failure flag passed to the listener rather than failing the
    /// whole command.
    pub fn child_row_error(&self, node: &str) -> FanOutOutcome {
        let mut inner = self.inner.lock().unwrap();
        inner.completed += 1;
        inner.row_errors = true;
        let _ = node;
        Self::resolve(&inner)
    }

    pub fn child_failure(&self, node: impl Into<String>, error: Error) -> FanOutOutcome {
        let mut inner = self.inner.lock().unwrap();
        inner.completed += 1;
        inner.failures.entry(node.into()).or_insert(error);
        Self::resolve(&inner)
    }

    fn resolve(inner: &Inner) -> FanOutOutcome {
        if inner.completed < inner.expected {
            return FanOutOutcome::Pending;
        }
        if let Some(first) = inner.failures.values().next() {
            return FanOutOutcome::Failure(first.clone());
        }
        FanOutOutcome::Success {
            partial: inner.row_errors,
        }
    }
}

/// Groups `nodes` by address for the split step described in §4.9 (each node gets one
/// child command covering the partitions/keys it owns).
pub fn group_by_node<T: Clone>(items: Vec<(Arc<Node>, T)>) -> HashMap<String, (Arc<Node>, Vec<T>)> {
    let mut grouped: HashMap<String, (Arc<Node>, Vec<T>)> = HashMap::new();
    for (node, item) in items {
        grouped
            .entry(node.name.clone())
            .or_insert_with(|| (node.clone(), Vec::new()))
            .1
            .push(item);
    }
    grouped
}
