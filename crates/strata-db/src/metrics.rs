//! Lock-free pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline-level counters using atomics (no locks on the data path).
///
/// Per-table merge counters live in
/// [`MergeMetrics`](strata_core::metrics::MergeMetrics); these cover the
/// batch loop around them.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    /// Batches applied and checkpointed.
    pub batches_committed: AtomicU64,
    /// Batches that failed after exhausting retries.
    pub batches_failed: AtomicU64,
    /// Whole-batch retries after transient failures.
    pub batch_retries: AtomicU64,
    /// Changes consumed from sources.
    pub changes_applied: AtomicU64,
    /// Checkpoint manifests written.
    pub checkpoints_written: AtomicU64,
    /// Last batch apply latency in nanoseconds.
    pub last_apply_ns: AtomicU64,
}

impl PipelineCounters {
    /// Records a committed and checkpointed batch.
    pub fn record_batch_committed(&self, changes: u64, latency_ns: u64) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.changes_applied.fetch_add(changes, Ordering::Relaxed);
        self.last_apply_ns.store(latency_ns, Ordering::Relaxed);
    }

    /// Records a batch that failed permanently.
    pub fn record_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a transient retry.
    pub fn record_batch_retry(&self) {
        self.batch_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a written checkpoint manifest.
    pub fn record_checkpoint(&self) {
        self.checkpoints_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the current counters.
    #[must_use]
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            batch_retries: self.batch_retries.load(Ordering::Relaxed),
            changes_applied: self.changes_applied.load(Ordering::Relaxed),
            checkpoints_written: self.checkpoints_written.load(Ordering::Relaxed),
            last_apply_ns: self.last_apply_ns.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of pipeline counters.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSnapshot {
    /// Batches applied and checkpointed.
    pub batches_committed: u64,
    /// Batches that failed after exhausting retries.
    pub batches_failed: u64,
    /// Whole-batch retries.
    pub batch_retries: u64,
    /// Changes consumed from sources.
    pub changes_applied: u64,
    /// Checkpoint manifests written.
    pub checkpoints_written: u64,
    /// Last batch apply latency in nanoseconds.
    pub last_apply_ns: u64,
}
