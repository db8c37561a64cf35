//! Lock-free merge-path metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Merge-path metrics using atomics (no locks on the data path).
#[derive(Debug, Default)]
pub struct MergeMetrics {
    /// Changes dropped for failing shape validation.
    pub malformed: AtomicU64,
    /// Exact duplicates collapsed by the validator.
    pub duplicates: AtomicU64,
    /// Collision losers folded away by the sequencer.
    pub tie_breaks: AtomicU64,
    /// Rows kept despite warn-action quality violations.
    pub gate_warned: AtomicU64,
    /// Rows excluded by drop-action quality rules.
    pub gate_dropped: AtomicU64,
    /// Transitions skipped for being at or below a key's floor.
    pub stale_skipped: AtomicU64,
    /// Rows inserted into version stores.
    pub rows_inserted: AtomicU64,
    /// Rows rewritten in place.
    pub rows_replaced: AtomicU64,
    /// Validity intervals closed.
    pub rows_closed: AtomicU64,
    /// Keys physically removed.
    pub rows_removed: AtomicU64,
    /// Commits rejected on the version precondition.
    pub commit_conflicts: AtomicU64,
}

impl MergeMetrics {
    /// Records a validated batch.
    pub fn record_validated(&self, malformed: u64, duplicates: u64) {
        self.malformed.fetch_add(malformed, Ordering::Relaxed);
        self.duplicates.fetch_add(duplicates, Ordering::Relaxed);
    }

    /// Records a gated batch.
    pub fn record_gated(&self, warned: u64, dropped: u64) {
        self.gate_warned.fetch_add(warned, Ordering::Relaxed);
        self.gate_dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    /// Records a sequenced batch.
    pub fn record_sequenced(&self, tie_breaks: u64) {
        self.tie_breaks.fetch_add(tie_breaks, Ordering::Relaxed);
    }

    /// Records stale transitions skipped during planning.
    pub fn record_stale(&self, skipped: u64) {
        self.stale_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    /// Records the row operations of a committed plan.
    pub fn record_committed(&self, inserted: u64, replaced: u64, closed: u64, removed: u64) {
        self.rows_inserted.fetch_add(inserted, Ordering::Relaxed);
        self.rows_replaced.fetch_add(replaced, Ordering::Relaxed);
        self.rows_closed.fetch_add(closed, Ordering::Relaxed);
        self.rows_removed.fetch_add(removed, Ordering::Relaxed);
    }

    /// Records a commit rejected on its precondition.
    pub fn record_conflict(&self) {
        self.commit_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the current metrics.
    #[must_use]
    pub fn snapshot(&self) -> MergeMetricsSnapshot {
        MergeMetricsSnapshot {
            malformed: self.malformed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            tie_breaks: self.tie_breaks.load(Ordering::Relaxed),
            gate_warned: self.gate_warned.load(Ordering::Relaxed),
            gate_dropped: self.gate_dropped.load(Ordering::Relaxed),
            stale_skipped: self.stale_skipped.load(Ordering::Relaxed),
            rows_inserted: self.rows_inserted.load(Ordering::Relaxed),
            rows_replaced: self.rows_replaced.load(Ordering::Relaxed),
            rows_closed: self.rows_closed.load(Ordering::Relaxed),
            rows_removed: self.rows_removed.load(Ordering::Relaxed),
            commit_conflicts: self.commit_conflicts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of merge-path metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeMetricsSnapshot {
    /// Changes dropped as malformed.
    pub malformed: u64,
    /// Duplicates collapsed.
    pub duplicates: u64,
    /// Collision losers folded.
    pub tie_breaks: u64,
    /// Warn-action violations kept.
    pub gate_warned: u64,
    /// Drop-action violations excluded.
    pub gate_dropped: u64,
    /// Stale transitions skipped.
    pub stale_skipped: u64,
    /// Rows inserted.
    pub rows_inserted: u64,
    /// Rows rewritten in place.
    pub rows_replaced: u64,
    /// Intervals closed.
    pub rows_closed: u64,
    /// Keys removed.
    pub rows_removed: u64,
    /// Precondition conflicts.
    pub commit_conflicts: u64,
}
