//! Batch application for one table.
//!
//! [`TableEngine`] owns the merge stages between a fetched batch and the
//! version store: validate, gate, sequence, then plan and commit each
//! key. Keys are partitioned across a bounded set of workers by hash, so
//! all of one key's events are applied by a single worker in sequence
//! order while distinct keys commit concurrently.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;
use tokio::task::JoinSet;

use strata_core::config::MergeConfig;
use strata_core::event::RawChange;
use strata_core::gate::{QualityGate, QualityRule, RuleViolation};
use strata_core::metrics::MergeMetrics;
use strata_core::plan::{KeyPlan, MergePlanner, RowOp};
use strata_core::sequence::{KeyTransitions, Sequencer};
use strata_core::validate::{MalformedAction, Validator};
use strata_storage::{CommitError, VersionStore};

use crate::config::PipelineOptions;
use crate::error::DbError;

/// Counts from applying one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Events admitted to planning after validation, dedup, gating, and
    /// collision folding.
    pub events: u64,
    /// Changes dropped for failing shape validation.
    pub malformed: u64,
    /// Exact duplicates collapsed.
    pub duplicates: u64,
    /// Rows kept despite warn-action rule violations.
    pub gate_warned: u64,
    /// Rows excluded by drop-action rules.
    pub gate_dropped: u64,
    /// Collision losers folded away by the tie-break policy.
    pub tie_breaks: u64,
    /// Events at or below their key's floor, skipped.
    pub stale_skipped: u64,
    /// Keys whose plan committed.
    pub keys_committed: u64,
    /// Keys whose plan was a no-op.
    pub keys_unchanged: u64,
    /// Rows inserted.
    pub rows_inserted: u64,
    /// Live rows rewritten in place.
    pub rows_replaced: u64,
    /// Validity intervals closed.
    pub rows_closed: u64,
    /// Keys physically removed.
    pub rows_removed: u64,
    /// Commit conflicts that forced a replan.
    pub commit_conflicts: u64,
}

impl ApplyReport {
    fn absorb(&mut self, worker: &WorkerOutcome) {
        self.stale_skipped += worker.stale_skipped;
        self.keys_committed += worker.keys_committed;
        self.keys_unchanged += worker.keys_unchanged;
        self.rows_inserted += worker.rows_inserted;
        self.rows_replaced += worker.rows_replaced;
        self.rows_closed += worker.rows_closed;
        self.rows_removed += worker.rows_removed;
        self.commit_conflicts += worker.commit_conflicts;
    }
}

#[derive(Debug, Default)]
struct WorkerOutcome {
    stale_skipped: u64,
    keys_committed: u64,
    keys_unchanged: u64,
    rows_inserted: u64,
    rows_replaced: u64,
    rows_closed: u64,
    rows_removed: u64,
    commit_conflicts: u64,
}

impl WorkerOutcome {
    fn record_plan(&mut self, plan: &KeyPlan) {
        let (inserted, replaced, closed, removed) = op_counts(&plan.ops);
        self.stale_skipped += plan.stale_skipped;
        self.rows_inserted += inserted;
        self.rows_replaced += replaced;
        self.rows_closed += closed;
        self.rows_removed += removed;
    }
}

fn op_counts(ops: &[RowOp]) -> (u64, u64, u64, u64) {
    let mut counts = (0, 0, 0, 0);
    for op in ops {
        match op {
            RowOp::Insert { .. } => counts.0 += 1,
            RowOp::Replace { .. } => counts.1 += 1,
            RowOp::CloseCurrent { .. } => counts.2 += 1,
            RowOp::Remove => counts.3 += 1,
        }
    }
    counts
}

/// The merge stages for one table, from raw batch to committed rows.
pub(crate) struct TableEngine {
    name: String,
    validator: Validator,
    gate: QualityGate,
    sequencer: Sequencer,
    planner: MergePlanner,
    store: Arc<dyn VersionStore>,
    metrics: Arc<MergeMetrics>,
}

impl TableEngine {
    pub(crate) fn new(
        name: String,
        merge: MergeConfig,
        malformed: MalformedAction,
        rules: Vec<QualityRule>,
        store: Arc<dyn VersionStore>,
    ) -> Self {
        Self {
            name,
            validator: Validator::new(malformed),
            gate: QualityGate::new(rules),
            sequencer: Sequencer::new(merge.tie_break),
            planner: MergePlanner::new(merge),
            store,
            metrics: Arc::new(MergeMetrics::default()),
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn VersionStore> {
        &self.store
    }

    pub(crate) fn metrics(&self) -> &Arc<MergeMetrics> {
        &self.metrics
    }

    /// Applies one raw batch end to end.
    ///
    /// Structural rejections (malformed under the fail action, tie-break
    /// collisions, fail-action rule violations) abort before any commit.
    /// After a commit failure the remaining workers still drain, so keys
    /// that committed stay committed; a wholesale retry of the batch
    /// skips them through their floors.
    pub(crate) async fn apply_batch(
        &self,
        changes: Vec<RawChange>,
        options: &PipelineOptions,
    ) -> Result<ApplyReport, DbError> {
        let validated = self.validator.validate(changes)?;
        self.metrics
            .record_validated(validated.malformed, validated.duplicates);

        let gated = match self.gate.evaluate(validated.events) {
            Ok(outcome) => outcome,
            Err(failure) => {
                self.log_violations(&failure.violations);
                return Err(failure.into());
            }
        };
        self.log_violations(&gated.violations);
        self.metrics.record_gated(gated.warned, gated.dropped);

        let sequenced = self.sequencer.sequence(gated.admitted)?;
        self.metrics.record_sequenced(sequenced.tie_breaks);

        let mut report = ApplyReport {
            events: sequenced.event_count() as u64,
            malformed: validated.malformed,
            duplicates: validated.duplicates,
            gate_warned: gated.warned,
            gate_dropped: gated.dropped,
            tie_breaks: sequenced.tie_breaks,
            ..ApplyReport::default()
        };

        let workers = options.commit_workers.min(sequenced.keys.len().max(1));
        let mut buckets: Vec<Vec<KeyTransitions>> = (0..workers).map(|_| Vec::new()).collect();
        for transitions in sequenced.keys {
            let mut hasher = FxHasher::default();
            transitions.key.hash(&mut hasher);
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (hasher.finish() as usize) % workers;
            buckets[bucket].push(transitions);
        }

        let mut set = JoinSet::new();
        for bucket in buckets.into_iter().filter(|b| !b.is_empty()) {
            let name = self.name.clone();
            let store = Arc::clone(&self.store);
            let metrics = Arc::clone(&self.metrics);
            let planner = self.planner;
            let max_retries = options.max_commit_retries;
            set.spawn(async move {
                let mut outcome = WorkerOutcome::default();
                for transitions in &bucket {
                    commit_key(
                        &name,
                        store.as_ref(),
                        planner,
                        &metrics,
                        transitions,
                        max_retries,
                        &mut outcome,
                    )?;
                }
                Ok::<WorkerOutcome, DbError>(outcome)
            });
        }

        // Drain every worker before surfacing an error so no task is
        // cancelled mid-bucket.
        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => report.absorb(&outcome),
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(DbError::Join(e.to_string()));
                    }
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        tracing::debug!(
            table = %self.name,
            events = report.events,
            keys_committed = report.keys_committed,
            stale_skipped = report.stale_skipped,
            malformed = report.malformed,
            duplicates = report.duplicates,
            "batch applied"
        );
        Ok(report)
    }

    fn log_violations(&self, violations: &[RuleViolation]) {
        for violation in violations {
            tracing::warn!(
                table = %self.name,
                rule = %violation.rule,
                action = %violation.action,
                rows = violation.rows,
                "quality rule violated"
            );
        }
    }
}

/// Plans and commits one key, replanning on conflict.
fn commit_key(
    table: &str,
    store: &dyn VersionStore,
    planner: MergePlanner,
    metrics: &MergeMetrics,
    transitions: &KeyTransitions,
    max_retries: u32,
    outcome: &mut WorkerOutcome,
) -> Result<(), DbError> {
    let mut attempts = 0u32;
    loop {
        let observed = store.key_state(&transitions.key);
        let plan = planner.plan(transitions, &observed);

        if plan.is_no_op(&observed) {
            metrics.record_stale(plan.stale_skipped);
            outcome.record_plan(&plan);
            outcome.keys_unchanged += 1;
            return Ok(());
        }

        match store.commit(&plan) {
            Ok(()) => {
                metrics.record_stale(plan.stale_skipped);
                let (inserted, replaced, closed, removed) = op_counts(&plan.ops);
                metrics.record_committed(inserted, replaced, closed, removed);
                outcome.record_plan(&plan);
                outcome.keys_committed += 1;
                return Ok(());
            }
            Err(CommitError::Conflict { .. }) => {
                metrics.record_conflict();
                outcome.commit_conflicts += 1;
                attempts += 1;
                if attempts > max_retries {
                    return Err(DbError::ConflictExhausted {
                        key: transitions.key.to_string(),
                        attempts,
                    });
                }
                tracing::debug!(
                    table,
                    key = %transitions.key,
                    attempts,
                    "commit conflict, replanning from fresh state"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }
}
