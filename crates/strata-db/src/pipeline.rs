//! Pipeline runner.
//!
//! Drives every registered table through
//! source → validate → gate → sequence → plan → commit → checkpoint, in
//! dependency order, one bounded batch at a time. A batch's offset is
//! checkpointed only after every key in it has committed, so a crash
//! between commit and checkpoint replays the batch and the per-key
//! floors turn the replay into a no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Notify;

use strata_connectors::ChangeSource;
use strata_core::event::{Key, SourceOffset};
use strata_core::graph::TableGraph;
use strata_core::metrics::MergeMetricsSnapshot;
use strata_core::state::VersionRow;
use strata_storage::{CheckpointStore, InMemoryVersionStore, OffsetManifest, VersionStore};

use crate::apply::{ApplyReport, TableEngine};
use crate::config::{PipelineOptions, ScheduleMode};
use crate::error::DbError;
use crate::metrics::{PipelineCounters, PipelineSnapshot};
use crate::table::TableSpec;

struct TableRuntime {
    name: String,
    source: Box<dyn ChangeSource>,
    engine: TableEngine,
}

/// A set of tables, their sources, and the checkpoint store that makes
/// their progress durable.
///
/// Offsets in the manifest are keyed by table name: two tables may read
/// the same feed with different merge settings and still track progress
/// independently.
pub struct Pipeline {
    /// Runtimes in processing order.
    tables: Vec<TableRuntime>,
    index: HashMap<String, usize>,
    /// Committed offset per table, mirrored in the latest manifest.
    offsets: HashMap<String, SourceOffset>,
    checkpoints: Arc<dyn CheckpointStore>,
    next_checkpoint_id: u64,
    options: PipelineOptions,
    counters: Arc<PipelineCounters>,
    shutdown: Arc<Notify>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("tables", &self.processing_order())
            .field("offsets", &self.offsets)
            .field("next_checkpoint_id", &self.next_checkpoint_id)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Builds a pipeline: validates every table's configuration and the
    /// dependency graph, recovers committed offsets from the latest
    /// checkpoint manifest, and opens every source.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid options or merge
    /// settings, a graph error for duplicate names, unknown dependencies,
    /// or cycles, a checkpoint error if recovery fails, and a source
    /// error if a source fails to open.
    pub async fn new(
        tables: Vec<TableSpec>,
        checkpoints: Arc<dyn CheckpointStore>,
        options: PipelineOptions,
    ) -> Result<Self, DbError> {
        options.validate()?;

        let mut graph = TableGraph::new();
        for spec in &tables {
            spec.merge.validate()?;
            graph.add_table(&spec.name)?;
        }
        for spec in &tables {
            for dep in &spec.depends_on {
                graph.add_dependency(&spec.name, dep)?;
            }
        }
        let order = graph.processing_order()?;

        let recovered = {
            let store = Arc::clone(&checkpoints);
            tokio::task::spawn_blocking(move || store.load_latest())
                .await
                .map_err(|e| DbError::Join(e.to_string()))??
        };
        let (next_checkpoint_id, offsets) = match recovered {
            Some(manifest) => {
                tracing::info!(
                    checkpoint_id = manifest.checkpoint_id,
                    tables = manifest.offsets.len(),
                    "recovered committed offsets"
                );
                (manifest.checkpoint_id + 1, manifest.offsets)
            }
            None => (1, HashMap::new()),
        };

        let mut by_name: HashMap<String, TableSpec> = tables
            .into_iter()
            .map(|spec| (spec.name.clone(), spec))
            .collect();
        let mut runtimes = Vec::with_capacity(order.len());
        let mut index = HashMap::with_capacity(order.len());
        for name in order {
            let spec = by_name
                .remove(&name)
                .ok_or_else(|| DbError::TableNotFound(name.clone()))?;
            let store = match spec.store {
                Some(store) => store,
                None => Arc::new(InMemoryVersionStore::new()) as Arc<dyn VersionStore>,
            };
            let engine = TableEngine::new(
                name.clone(),
                spec.merge,
                spec.malformed,
                spec.rules,
                store,
            );
            index.insert(name.clone(), runtimes.len());
            runtimes.push(TableRuntime {
                name,
                source: spec.source,
                engine,
            });
        }

        for table in &mut runtimes {
            table.source.open().await?;
        }

        for (name, value) in &options.parameters {
            tracing::info!(parameter = %name, value = %value, "pipeline parameter");
        }
        tracing::info!(tables = runtimes.len(), "pipeline ready");

        Ok(Self {
            tables: runtimes,
            index,
            offsets,
            checkpoints,
            next_checkpoint_id,
            options,
            counters: Arc::new(PipelineCounters::default()),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Processes every table once, in dependency order, draining each
    /// source to its current end.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient failure, or a transient one that
    /// survived [`PipelineOptions::max_batch_retries`] retries. Tables
    /// earlier in the order keep everything they committed.
    pub async fn run_once(&mut self) -> Result<(), DbError> {
        for idx in 0..self.tables.len() {
            self.drain_table(idx).await?;
        }
        Ok(())
    }

    /// Runs the pipeline in the given schedule mode.
    ///
    /// Triggered mode is a single [`Pipeline::run_once`] pass. Continuous
    /// mode repeats passes, sleeping between them, until the handle from
    /// [`Pipeline::shutdown_handle`] is notified.
    ///
    /// # Errors
    ///
    /// As [`Pipeline::run_once`]; a continuous run also stops on the
    /// first surfaced error.
    pub async fn run(&mut self, mode: ScheduleMode) -> Result<(), DbError> {
        match mode {
            ScheduleMode::Triggered => self.run_once().await,
            ScheduleMode::Continuous { poll_interval } => {
                let shutdown = Arc::clone(&self.shutdown);
                tracing::info!(
                    poll_ms = %poll_interval.as_millis(),
                    "continuous run started"
                );
                loop {
                    tokio::select! {
                        biased;

                        () = shutdown.notified() => {
                            tracing::info!("continuous run shutdown signal received");
                            return Ok(());
                        }

                        result = self.run_once() => result?,
                    }

                    tokio::select! {
                        biased;

                        () = shutdown.notified() => {
                            tracing::info!("continuous run shutdown signal received");
                            return Ok(());
                        }

                        () = tokio::time::sleep(poll_interval) => {}
                    }
                }
            }
        }
    }

    /// Handle that stops a continuous [`Pipeline::run`]. Notifying it is
    /// idempotent and safe from any task.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Closes every source. Committed offsets are already durable, so
    /// there is no state to flush; close failures are logged, not
    /// surfaced.
    pub async fn shutdown(mut self) {
        for table in &mut self.tables {
            if let Err(e) = table.source.close().await {
                tracing::warn!(table = %table.name, error = %e, "source close error");
            }
        }
        tracing::info!("pipeline stopped");
    }

    /// Clears a table's rows and keyed state and removes its checkpoint
    /// entry, so the next run rebuilds it from offset zero.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TableNotFound`] for an unknown table and a
    /// checkpoint error if the cleared manifest cannot be persisted.
    pub async fn reset_table(&mut self, table: &str) -> Result<(), DbError> {
        let idx = self.table_index(table)?;
        self.tables[idx].engine.store().clear();
        let mut next = self.offsets.clone();
        next.remove(table);
        self.persist_offsets(next).await?;
        tracing::info!(table, "table reset");
        Ok(())
    }

    /// Live rows of a table, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TableNotFound`] for an unknown table.
    pub fn current_view(&self, table: &str) -> Result<Vec<VersionRow>, DbError> {
        Ok(self.engine_of(table)?.store().current_view())
    }

    /// Every row of a table, live and closed, sorted by key then
    /// `valid_from`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TableNotFound`] for an unknown table.
    pub fn history_view(&self, table: &str) -> Result<Vec<VersionRow>, DbError> {
        Ok(self.engine_of(table)?.store().history_view())
    }

    /// The live row for one key, if it has one.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TableNotFound`] for an unknown table.
    pub fn read_current(&self, table: &str, key: &Key) -> Result<Option<VersionRow>, DbError> {
        Ok(self.engine_of(table)?.store().read_current(key))
    }

    /// One key's full version trail, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TableNotFound`] for an unknown table.
    pub fn read_history(&self, table: &str, key: &Key) -> Result<Vec<VersionRow>, DbError> {
        Ok(self.engine_of(table)?.store().read_history(key))
    }

    /// Merge counters for one table.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TableNotFound`] for an unknown table.
    pub fn merge_metrics(&self, table: &str) -> Result<MergeMetricsSnapshot, DbError> {
        Ok(self.engine_of(table)?.metrics().snapshot())
    }

    /// Pipeline-level counters.
    #[must_use]
    pub fn counters(&self) -> PipelineSnapshot {
        self.counters.snapshot()
    }

    /// The committed offset for a table's feed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TableNotFound`] for an unknown table.
    pub fn committed_offset(&self, table: &str) -> Result<SourceOffset, DbError> {
        self.table_index(table)?;
        Ok(self.offsets.get(table).copied().unwrap_or_default())
    }

    /// Table names in processing order.
    #[must_use]
    pub fn processing_order(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Reads an operator parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.options.parameters.get(name).map(String::as_str)
    }

    async fn drain_table(&mut self, idx: usize) -> Result<(), DbError> {
        loop {
            let consumed = self.step_table(idx).await?;
            if consumed == 0 {
                return Ok(());
            }
        }
    }

    /// Fetches and applies one batch, retrying transient failures from
    /// the committed offset. Returns how many changes were consumed;
    /// zero means the table is caught up.
    async fn step_table(&mut self, idx: usize) -> Result<u64, DbError> {
        let name = self.tables[idx].name.clone();
        let committed = self.offsets.get(&name).copied().unwrap_or_default();
        let mut attempt = 0u32;
        loop {
            let started = Instant::now();
            match self.attempt_batch(idx, committed).await {
                Ok(None) => return Ok(0),
                Ok(Some((consumed, next_offset, report))) => {
                    let mut next = self.offsets.clone();
                    next.insert(name.clone(), next_offset);
                    if let Err(e) = self.persist_offsets(next).await {
                        self.counters.record_batch_failed();
                        return Err(e);
                    }
                    #[allow(clippy::cast_possible_truncation)]
                    let elapsed_ns = started.elapsed().as_nanos() as u64;
                    self.counters.record_batch_committed(consumed, elapsed_ns);
                    tracing::info!(
                        table = %name,
                        changes = consumed,
                        events = report.events,
                        keys_committed = report.keys_committed,
                        stale_skipped = report.stale_skipped,
                        next_offset = %next_offset,
                        "batch committed"
                    );
                    return Ok(consumed);
                }
                Err(e) if e.is_transient() && attempt < self.options.max_batch_retries => {
                    attempt += 1;
                    self.counters.record_batch_retry();
                    tracing::warn!(
                        table = %name,
                        error = %e,
                        attempt,
                        "transient batch failure, retrying from committed offset"
                    );
                    tokio::time::sleep(self.options.retry_backoff).await;
                }
                Err(e) => {
                    self.counters.record_batch_failed();
                    tracing::error!(table = %name, error = %e, "batch failed");
                    return Err(e);
                }
            }
        }
    }

    async fn attempt_batch(
        &mut self,
        idx: usize,
        committed: SourceOffset,
    ) -> Result<Option<(u64, SourceOffset, ApplyReport)>, DbError> {
        let options = self.options.clone();
        let table = &mut self.tables[idx];
        let batch = table
            .source
            .fetch(committed, options.max_changes_per_batch)
            .await?;
        if batch.is_empty() {
            return Ok(None);
        }
        let consumed = batch.len() as u64;
        let next_offset = batch.next_offset;
        let report = table.engine.apply_batch(batch.changes, &options).await?;
        Ok(Some((consumed, next_offset, report)))
    }

    /// Writes a manifest holding `next`, then adopts it as the committed
    /// offset map. The in-memory offsets never run ahead of the durable
    /// ones.
    async fn persist_offsets(
        &mut self,
        next: HashMap<String, SourceOffset>,
    ) -> Result<(), DbError> {
        let mut manifest = OffsetManifest::new(self.next_checkpoint_id);
        for (table, offset) in &next {
            manifest.set_offset(table.clone(), *offset);
        }

        let mut attempt = 0u32;
        loop {
            let store = Arc::clone(&self.checkpoints);
            let snapshot = manifest.clone();
            let result = tokio::task::spawn_blocking(move || store.save(&snapshot))
                .await
                .map_err(|e| DbError::Join(e.to_string()))?;
            match result {
                Ok(()) => break,
                Err(e) => {
                    let err = DbError::from(e);
                    if err.is_transient() && attempt < self.options.max_batch_retries {
                        attempt += 1;
                        self.counters.record_batch_retry();
                        tracing::warn!(
                            error = %err,
                            attempt,
                            "checkpoint save failed, retrying"
                        );
                        tokio::time::sleep(self.options.retry_backoff).await;
                    } else {
                        return Err(err);
                    }
                }
            }
        }

        self.next_checkpoint_id += 1;
        self.offsets = next;
        self.counters.record_checkpoint();
        Ok(())
    }

    fn table_index(&self, table: &str) -> Result<usize, DbError> {
        self.index
            .get(table)
            .copied()
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))
    }

    fn engine_of(&self, table: &str) -> Result<&TableEngine, DbError> {
        Ok(&self.tables[self.table_index(table)?].engine)
    }
}
