//! # Strata Core
//!
//! Deterministic change-data merge primitives: the event model, shape
//! validation, per-key sequencing, merge planning, quality rules, and the
//! table dependency graph.
//!
//! The crate is pure computation. Everything here takes owned batches in
//! and hands plans and reports out; storage and scheduling live in the
//! `strata-storage` and `strata-db` crates.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Merge behavior configuration.
pub mod config;

/// Change event model: keys, sequences, offsets, rows.
pub mod event;

/// Row-quality rules with warn/drop/fail enforcement.
pub mod gate;

/// Target-table dependency graph with cycle detection.
pub mod graph;

/// Lock-free merge-path metrics.
pub mod metrics;

/// Pure merge planning against observed key state.
pub mod plan;

/// Deterministic per-key ordering and tie-breaks.
pub mod sequence;

/// Versioned row state held by target tables.
pub mod state;

/// Shape validation and duplicate collapse.
pub mod validate;

pub use config::{ConfigError, DeleteMode, MergeConfig, ScdMode};
pub use event::{ChangeEvent, ChangeOp, Key, RawChange, Row, SequenceNumber, SourceOffset};
pub use gate::{GateOutcome, QualityAction, QualityGate, QualityGateFailure, QualityRule};
pub use graph::{GraphError, TableGraph};
pub use metrics::{MergeMetrics, MergeMetricsSnapshot};
pub use plan::{KeyPlan, MergePlanner, RowOp};
pub use sequence::{KeyTransitions, SequencedBatch, Sequencer, TieBreak, TieBreakCollisionError};
pub use state::{KeyState, KeyVersion, VersionRow};
pub use validate::{MalformedAction, MalformedEventError, ValidatedBatch, Validator};
