//! # Strata DB
//!
//! The pipeline facade over the strata crates: register tables, wire
//! them to change feeds, and drive each one to its versioned store with
//! durable offset checkpoints.
//!
//! # Architecture
//!
//! ```text
//! fetch ──▶ validate ──▶ gate ──▶ sequence ──▶ plan ──▶ commit
//!   ▲                                                     │
//!   └──────── checkpoint advances after commit ◀──────────┘
//! ```
//!
//! Each table runs this loop over bounded batches, in dependency order.
//! Within a batch, keys fan out across commit workers; across batches a
//! table is sequential. Replays land on per-key floors and no-op, which
//! is what makes the at-least-once loop exactly-once in effect.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Batch application stages for one table.
pub mod apply;

/// Pipeline tuning options and schedule modes.
pub mod config;

/// Error types for the facade.
pub mod error;

/// Lock-free pipeline counters.
pub mod metrics;

/// The pipeline runner.
pub mod pipeline;

/// Table registration.
pub mod table;

pub use apply::ApplyReport;
pub use config::{PipelineOptions, ScheduleMode};
pub use error::DbError;
pub use metrics::{PipelineCounters, PipelineSnapshot};
pub use pipeline::Pipeline;
pub use table::TableSpec;
