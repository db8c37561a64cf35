//! # Strata Connectors
//!
//! Source connectors feeding change records into strata pipelines. A
//! connector implements [`ChangeSource`]: an ordered, replayable feed of
//! raw changes addressed by offset, so a pipeline can resume exactly
//! where its last checkpoint left off.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Newline-delimited JSON file source.
pub mod jsonl;

/// In-memory source for tests and embedded feeds.
pub mod memory;

/// The source connector trait and its batch type.
pub mod source;

/// Test doubles for pipeline fault paths.
pub mod testing;

pub use jsonl::{FieldMapping, JsonlSource};
pub use memory::{MemoryFeed, MemorySource};
pub use source::{ChangeSource, SourceBatch, SourceError};
