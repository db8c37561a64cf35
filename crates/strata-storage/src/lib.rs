//! # Strata Storage
//!
//! Storage layer for strata target tables: versioned row stores with
//! per-key optimistic commits, and durable source-offset checkpoints.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Durable source-offset checkpoints.
pub mod checkpoint;

/// Test doubles for storage fault paths.
pub mod testing;

/// Versioned row storage with per-key optimistic commits.
pub mod version;

pub use checkpoint::{
    CheckpointError, CheckpointStore, FileSystemCheckpointStore, InMemoryCheckpointStore,
    OffsetManifest,
};
pub use version::{CommitError, InMemoryVersionStore, VersionStore};
