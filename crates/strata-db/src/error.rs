//! Error types for the `StrataDb` facade.

use strata_connectors::SourceError;
use strata_storage::{CheckpointError, CommitError};

/// Errors from database and pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Source connector error
    Source(#[from] SourceError),

    /// A change failed shape validation under the fail-on-malformed
    /// policy
    Malformed(#[from] strata_core::validate::MalformedEventError),

    /// Two distinct changes collided on a key and sequence
    Collision(#[from] strata_core::sequence::TieBreakCollisionError),

    /// A fail-action quality rule aborted the batch
    QualityGate(#[from] strata_core::gate::QualityGateFailure),

    /// Version store commit error
    Commit(#[from] CommitError),

    /// Checkpoint store error
    Checkpoint(#[from] CheckpointError),

    /// Table dependency graph error
    Graph(#[from] strata_core::graph::GraphError),

    /// Merge or pipeline configuration error
    Config(#[from] strata_core::config::ConfigError),

    /// Table not found
    TableNotFound(String),

    /// Optimistic commit retries exhausted for a key
    ConflictExhausted {
        /// Row key that kept conflicting.
        key: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// A background apply task failed to complete
    Join(String),
}

impl DbError {
    /// Returns `true` if retrying the whole batch from the last committed
    /// offset can plausibly succeed.
    ///
    /// Transient failures are infrastructure hiccups: unavailable stores,
    /// source i/o, contended keys. Everything else reflects the data or
    /// the configuration and will fail the same way on every retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Source(e) => {
                matches!(e, SourceError::Io(_) | SourceError::Unavailable(_))
            }
            Self::Commit(e) => matches!(e, CommitError::Unavailable(_)),
            Self::Checkpoint(e) => {
                matches!(e, CheckpointError::Io(_) | CheckpointError::Unavailable(_))
            }
            Self::ConflictExhausted { .. } => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source(e) => write!(f, "Source error: {e}"),
            Self::Malformed(e) => write!(f, "Malformed change: {e}"),
            Self::Collision(e) => write!(f, "Sequence collision: {e}"),
            Self::QualityGate(e) => write!(f, "Quality gate: {e}"),
            Self::Commit(e) => write!(f, "Commit error: {e}"),
            Self::Checkpoint(e) => write!(f, "Checkpoint error: {e}"),
            Self::Graph(e) => write!(f, "Dependency error: {e}"),
            Self::Config(e) => write!(f, "Config error: {e}"),
            Self::TableNotFound(name) => {
                write!(f, "Table '{name}' not found")
            }
            Self::ConflictExhausted { key, attempts } => {
                write!(
                    f,
                    "Commit conflict on key '{key}' persisted through {attempts} attempts"
                )
            }
            Self::Join(msg) => write!(f, "Apply task failed: {msg}"),
        }
    }
}
