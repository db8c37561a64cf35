//! Pure merge planning: turns a key's ordered transitions into store
//! mutations.
//!
//! The planner reads a key's observed [`KeyState`], walks the transitions
//! the sequencer produced, and emits a [`KeyPlan`]: the row operations to
//! apply plus the state the key should hold afterwards. It never touches
//! storage. The plan carries the observed version as a precondition, so
//! the store can reject it if the key changed between read and commit and
//! the caller can replan against fresh state.

use crate::config::{DeleteMode, MergeConfig, ScdMode};
use crate::event::{ChangeOp, Key, Row, SequenceNumber};
use crate::sequence::KeyTransitions;
use crate::state::{KeyState, KeyVersion};

/// A single mutation the version store applies during commit.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOp {
    /// Close the live row's validity interval and clear its current flag.
    CloseCurrent {
        /// Sequence at which the row stops being effective.
        valid_to: SequenceNumber,
    },
    /// Append a new live row.
    Insert {
        /// Version id for the new row.
        version_id: u64,
        /// Column values of the new row.
        payload: Row,
        /// Sequence at which the row becomes effective.
        valid_from: SequenceNumber,
    },
    /// Rewrite the live row's payload in place, keeping its version id.
    Replace {
        /// New column values.
        payload: Row,
        /// Sequence of the change that produced the new value.
        valid_from: SequenceNumber,
    },
    /// Physically remove every row the key has.
    Remove,
}

/// Planned mutations for one key, bound to the state they were planned
/// against.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPlan {
    /// Key the plan applies to.
    pub key: Key,
    /// Version observed at planning time; the commit precondition.
    pub expected: KeyVersion,
    /// Mutations to apply, in order.
    pub ops: Vec<RowOp>,
    /// State the key holds after a successful commit.
    pub state_after: KeyState,
    /// Transitions skipped for being at or below the key's floor.
    pub stale_skipped: u64,
}

impl KeyPlan {
    /// Returns `true` if committing this plan would leave the key exactly
    /// as observed.
    ///
    /// A plan can have no row operations yet still matter: a delete of an
    /// absent key writes no rows but must persist the moved floor.
    #[must_use]
    pub fn is_no_op(&self, observed: &KeyState) -> bool {
        self.ops.is_empty() && self.state_after == *observed
    }
}

/// Stateless planner bound to one table's merge configuration.
#[derive(Debug, Clone, Copy)]
pub struct MergePlanner {
    config: MergeConfig,
}

impl MergePlanner {
    /// Creates a planner for the given configuration.
    #[must_use]
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// The configuration this planner applies.
    #[must_use]
    pub fn config(&self) -> MergeConfig {
        self.config
    }

    /// Plans the mutations for one key.
    ///
    /// Transitions must be in strictly increasing sequence order, which is
    /// what the sequencer produces. Transitions at or below the observed
    /// floor are skipped and counted, never applied: replaying an already
    /// applied batch therefore plans nothing.
    #[must_use]
    pub fn plan(&self, transitions: &KeyTransitions, observed: &KeyState) -> KeyPlan {
        let mut ops = Vec::new();
        let mut floor = observed.last_applied_sequence;
        let mut current = observed.current_version_id;
        let mut last_version = observed.last_version_id;
        let mut deleted = observed.is_deleted;
        let mut stale_skipped = 0u64;

        for event in &transitions.events {
            if floor.is_some_and(|f| event.sequence <= f) {
                stale_skipped += 1;
                tracing::trace!(
                    key = %transitions.key,
                    sequence = %event.sequence,
                    floor = ?floor,
                    "skipped stale change"
                );
                continue;
            }

            match event.op {
                ChangeOp::Upsert => {
                    match self.config.scd_mode {
                        ScdMode::Overwrite => {
                            if current.is_some() {
                                ops.push(RowOp::Replace {
                                    payload: event.payload.clone(),
                                    valid_from: event.sequence,
                                });
                            } else {
                                last_version += 1;
                                ops.push(RowOp::Insert {
                                    version_id: last_version,
                                    payload: event.payload.clone(),
                                    valid_from: event.sequence,
                                });
                                current = Some(last_version);
                            }
                        }
                        ScdMode::History => {
                            if current.is_some() {
                                ops.push(RowOp::CloseCurrent {
                                    valid_to: event.sequence,
                                });
                            }
                            last_version += 1;
                            ops.push(RowOp::Insert {
                                version_id: last_version,
                                payload: event.payload.clone(),
                                valid_from: event.sequence,
                            });
                            current = Some(last_version);
                        }
                    }
                    deleted = false;
                }
                ChangeOp::Delete => {
                    if current.is_some() {
                        match (self.config.scd_mode, self.config.delete_mode) {
                            (ScdMode::History, DeleteMode::SoftClose) => {
                                ops.push(RowOp::CloseCurrent {
                                    valid_to: event.sequence,
                                });
                            }
                            _ => ops.push(RowOp::Remove),
                        }
                        current = None;
                    }
                    deleted = true;
                }
            }
            floor = Some(event.sequence);
        }

        KeyPlan {
            key: transitions.key.clone(),
            expected: observed.version(),
            ops,
            state_after: KeyState {
                key: transitions.key.clone(),
                last_applied_sequence: floor,
                current_version_id: current,
                last_version_id: last_version,
                is_deleted: deleted,
            },
            stale_skipped,
        }
    }
}
