//! Versioned row state held by target tables.
//!
//! A target table stores one or more [`VersionRow`]s per key. In overwrite
//! mode a key has at most one row and it is rewritten in place; in history
//! mode every change appends a row and closes the validity interval of the
//! previous one. [`KeyState`] is the per-key bookkeeping the planner reads
//! and the store maintains: the idempotence floor, the live version, and
//! the tombstone marker that keeps deleted keys from resurrecting.

use serde::{Deserialize, Serialize};

use crate::event::{Key, Row, SequenceNumber};

/// One version of a key's row in a target table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRow {
    /// Key the row belongs to.
    pub key: Key,
    /// Version counter, unique per key and never reused.
    pub version_id: u64,
    /// Column values of this version.
    pub payload: Row,
    /// Sequence at which this version became effective.
    pub valid_from: SequenceNumber,
    /// Sequence at which this version stopped being effective.
    ///
    /// `None` while the version is open. Intervals are half-open: a row
    /// closed at sequence `s` was effective for sequences in
    /// `[valid_from, s)`. Once set, this field never changes.
    pub valid_to: Option<SequenceNumber>,
    /// Whether this is the key's live version.
    pub is_current: bool,
}

impl VersionRow {
    /// Returns `true` if `sequence` falls inside this version's validity
    /// interval.
    #[must_use]
    pub fn covers(&self, sequence: SequenceNumber) -> bool {
        sequence >= self.valid_from && self.valid_to.is_none_or(|end| sequence < end)
    }
}

/// Per-key bookkeeping derived from the rows the store holds.
///
/// The state survives hard deletes: a removed key keeps its entry with
/// `is_deleted` set and `last_applied_sequence` as the floor, so a replayed
/// or late change below the delete cannot bring the row back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyState {
    /// Key this state describes.
    pub key: Key,
    /// Highest sequence ever applied to the key. Changes at or below this
    /// floor are stale and must not alter stored state.
    pub last_applied_sequence: Option<SequenceNumber>,
    /// Version id of the live row, or `None` when the key has no live row.
    pub current_version_id: Option<u64>,
    /// Highest version id ever issued for the key. Never decreases, so
    /// version ids stay unique even across delete and re-insert.
    pub last_version_id: u64,
    /// Whether the key's most recent accepted change was a delete.
    pub is_deleted: bool,
}

impl KeyState {
    /// State of a key the store has never seen.
    #[must_use]
    pub fn untouched(key: Key) -> Self {
        Self {
            key,
            last_applied_sequence: None,
            current_version_id: None,
            last_version_id: 0,
            is_deleted: false,
        }
    }

    /// The observed version pair used as a commit precondition.
    #[must_use]
    pub fn version(&self) -> KeyVersion {
        KeyVersion {
            last_applied_sequence: self.last_applied_sequence,
            current_version_id: self.current_version_id,
        }
    }

    /// Returns `true` if `sequence` would be stale for this key.
    #[must_use]
    pub fn is_stale(&self, sequence: SequenceNumber) -> bool {
        self.last_applied_sequence
            .is_some_and(|floor| sequence <= floor)
    }
}

/// Observed per-key version, checked at commit time.
///
/// Carries both the live version id and the idempotence floor: a concurrent
/// delete can leave `current_version_id` unchanged at `None` while still
/// moving the floor, and a commit planned against the older floor must fail
/// rather than apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersion {
    /// Floor observed when the plan was made.
    pub last_applied_sequence: Option<SequenceNumber>,
    /// Live version id observed when the plan was made.
    pub current_version_id: Option<u64>,
}

impl std::fmt::Display for KeyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.last_applied_sequence {
            Some(seq) => write!(f, "seq={seq}")?,
            None => write!(f, "seq=none")?,
        }
        match self.current_version_id {
            Some(version) => write!(f, " version={version}"),
            None => write!(f, " version=none"),
        }
    }
}
