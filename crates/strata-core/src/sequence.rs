//! Deterministic per-key ordering of validated change events.
//!
//! The sequencer takes a batch of distinct events and produces, for each
//! key, the ordered list of transitions the planner will walk. Ordering is
//! total: events sort by sequence, then by source offset, and two distinct
//! events sharing both a key and a sequence are resolved by the configured
//! [`TieBreak`]. Because both sort keys are stable properties of the feed,
//! replaying the same input always yields the same output.

use rustc_hash::FxHashMap;

use crate::event::{ChangeEvent, Key, SequenceNumber, SourceOffset};
use serde::{Deserialize, Serialize};

/// Resolution for two distinct changes that share a key and a sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The change delivered later in the feed (larger source offset) wins;
    /// the earlier one is folded away and counted.
    #[default]
    PreferHigherOffset,
    /// Fail the batch: the feed promised unique sequences per key and a
    /// collision means something upstream is wrong.
    RejectOnCollision,
}

impl std::fmt::Display for TieBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreferHigherOffset => write!(f, "prefer_higher_offset"),
            Self::RejectOnCollision => write!(f, "reject_on_collision"),
        }
    }
}

/// Ordered transitions for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyTransitions {
    /// The key all transitions apply to.
    pub key: Key,
    /// Events in strictly increasing sequence order, collisions resolved.
    pub events: Vec<ChangeEvent>,
}

/// A batch grouped and ordered by key.
#[derive(Debug, Default)]
pub struct SequencedBatch {
    /// Per-key transition lists, sorted by key.
    pub keys: Vec<KeyTransitions>,
    /// Collision losers folded away under
    /// [`TieBreak::PreferHigherOffset`].
    pub tie_breaks: u64,
}

impl SequencedBatch {
    /// Total events across all keys after collision resolution.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.keys.iter().map(|k| k.events.len()).sum()
    }
}

/// Two distinct changes collided on `(key, sequence)` under
/// [`TieBreak::RejectOnCollision`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "sequence collision on key '{key}' at sequence {sequence}: \
     offsets {first_offset} and {second_offset} carry different changes"
)]
pub struct TieBreakCollisionError {
    /// Key the collision happened on.
    pub key: Key,
    /// The shared sequence value.
    pub sequence: SequenceNumber,
    /// Offset of the earlier colliding change.
    pub first_offset: SourceOffset,
    /// Offset of the later colliding change.
    pub second_offset: SourceOffset,
}

/// Groups events by key and orders each key's transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequencer {
    tie_break: TieBreak,
}

impl Sequencer {
    /// Creates a sequencer with the given tie-break rule.
    #[must_use]
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }

    /// Orders a batch of distinct events into per-key transition lists.
    ///
    /// Within a key, events sort by `(sequence, source_offset)` and
    /// equal-sequence runs collapse to a single winner, so the output is
    /// strictly increasing in sequence. Keys come out sorted, which keeps
    /// whole-batch processing order independent of hash-map iteration.
    ///
    /// # Errors
    ///
    /// Returns [`TieBreakCollisionError`] under
    /// [`TieBreak::RejectOnCollision`] when two distinct events share a
    /// key and sequence.
    pub fn sequence(
        &self,
        events: Vec<ChangeEvent>,
    ) -> Result<SequencedBatch, TieBreakCollisionError> {
        let mut by_key: FxHashMap<Key, Vec<ChangeEvent>> = FxHashMap::default();
        for event in events {
            by_key.entry(event.key.clone()).or_default().push(event);
        }

        let mut batch = SequencedBatch {
            keys: Vec::with_capacity(by_key.len()),
            tie_breaks: 0,
        };
        for (key, mut run) in by_key {
            run.sort_by_key(|e| (e.sequence, e.source_offset));

            let mut resolved: Vec<ChangeEvent> = Vec::with_capacity(run.len());
            for event in run {
                let collides = resolved
                    .last()
                    .is_some_and(|prev| prev.sequence == event.sequence);
                if collides {
                    if self.tie_break == TieBreak::RejectOnCollision {
                        let prev = &resolved[resolved.len() - 1];
                        return Err(TieBreakCollisionError {
                            key,
                            sequence: event.sequence,
                            first_offset: prev.source_offset,
                            second_offset: event.source_offset,
                        });
                    }
                    batch.tie_breaks += 1;
                    let last = resolved.len() - 1;
                    resolved[last] = event;
                } else {
                    resolved.push(event);
                }
            }
            batch.keys.push(KeyTransitions {
                key,
                events: resolved,
            });
        }

        batch.keys.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(batch)
    }
}
