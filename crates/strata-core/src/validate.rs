//! Shape validation and exact-duplicate collapse ahead of sequencing.
//!
//! At-least-once delivery means the same change can arrive twice and
//! malformed records can arrive at any time. The validator is the single
//! chokepoint that turns a raw batch into clean [`ChangeEvent`]s: it
//! rejects changes missing their identity fields and collapses exact
//! duplicates so the sequencer only ever sees distinct changes.

use rustc_hash::FxHashSet;

use crate::event::{ChangeEvent, ChangeOp, Key, RawChange, SequenceNumber, SourceOffset};

/// What to do with a change that fails shape validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MalformedAction {
    /// Drop the change, count it, and keep going.
    #[default]
    Drop,
    /// Fail the whole batch on the first malformed change.
    Fail,
}

/// Why a raw change failed shape validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    /// The change carried no key, or an empty one.
    MissingKey,
    /// The change carried no sequence value.
    MissingSequence,
    /// The change carried no operation.
    MissingOperation,
    /// The operation name is not one the engine understands.
    UnknownOperation(String),
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingKey => write!(f, "missing key"),
            Self::MissingSequence => write!(f, "missing sequence value"),
            Self::MissingOperation => write!(f, "missing operation"),
            Self::UnknownOperation(op) => write!(f, "unknown operation '{op}'"),
        }
    }
}

/// A malformed change surfaced under [`MalformedAction::Fail`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed change at source offset {offset}: {reason}")]
pub struct MalformedEventError {
    /// Offset of the offending record in its feed.
    pub offset: SourceOffset,
    /// What was wrong with it.
    pub reason: MalformedReason,
}

/// Outcome of validating one raw batch.
#[derive(Debug, Default)]
pub struct ValidatedBatch {
    /// Changes that passed validation, in arrival order, duplicates
    /// removed.
    pub events: Vec<ChangeEvent>,
    /// Changes dropped for failing shape validation.
    pub malformed: u64,
    /// Exact duplicates collapsed.
    pub duplicates: u64,
}

/// Turns raw source batches into clean change events.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator {
    action: MalformedAction,
}

impl Validator {
    /// Creates a validator with the given malformed-change policy.
    #[must_use]
    pub fn new(action: MalformedAction) -> Self {
        Self { action }
    }

    /// Validates a batch: shapes each change, drops or fails on malformed
    /// ones, and collapses exact duplicates.
    ///
    /// Duplicate detection covers the whole delivered batch: two changes
    /// with the same key, sequence, operation, and payload content are one
    /// logical change, and only the first is kept. Distinct changes that
    /// share a key and sequence are both kept; resolving those is the
    /// sequencer's job.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedEventError`] for the first malformed change when
    /// the policy is [`MalformedAction::Fail`].
    pub fn validate(&self, batch: Vec<RawChange>) -> Result<ValidatedBatch, MalformedEventError> {
        let mut out = ValidatedBatch {
            events: Vec::with_capacity(batch.len()),
            ..ValidatedBatch::default()
        };
        let mut seen: FxHashSet<u64> = FxHashSet::default();

        for raw in batch {
            let offset = raw.source_offset;
            match shape(raw) {
                Ok(event) => {
                    if seen.insert(event.dedup_hash()) {
                        out.events.push(event);
                    } else {
                        out.duplicates += 1;
                        tracing::trace!(
                            key = %event.key,
                            sequence = %event.sequence,
                            offset = %offset,
                            "collapsed duplicate change"
                        );
                    }
                }
                Err(reason) => match self.action {
                    MalformedAction::Drop => {
                        out.malformed += 1;
                        tracing::debug!(offset = %offset, %reason, "dropped malformed change");
                    }
                    MalformedAction::Fail => {
                        return Err(MalformedEventError { offset, reason });
                    }
                },
            }
        }
        Ok(out)
    }
}

fn shape(raw: RawChange) -> Result<ChangeEvent, MalformedReason> {
    let key = match raw.key {
        Some(key) if !key.is_empty() => Key(key),
        _ => return Err(MalformedReason::MissingKey),
    };
    let sequence = raw
        .sequence
        .map(SequenceNumber)
        .ok_or(MalformedReason::MissingSequence)?;
    let op_name = raw.operation.ok_or(MalformedReason::MissingOperation)?;
    let op = ChangeOp::parse(&op_name).ok_or(MalformedReason::UnknownOperation(op_name))?;

    Ok(ChangeEvent {
        key,
        sequence,
        op,
        payload: raw.payload,
        source_offset: raw.source_offset,
    })
}
