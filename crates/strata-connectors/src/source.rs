//! The change source contract.

use async_trait::async_trait;

use strata_core::event::{RawChange, SourceOffset};

/// Failed source interaction.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// I/O failure while reading the feed.
    #[error("source i/o: {0}")]
    Io(#[from] std::io::Error),
    /// The source was fetched from before being opened.
    #[error("source '{0}' is not open")]
    NotOpen(String),
    /// The source cannot serve fetches right now.
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// A bounded slice of a source's feed.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    /// Changes in feed order, with their offsets assigned.
    pub changes: Vec<RawChange>,
    /// Offset of the last delivered change; pass it back to fetch the
    /// next slice. Equal to the requested `after` when the feed had
    /// nothing new.
    pub next_offset: SourceOffset,
}

impl SourceBatch {
    /// Number of changes in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns `true` if the batch carries no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// A replayable feed of change records.
///
/// Offsets are the whole contract: `fetch(after, max)` returns the changes
/// immediately following `after` in feed order, and fetching from any
/// earlier offset re-delivers the identical suffix. That property is what
/// lets the engine retry a failed batch wholesale and resume from a
/// checkpointed offset after a restart.
#[async_trait]
pub trait ChangeSource: Send {
    /// Stable identifier for this source, used to key checkpointed
    /// offsets.
    fn source_id(&self) -> &str;

    /// Prepares the source for fetching.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the feed cannot be reached or read.
    async fn open(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Returns up to `max_changes` changes after `after`, in feed order.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the feed cannot be read; fetching must
    /// leave no trace, so a failed fetch can simply be issued again.
    async fn fetch(
        &mut self,
        after: SourceOffset,
        max_changes: usize,
    ) -> Result<SourceBatch, SourceError>;

    /// Releases the source's resources.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if teardown fails; the source must still be
    /// considered closed.
    async fn close(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Slices a fully buffered feed according to the fetch contract.
///
/// Shared by the in-memory and file sources, which both hold their
/// records in order with offsets `1..=len`.
pub(crate) fn slice_feed(
    records: &[RawChange],
    after: SourceOffset,
    max_changes: usize,
) -> SourceBatch {
    let consumed = usize::try_from(after.0).unwrap_or(usize::MAX);
    let start = consumed.min(records.len());
    let end = start.saturating_add(max_changes).min(records.len());
    let changes: Vec<RawChange> = records[start..end].to_vec();
    let next_offset = changes.last().map_or(after, |last| last.source_offset);
    SourceBatch {
        changes,
        next_offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(n: u64) -> Vec<RawChange> {
        (1..=n)
            .map(|i| {
                RawChange::upsert(format!("k{i}"), i as i64, strata_core::event::Row::new())
                    .at_offset(SourceOffset(i))
            })
            .collect()
    }

    #[test]
    fn test_slice_from_start() {
        let records = feed(5);
        let batch = slice_feed(&records, SourceOffset(0), 3);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.next_offset, SourceOffset(3));
    }

    #[test]
    fn test_slice_resumes_after_offset() {
        let records = feed(5);
        let batch = slice_feed(&records, SourceOffset(3), 10);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.changes[0].source_offset, SourceOffset(4));
        assert_eq!(batch.next_offset, SourceOffset(5));
    }

    #[test]
    fn test_slice_past_end_is_empty_and_stationary() {
        let records = feed(5);
        let batch = slice_feed(&records, SourceOffset(5), 10);
        assert!(batch.is_empty());
        assert_eq!(batch.next_offset, SourceOffset(5));

        let far = slice_feed(&records, SourceOffset(99), 10);
        assert!(far.is_empty());
        assert_eq!(far.next_offset, SourceOffset(99));
    }

    #[test]
    fn test_replay_delivers_identical_suffix() {
        let records = feed(8);
        let first = slice_feed(&records, SourceOffset(2), 4);
        let replay = slice_feed(&records, SourceOffset(2), 4);
        assert_eq!(first.changes, replay.changes);
        assert_eq!(first.next_offset, replay.next_offset);
    }
}
