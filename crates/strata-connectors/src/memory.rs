//! In-memory change source.
//!
//! Holds its feed in a shared vector, so tests and demos can keep a
//! [`MemoryFeed`] handle and append changes while a pipeline is polling
//! the source in continuous mode.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use strata_core::event::{RawChange, SourceOffset};

use crate::source::{slice_feed, ChangeSource, SourceBatch, SourceError};

/// A [`ChangeSource`] over an in-memory vector of changes.
pub struct MemorySource {
    source_id: String,
    records: Arc<RwLock<Vec<RawChange>>>,
}

impl MemorySource {
    /// Creates a source over the given changes, assigning feed offsets
    /// `1..=len` in order.
    #[must_use]
    pub fn new(source_id: impl Into<String>, changes: Vec<RawChange>) -> Self {
        let records: Vec<RawChange> = changes
            .into_iter()
            .enumerate()
            .map(|(i, change)| change.at_offset(SourceOffset(i as u64 + 1)))
            .collect();
        Self {
            source_id: source_id.into(),
            records: Arc::new(RwLock::new(records)),
        }
    }

    /// Returns a handle for appending changes to the live feed.
    #[must_use]
    pub fn feed(&self) -> MemoryFeed {
        MemoryFeed {
            records: Arc::clone(&self.records),
        }
    }
}

/// Append handle to a [`MemorySource`]'s feed.
#[derive(Clone)]
pub struct MemoryFeed {
    records: Arc<RwLock<Vec<RawChange>>>,
}

impl MemoryFeed {
    /// Appends a change to the end of the feed, assigning its offset.
    pub fn push(&self, change: RawChange) {
        let mut records = self.records.write();
        let offset = SourceOffset(records.len() as u64 + 1);
        records.push(change.at_offset(offset));
    }

    /// Current feed length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if the feed holds no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl ChangeSource for MemorySource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch(
        &mut self,
        after: SourceOffset,
        max_changes: usize,
    ) -> Result<SourceBatch, SourceError> {
        let records = self.records.read();
        Ok(slice_feed(&records, after, max_changes))
    }
}
