//! Test doubles for exercising pipeline retry and recovery paths.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use strata_core::event::SourceOffset;

use crate::source::{ChangeSource, SourceBatch, SourceError};

/// Wraps a source and fails a budgeted number of fetches with a
/// transient error before delegating again.
///
/// The budget lives behind an [`Arc`] so a test can keep a handle and
/// arm failures after the pipeline has taken ownership of the boxed
/// source.
pub struct FlakySource<S> {
    inner: S,
    failing_fetches: Arc<AtomicU32>,
}

impl<S> FlakySource<S> {
    /// Wraps `inner` with an empty failure budget.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing_fetches: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Arms the next `n` fetches to fail.
    pub fn fail_next_fetches(&self, n: u32) {
        self.failing_fetches.store(n, Ordering::SeqCst);
    }

    /// Handle to the failure budget, for arming after the source has
    /// been moved into a pipeline. Store a count to schedule failures.
    #[must_use]
    pub fn failure_handle(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.failing_fetches)
    }
}

#[async_trait]
impl<S: ChangeSource> ChangeSource for FlakySource<S> {
    fn source_id(&self) -> &str {
        self.inner.source_id()
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        self.inner.open().await
    }

    async fn fetch(
        &mut self,
        after: SourceOffset,
        max_changes: usize,
    ) -> Result<SourceBatch, SourceError> {
        if take_failure(&self.failing_fetches) {
            return Err(SourceError::Unavailable(
                "injected fetch failure".to_string(),
            ));
        }
        self.inner.fetch(after, max_changes).await
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.inner.close().await
    }
}

fn take_failure(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
