//! Test doubles for storage fault paths.
//!
//! Both doubles wrap a real in-memory store and fail a scripted number of
//! writes with `Unavailable`, which is how tests drive the wholesale batch
//! retry path without touching a real disk.

use std::sync::atomic::{AtomicU32, Ordering};

use strata_core::event::Key;
use strata_core::plan::KeyPlan;
use strata_core::state::{KeyState, VersionRow};

use crate::checkpoint::{CheckpointError, CheckpointStore, InMemoryCheckpointStore, OffsetManifest};
use crate::version::{CommitError, InMemoryVersionStore, VersionStore};

fn take_failure(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// A [`VersionStore`] that fails the next `n` commits with
/// [`CommitError::Unavailable`], then behaves normally.
#[derive(Default)]
pub struct FlakyVersionStore {
    inner: InMemoryVersionStore,
    failing_commits: AtomicU32,
}

impl FlakyVersionStore {
    /// Creates a store that starts healthy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the store to fail its next `n` commits.
    pub fn fail_next_commits(&self, n: u32) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }
}

impl VersionStore for FlakyVersionStore {
    fn read_current(&self, key: &Key) -> Option<VersionRow> {
        self.inner.read_current(key)
    }

    fn read_history(&self, key: &Key) -> Vec<VersionRow> {
        self.inner.read_history(key)
    }

    fn key_state(&self, key: &Key) -> KeyState {
        self.inner.key_state(key)
    }

    fn commit(&self, plan: &KeyPlan) -> Result<(), CommitError> {
        if take_failure(&self.failing_commits) {
            return Err(CommitError::Unavailable(
                "injected commit failure".to_string(),
            ));
        }
        self.inner.commit(plan)
    }

    fn current_view(&self) -> Vec<VersionRow> {
        self.inner.current_view()
    }

    fn history_view(&self) -> Vec<VersionRow> {
        self.inner.history_view()
    }

    fn row_count(&self) -> usize {
        self.inner.row_count()
    }

    fn clear(&self) {
        self.inner.clear();
    }
}

/// A [`CheckpointStore`] that fails the next `n` saves with
/// [`CheckpointError::Unavailable`], then behaves normally.
#[derive(Debug, Default)]
pub struct FlakyCheckpointStore {
    inner: InMemoryCheckpointStore,
    failing_saves: AtomicU32,
}

impl FlakyCheckpointStore {
    /// Creates a store that starts healthy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the store to fail its next `n` saves.
    pub fn fail_next_saves(&self, n: u32) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }
}

impl CheckpointStore for FlakyCheckpointStore {
    fn save(&self, manifest: &OffsetManifest) -> Result<(), CheckpointError> {
        if take_failure(&self.failing_saves) {
            return Err(CheckpointError::Unavailable(
                "injected save failure".to_string(),
            ));
        }
        self.inner.save(manifest)
    }

    fn load_latest(&self) -> Result<Option<OffsetManifest>, CheckpointError> {
        self.inner.load_latest()
    }
}
