//! Durable source-offset checkpoints.
//!
//! A checkpoint manifest records, per consumer, the feed offset up to
//! which every change has been committed to version stores. Manifests are
//! written after commit, never before, so replaying from a saved offset
//! can only re-deliver changes the stores already absorbed. The
//! filesystem store writes each manifest to a temporary file and renames
//! it into place; a crash mid-write leaves the previous manifest intact.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use strata_core::event::SourceOffset;

/// Committed offsets for every consumer, as of one checkpoint.
///
/// Keys are consumer names, not source ids: two tables reading the same
/// feed checkpoint independent positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetManifest {
    /// Monotonically increasing checkpoint id.
    pub checkpoint_id: u64,
    /// Wall-clock creation time in epoch milliseconds.
    pub created_ms: u64,
    /// Last committed offset per consumer.
    #[serde(default)]
    pub offsets: HashMap<String, SourceOffset>,
}

impl OffsetManifest {
    /// Creates an empty manifest stamped with the current time.
    #[must_use]
    pub fn new(checkpoint_id: u64) -> Self {
        let created_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self {
            checkpoint_id,
            created_ms,
            offsets: HashMap::new(),
        }
    }

    /// Records a consumer's committed offset.
    pub fn set_offset(&mut self, consumer: impl Into<String>, offset: SourceOffset) {
        self.offsets.insert(consumer.into(), offset);
    }

    /// Forgets a consumer's offset, so its feed replays from the start.
    pub fn clear_offset(&mut self, consumer: &str) {
        self.offsets.remove(consumer);
    }

    /// The committed offset for a consumer; zero when never checkpointed.
    #[must_use]
    pub fn offset_for(&self, consumer: &str) -> SourceOffset {
        self.offsets.get(consumer).copied().unwrap_or_default()
    }
}

/// Failed checkpoint persistence.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Filesystem error while reading or writing a manifest.
    #[error("checkpoint i/o: {0}")]
    Io(#[from] std::io::Error),
    /// A manifest could not be encoded or decoded.
    #[error("checkpoint serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The store cannot serve the request right now.
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence interface for offset manifests.
///
/// Implementations are synchronous; async callers run them under
/// `spawn_blocking`.
pub trait CheckpointStore: Send + Sync {
    /// Persists a manifest durably.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if the manifest could not be written;
    /// the previously saved manifest must survive the failure.
    fn save(&self, manifest: &OffsetManifest) -> Result<(), CheckpointError>;

    /// Loads the most recent manifest, if any exist.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if a manifest exists but cannot be
    /// read or decoded.
    fn load_latest(&self) -> Result<Option<OffsetManifest>, CheckpointError>;
}

/// Filesystem-backed [`CheckpointStore`]: one JSON file per checkpoint,
/// written atomically, with bounded retention.
pub struct FileSystemCheckpointStore {
    dir: PathBuf,
    max_retained: usize,
}

impl FileSystemCheckpointStore {
    /// Creates a store rooted at `dir`, keeping up to `max_retained`
    /// manifests (minimum one).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, max_retained: usize) -> Self {
        Self {
            dir: dir.into(),
            max_retained: max_retained.max(1),
        }
    }

    fn manifest_path(&self, checkpoint_id: u64) -> PathBuf {
        // Zero padding keeps lexical listing order equal to numeric order.
        self.dir.join(format!("checkpoint-{checkpoint_id:020}.json"))
    }

    fn list_manifests(&self) -> Result<Vec<PathBuf>, CheckpointError> {
        let mut manifests = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(manifests),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if is_manifest_file(&path) {
                manifests.push(path);
            }
        }
        manifests.sort();
        Ok(manifests)
    }

    fn prune(&self) {
        let Ok(manifests) = self.list_manifests() else {
            return;
        };
        if manifests.len() <= self.max_retained {
            return;
        }
        let excess = manifests.len() - self.max_retained;
        for old in &manifests[..excess] {
            if let Err(e) = fs::remove_file(old) {
                tracing::warn!(path = %old.display(), error = %e, "failed to prune old checkpoint");
            }
        }
    }
}

fn is_manifest_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("checkpoint-") && n.ends_with(".json"))
}

impl CheckpointStore for FileSystemCheckpointStore {
    fn save(&self, manifest: &OffsetManifest) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir)?;
        let bytes = serde_json::to_vec_pretty(manifest)?;

        let tmp = self
            .dir
            .join(format!(".checkpoint-{:020}.tmp", manifest.checkpoint_id));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.manifest_path(manifest.checkpoint_id))?;

        self.prune();
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<OffsetManifest>, CheckpointError> {
        let manifests = self.list_manifests()?;
        let Some(latest) = manifests.last() else {
            return Ok(None);
        };
        let bytes = fs::read(latest)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// In-memory [`CheckpointStore`] holding only the latest manifest.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    latest: Mutex<Option<OffsetManifest>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, manifest: &OffsetManifest) -> Result<(), CheckpointError> {
        *self.latest.lock() = Some(manifest.clone());
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<OffsetManifest>, CheckpointError> {
        Ok(self.latest.lock().clone())
    }
}
