//! Versioned row storage with per-key optimistic commits.
//!
//! A [`VersionStore`] holds one target table: every key maps to its row
//! trail plus the bookkeeping [`KeyState`] the planner reads. Commits are
//! per key and optimistic. The caller plans against an observed
//! [`KeyVersion`] and the store applies the plan only if the key still
//! matches; anything else is a [`CommitError::Conflict`] and the caller
//! replans against fresh state.
//!
//! [`InMemoryVersionStore`] shards its maps so commits to different keys
//! proceed in parallel with no global lock.

use std::hash::{Hash, Hasher};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};

use strata_core::event::Key;
use strata_core::plan::{KeyPlan, RowOp};
use strata_core::state::{KeyState, KeyVersion, VersionRow};

/// Rejected or failed commit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitError {
    /// The key changed between read and commit.
    #[error("commit conflict on key '{key}': expected {expected}, found {actual}")]
    Conflict {
        /// Key the commit targeted.
        key: Key,
        /// Version the plan was made against.
        expected: KeyVersion,
        /// Version the store holds now.
        actual: KeyVersion,
    },
    /// The plan's operations do not fit the rows the store holds.
    #[error("inconsistent plan for key '{key}': {message}")]
    InvalidPlan {
        /// Key the commit targeted.
        key: Key,
        /// What did not fit.
        message: String,
    },
    /// The store cannot serve the request right now.
    #[error("version store unavailable: {0}")]
    Unavailable(String),
}

/// Read and commit interface of one versioned target table.
pub trait VersionStore: Send + Sync {
    /// Returns the key's live row, if it has one.
    fn read_current(&self, key: &Key) -> Option<VersionRow>;

    /// Returns the key's full version trail, oldest first.
    fn read_history(&self, key: &Key) -> Vec<VersionRow>;

    /// Returns the key's bookkeeping state.
    ///
    /// Keys the store has never seen report [`KeyState::untouched`].
    fn key_state(&self, key: &Key) -> KeyState;

    /// Applies a plan atomically for its key.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::Conflict`] if the key no longer matches the
    /// plan's expected version, [`CommitError::InvalidPlan`] if the plan's
    /// operations do not fit the stored rows, and
    /// [`CommitError::Unavailable`] if the store cannot accept writes.
    fn commit(&self, plan: &KeyPlan) -> Result<(), CommitError>;

    /// Every live row, sorted by key.
    fn current_view(&self) -> Vec<VersionRow>;

    /// Every row, live and closed, sorted by key then `valid_from`.
    fn history_view(&self) -> Vec<VersionRow>;

    /// Total stored rows, live and closed.
    fn row_count(&self) -> usize;

    /// Removes every row and every key state.
    fn clear(&self);
}

const DEFAULT_SHARDS: usize = 16;

/// In-memory [`VersionStore`] sharded by key hash.
pub struct InMemoryVersionStore {
    shards: Vec<RwLock<Shard>>,
}

#[derive(Default)]
struct Shard {
    rows: FxHashMap<Key, Vec<VersionRow>>,
    states: FxHashMap<Key, KeyState>,
}

impl InMemoryVersionStore {
    /// Creates a store with the default shard count.
    #[must_use]
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Creates a store with an explicit shard count (minimum one).
    #[must_use]
    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| RwLock::new(Shard::default())).collect(),
        }
    }

    fn shard_for(&self, key: &Key) -> &RwLock<Shard> {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let index = (hasher.finish() as usize) % self.shards.len();
        &self.shards[index]
    }
}

impl Default for InMemoryVersionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionStore for InMemoryVersionStore {
    fn read_current(&self, key: &Key) -> Option<VersionRow> {
        let shard = self.shard_for(key).read();
        shard
            .rows
            .get(key)
            .and_then(|rows| rows.iter().rev().find(|r| r.is_current).cloned())
    }

    fn read_history(&self, key: &Key) -> Vec<VersionRow> {
        let shard = self.shard_for(key).read();
        shard.rows.get(key).cloned().unwrap_or_default()
    }

    fn key_state(&self, key: &Key) -> KeyState {
        let shard = self.shard_for(key).read();
        shard
            .states
            .get(key)
            .cloned()
            .unwrap_or_else(|| KeyState::untouched(key.clone()))
    }

    fn commit(&self, plan: &KeyPlan) -> Result<(), CommitError> {
        let mut shard = self.shard_for(&plan.key).write();

        let actual = shard
            .states
            .get(&plan.key)
            .map_or(
                KeyVersion {
                    last_applied_sequence: None,
                    current_version_id: None,
                },
                KeyState::version,
            );
        if actual != plan.expected {
            return Err(CommitError::Conflict {
                key: plan.key.clone(),
                expected: plan.expected,
                actual,
            });
        }

        // Apply onto a copy of the key's trail so a rejected plan leaves
        // the stored rows untouched.
        let mut rows = shard.rows.get(&plan.key).cloned().unwrap_or_default();
        for op in &plan.ops {
            apply(&plan.key, &mut rows, op)?;
        }

        if rows.is_empty() {
            shard.rows.remove(&plan.key);
        } else {
            shard.rows.insert(plan.key.clone(), rows);
        }
        shard.states.insert(plan.key.clone(), plan.state_after.clone());
        Ok(())
    }

    fn current_view(&self) -> Vec<VersionRow> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let shard = shard.read();
            for rows in shard.rows.values() {
                out.extend(rows.iter().filter(|r| r.is_current).cloned());
            }
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    fn history_view(&self) -> Vec<VersionRow> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let shard = shard.read();
            for rows in shard.rows.values() {
                out.extend(rows.iter().cloned());
            }
        }
        out.sort_by(|a, b| (&a.key, a.valid_from).cmp(&(&b.key, b.valid_from)));
        out
    }

    fn row_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().rows.values().map(Vec::len).sum::<usize>())
            .sum()
    }

    fn clear(&self) {
        for shard in &self.shards {
            let mut shard = shard.write();
            shard.rows.clear();
            shard.states.clear();
        }
    }
}

fn apply(key: &Key, rows: &mut Vec<VersionRow>, op: &RowOp) -> Result<(), CommitError> {
    let invalid = |message: &str| CommitError::InvalidPlan {
        key: key.clone(),
        message: message.to_string(),
    };
    match op {
        RowOp::CloseCurrent { valid_to } => {
            let open = rows
                .iter_mut()
                .rev()
                .find(|r| r.is_current)
                .ok_or_else(|| invalid("close of a key with no live row"))?;
            open.valid_to = Some(*valid_to);
            open.is_current = false;
        }
        RowOp::Insert {
            version_id,
            payload,
            valid_from,
        } => {
            if rows.iter().any(|r| r.is_current) {
                return Err(invalid("insert while a live row is open"));
            }
            if rows.last().is_some_and(|prev| prev.valid_from >= *valid_from) {
                return Err(invalid("insert would break valid_from monotonicity"));
            }
            rows.push(VersionRow {
                key: key.clone(),
                version_id: *version_id,
                payload: payload.clone(),
                valid_from: *valid_from,
                valid_to: None,
                is_current: true,
            });
        }
        RowOp::Replace { payload, valid_from } => {
            let open = rows
                .iter_mut()
                .rev()
                .find(|r| r.is_current)
                .ok_or_else(|| invalid("replace of a key with no live row"))?;
            open.payload = payload.clone();
            open.valid_from = *valid_from;
        }
        RowOp::Remove => rows.clear(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use strata_core::config::MergeConfig;
    use strata_core::event::{ChangeEvent, ChangeOp, Row, SequenceNumber, SourceOffset};
    use strata_core::plan::MergePlanner;
    use strata_core::sequence::KeyTransitions;

    fn upsert(key: &str, seq: i64, name: &str) -> ChangeEvent {
        ChangeEvent {
            key: Key::new(key),
            sequence: SequenceNumber(seq),
            op: ChangeOp::Upsert,
            payload: Row::new().with("name", json!(name)),
            source_offset: SourceOffset(seq.unsigned_abs()),
        }
    }

    fn delete(key: &str, seq: i64) -> ChangeEvent {
        ChangeEvent {
            key: Key::new(key),
            sequence: SequenceNumber(seq),
            op: ChangeOp::Delete,
            payload: Row::new(),
            source_offset: SourceOffset(seq.unsigned_abs()),
        }
    }

    fn commit_events(
        store: &InMemoryVersionStore,
        planner: &MergePlanner,
        key: &str,
        events: Vec<ChangeEvent>,
    ) {
        let transitions = KeyTransitions {
            key: Key::new(key),
            events,
        };
        let state = store.key_state(&Key::new(key));
        let plan = planner.plan(&transitions, &state);
        store.commit(&plan).expect("commit");
    }

    #[test]
    fn test_insert_then_read_current() {
        let store = InMemoryVersionStore::new();
        let planner = MergePlanner::new(MergeConfig::overwrite());
        commit_events(&store, &planner, "a", vec![upsert("a", 10, "v1")]);

        let current = store.read_current(&Key::new("a")).expect("live row");
        assert_eq!(current.version_id, 1);
        assert_eq!(current.payload.get("name"), Some(&json!("v1")));
        assert!(current.is_current);
        assert_eq!(store.row_count(), 1);
    }

    #[test]
    fn test_history_trail_stays_ordered() {
        let store = InMemoryVersionStore::new();
        let planner = MergePlanner::new(MergeConfig::history());
        commit_events(&store, &planner, "a", vec![upsert("a", 10, "v1")]);
        commit_events(&store, &planner, "a", vec![upsert("a", 20, "v2")]);
        commit_events(&store, &planner, "a", vec![upsert("a", 30, "v3")]);

        let trail = store.read_history(&Key::new("a"));
        assert_eq!(trail.len(), 3);
        assert_eq!(
            trail.iter().map(|r| r.valid_from.0).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );
        assert_eq!(
            trail.iter().map(|r| r.valid_to.map(|s| s.0)).collect::<Vec<_>>(),
            vec![Some(20), Some(30), None]
        );
        assert_eq!(
            trail.iter().filter(|r| r.is_current).count(),
            1,
            "exactly one live row per key"
        );
    }

    #[test]
    fn test_replace_keeps_version_id() {
        let store = InMemoryVersionStore::new();
        let planner = MergePlanner::new(MergeConfig::overwrite());
        commit_events(&store, &planner, "a", vec![upsert("a", 10, "v1")]);
        commit_events(&store, &planner, "a", vec![upsert("a", 20, "v2")]);

        let current = store.read_current(&Key::new("a")).expect("live row");
        assert_eq!(current.version_id, 1);
        assert_eq!(current.valid_from, SequenceNumber(20));
        assert_eq!(current.payload.get("name"), Some(&json!("v2")));
        assert_eq!(store.row_count(), 1);
    }

    #[test]
    fn test_remove_clears_rows_but_keeps_tombstone() {
        let store = InMemoryVersionStore::new();
        let planner = MergePlanner::new(MergeConfig::overwrite());
        commit_events(&store, &planner, "a", vec![upsert("a", 10, "v1")]);
        commit_events(&store, &planner, "a", vec![delete("a", 20)]);

        assert!(store.read_current(&Key::new("a")).is_none());
        assert_eq!(store.row_count(), 0);

        let state = store.key_state(&Key::new("a"));
        assert!(state.is_deleted);
        assert_eq!(state.last_applied_sequence, Some(SequenceNumber(20)));
        assert!(state.is_stale(SequenceNumber(15)));
    }

    #[test]
    fn test_conflict_on_changed_key() {
        let store = InMemoryVersionStore::new();
        let planner = MergePlanner::new(MergeConfig::overwrite());

        let transitions = KeyTransitions {
            key: Key::new("a"),
            events: vec![upsert("a", 10, "mine")],
        };
        let observed = store.key_state(&Key::new("a"));
        let plan = planner.plan(&transitions, &observed);

        // Another writer lands first.
        commit_events(&store, &planner, "a", vec![upsert("a", 5, "theirs")]);

        let err = store.commit(&plan).expect_err("precondition broken");
        match err {
            CommitError::Conflict { key, expected, actual } => {
                assert_eq!(key, Key::new("a"));
                assert_eq!(expected.current_version_id, None);
                assert_eq!(actual.current_version_id, Some(1));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_conflict_on_moved_floor_without_version_change() {
        let store = InMemoryVersionStore::new();
        let planner = MergePlanner::new(MergeConfig::overwrite());

        let observed = store.key_state(&Key::new("a"));
        let plan = planner.plan(
            &KeyTransitions {
                key: Key::new("a"),
                events: vec![upsert("a", 3, "stale insert")],
            },
            &observed,
        );

        // A delete of a never-seen key moves the floor but leaves the
        // current version at none, matching the plan's version id.
        commit_events(&store, &planner, "a", vec![delete("a", 5)]);

        let err = store.commit(&plan).expect_err("floor moved");
        assert!(matches!(err, CommitError::Conflict { .. }));
    }

    #[test]
    fn test_invalid_plan_leaves_store_untouched() {
        let store = InMemoryVersionStore::new();
        let plan = KeyPlan {
            key: Key::new("a"),
            expected: KeyVersion {
                last_applied_sequence: None,
                current_version_id: None,
            },
            ops: vec![RowOp::CloseCurrent {
                valid_to: SequenceNumber(10),
            }],
            state_after: KeyState::untouched(Key::new("a")),
            stale_skipped: 0,
        };
        let err = store.commit(&plan).expect_err("no live row to close");
        assert!(matches!(err, CommitError::InvalidPlan { .. }));
        assert_eq!(store.row_count(), 0);
        assert_eq!(store.key_state(&Key::new("a")), KeyState::untouched(Key::new("a")));
    }

    #[test]
    fn test_current_view_sorted_across_shards() {
        let store = InMemoryVersionStore::with_shards(4);
        let planner = MergePlanner::new(MergeConfig::overwrite());
        for key in ["delta", "alpha", "charlie", "bravo"] {
            commit_events(&store, &planner, key, vec![upsert(key, 10, key)]);
        }
        let view = store.current_view();
        let keys: Vec<&str> = view.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["alpha", "bravo", "charlie", "delta"]);
    }

    #[test]
    fn test_concurrent_commits_to_distinct_keys() {
        let store = Arc::new(InMemoryVersionStore::new());
        let planner = MergePlanner::new(MergeConfig::history());

        let mut handles = Vec::new();
        for worker in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    let key = format!("worker{worker}:key{i}");
                    commit_events(&store, &planner, &key, vec![upsert(&key, 10, "v1")]);
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker thread");
        }
        assert_eq!(store.row_count(), 8 * 50);
        assert_eq!(store.current_view().len(), 8 * 50);
    }

    #[test]
    fn test_clear_empties_rows_and_states() {
        let store = InMemoryVersionStore::new();
        let planner = MergePlanner::new(MergeConfig::overwrite());
        commit_events(&store, &planner, "a", vec![upsert("a", 10, "v1")]);
        commit_events(&store, &planner, "a", vec![delete("a", 20)]);

        store.clear();
        assert_eq!(store.row_count(), 0);
        // A cleared store forgets tombstones; replay from offset zero
        // rebuilds them.
        assert_eq!(store.key_state(&Key::new("a")), KeyState::untouched(Key::new("a")));
    }
}
