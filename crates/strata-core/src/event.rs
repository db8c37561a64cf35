//! Change event model shared by every stage of the merge path.
//!
//! Changes enter the engine as [`RawChange`]s exactly as a source delivered
//! them, are shaped into [`ChangeEvent`]s by the validator, and are applied
//! to target tables as versioned rows. All three layers share the same
//! identity vocabulary: a [`Key`] names the row, a [`SequenceNumber`] orders
//! changes to it, and a [`SourceOffset`] records where in the feed the
//! change was read.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

/// Primary-key identity of a row in a target table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(pub String);

impl Key {
    /// Creates a new key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Position of a change in the total order of changes to its key.
///
/// Sequence numbers come from the upstream system (a commit timestamp in
/// epoch milliseconds, a log sequence number, a counter). The engine never
/// generates them; it only compares them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct SequenceNumber(pub i64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SequenceNumber {
    fn from(seq: i64) -> Self {
        Self(seq)
    }
}

/// Position of a change within its source feed.
///
/// Offsets are 1-based: the first change a source can deliver sits at
/// offset 1, and offset 0 means "nothing consumed yet". Offsets are stable
/// across replays of the same feed, which makes them usable as a
/// deterministic tie-break.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct SourceOffset(pub u64);

impl std::fmt::Display for SourceOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SourceOffset {
    fn from(offset: u64) -> Self {
        Self(offset)
    }
}

/// Operation carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOp {
    /// Insert a new row or update an existing one.
    Upsert,
    /// Remove the row (or close its current version, in history mode).
    Delete,
}

impl ChangeOp {
    /// Parses an operation name as feeds commonly spell it.
    ///
    /// `insert`, `update`, and `upsert` all map to [`ChangeOp::Upsert`];
    /// `delete` maps to [`ChangeOp::Delete`]. Matching is case-insensitive.
    #[must_use]
    pub fn parse(op: &str) -> Option<Self> {
        match op.to_ascii_lowercase().as_str() {
            "insert" | "update" | "upsert" => Some(Self::Upsert),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upsert => write!(f, "upsert"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Column values of a row, keyed by field name.
///
/// Backed by a key-sorted JSON map, so two rows with the same fields hash
/// and compare equal regardless of the order fields were added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    fields: serde_json::Map<String, serde_json::Value>,
}

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing any previous value.
    pub fn set(&mut self, field: impl Into<String>, value: serde_json::Value) {
        self.fields.insert(field.into(), value);
    }

    /// Builder-style [`Row::set`].
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.set(field, value);
        self
    }

    /// Returns the value of a field, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }

    /// Number of fields in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the row has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.fields.iter()
    }

    /// Content hash of the row.
    ///
    /// Uses a fixed-seed hasher over key-sorted fields, so the hash of a
    /// given row is identical across processes and replays.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        for (field, value) in &self.fields {
            field.hash(&mut hasher);
            value.to_string().hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Row {
    fn from(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { fields }
    }
}

/// A change record exactly as a source delivered it, before validation.
///
/// Every identity field is optional because feeds lie: the validator is the
/// single place that decides what happens to a change with a missing key,
/// sequence, or operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChange {
    /// Row key, if the feed carried one.
    pub key: Option<String>,
    /// Sequence value, if the feed carried one.
    pub sequence: Option<i64>,
    /// Operation name as spelled by the feed, if present.
    pub operation: Option<String>,
    /// Remaining columns of the record.
    pub payload: Row,
    /// Where in the feed this record was read.
    pub source_offset: SourceOffset,
}

impl RawChange {
    /// Creates an empty change at the given offset.
    ///
    /// Used by sources for records that could not be decoded at all; the
    /// validator will count it as malformed.
    #[must_use]
    pub fn empty(source_offset: SourceOffset) -> Self {
        Self {
            key: None,
            sequence: None,
            operation: None,
            payload: Row::new(),
            source_offset,
        }
    }

    /// Creates a well-formed upsert change.
    ///
    /// The offset defaults to zero; sources assign real positions when they
    /// hand the change out.
    #[must_use]
    pub fn upsert(key: impl Into<String>, sequence: i64, payload: Row) -> Self {
        Self {
            key: Some(key.into()),
            sequence: Some(sequence),
            operation: Some("upsert".to_string()),
            payload,
            source_offset: SourceOffset(0),
        }
    }

    /// Creates a well-formed delete change.
    #[must_use]
    pub fn delete(key: impl Into<String>, sequence: i64) -> Self {
        Self {
            key: Some(key.into()),
            sequence: Some(sequence),
            operation: Some("delete".to_string()),
            payload: Row::new(),
            source_offset: SourceOffset(0),
        }
    }

    /// Sets the source offset.
    #[must_use]
    pub fn at_offset(mut self, offset: SourceOffset) -> Self {
        self.source_offset = offset;
        self
    }
}

/// A validated change event, ready for sequencing and planning.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Row the change applies to.
    pub key: Key,
    /// Position in the key's change order.
    pub sequence: SequenceNumber,
    /// What the change does.
    pub op: ChangeOp,
    /// Column values carried by the change.
    pub payload: Row,
    /// Where in the feed the change was read.
    pub source_offset: SourceOffset,
}

impl ChangeEvent {
    /// Identity hash used for exact-duplicate collapse.
    ///
    /// Two deliveries of the same logical change (same key, sequence,
    /// operation, and payload content) hash equal even when their source
    /// offsets differ.
    #[must_use]
    pub fn dedup_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.key.hash(&mut hasher);
        self.sequence.hash(&mut hasher);
        self.op.hash(&mut hasher);
        self.payload.content_hash().hash(&mut hasher);
        hasher.finish()
    }
}
