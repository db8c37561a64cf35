//! Newline-delimited JSON file source.
//!
//! Each line is one change record as a JSON object. A [`FieldMapping`]
//! names the object fields that carry the change's identity (key,
//! sequence, operation); every other field becomes payload. The sequence
//! field must be a JSON integer, typically an epoch-millisecond timestamp
//! or an upstream log position.
//!
//! Lines that fail to parse are not errors at this layer: they come out
//! as empty changes that the validator counts and handles under the
//! table's malformed-change policy. A poisoned line in a feed should not
//! take the pipeline down.

use std::path::PathBuf;

use async_trait::async_trait;

use strata_core::event::{RawChange, Row, SourceOffset};

use crate::source::{slice_feed, ChangeSource, SourceBatch, SourceError};

/// Names of the object fields carrying a change's identity.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    /// Field holding the row key. Strings and integers both work.
    pub key_field: String,
    /// Field holding the integer sequence value.
    pub sequence_field: String,
    /// Field holding the operation name.
    pub operation_field: String,
}

impl FieldMapping {
    /// Creates a mapping with explicit field names.
    #[must_use]
    pub fn new(
        key_field: impl Into<String>,
        sequence_field: impl Into<String>,
        operation_field: impl Into<String>,
    ) -> Self {
        Self {
            key_field: key_field.into(),
            sequence_field: sequence_field.into(),
            operation_field: operation_field.into(),
        }
    }
}

impl Default for FieldMapping {
    /// The conventional field names: `key`, `sequence`, `op`.
    fn default() -> Self {
        Self::new("key", "sequence", "op")
    }
}

/// A [`ChangeSource`] over a newline-delimited JSON file.
///
/// The file is read fully on [`ChangeSource::open`]; feeds this source is
/// meant for are bounded extracts, not endless logs.
pub struct JsonlSource {
    source_id: String,
    path: PathBuf,
    mapping: FieldMapping,
    records: Vec<RawChange>,
    opened: bool,
}

impl JsonlSource {
    /// Creates a source reading `path` with the given field mapping.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        path: impl Into<PathBuf>,
        mapping: FieldMapping,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            path: path.into(),
            mapping,
            records: Vec::new(),
            opened: false,
        }
    }
}

#[async_trait]
impl ChangeSource for JsonlSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;

        let mut records = Vec::new();
        let mut unparseable = 0u64;
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let offset = SourceOffset(records.len() as u64 + 1);
            match serde_json::from_str::<serde_json::Value>(line) {
                Ok(serde_json::Value::Object(object)) => {
                    records.push(decode(object, offset, &self.mapping));
                }
                Ok(_) | Err(_) => {
                    unparseable += 1;
                    records.push(RawChange::empty(offset));
                }
            }
        }

        tracing::info!(
            source_id = %self.source_id,
            path = %self.path.display(),
            records = records.len(),
            unparseable,
            "opened jsonl source"
        );
        self.records = records;
        self.opened = true;
        Ok(())
    }

    async fn fetch(
        &mut self,
        after: SourceOffset,
        max_changes: usize,
    ) -> Result<SourceBatch, SourceError> {
        if !self.opened {
            return Err(SourceError::NotOpen(self.source_id.clone()));
        }
        Ok(slice_feed(&self.records, after, max_changes))
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.records = Vec::new();
        self.opened = false;
        Ok(())
    }
}

fn decode(
    mut object: serde_json::Map<String, serde_json::Value>,
    offset: SourceOffset,
    mapping: &FieldMapping,
) -> RawChange {
    let key = match object.remove(&mapping.key_field) {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let sequence = object
        .remove(&mapping.sequence_field)
        .and_then(|v| v.as_i64());
    let operation = match object.remove(&mapping.operation_field) {
        Some(serde_json::Value::String(s)) => Some(s),
        _ => None,
    };

    RawChange {
        key,
        sequence,
        operation,
        payload: Row::from(object),
        source_offset: offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_feed(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_reads_cdc_shaped_records() {
        let file = write_feed(&[
            r#"{"id": 41, "update_type": "INSERT", "update_date": 100, "name": "Acme", "email": "acme@example.com"}"#,
            r#"{"id": 41, "update_type": "UPDATE", "update_date": 200, "name": "Acme Corp"}"#,
            r#"{"id": 41, "update_type": "DELETE", "update_date": 300}"#,
        ]);
        let mapping = FieldMapping::new("id", "update_date", "update_type");
        let mut source = JsonlSource::new("suppliers", file.path(), mapping);
        source.open().await.unwrap();

        let batch = source.fetch(SourceOffset(0), 10).await.unwrap();
        assert_eq!(batch.len(), 3);

        let first = &batch.changes[0];
        assert_eq!(first.key.as_deref(), Some("41"));
        assert_eq!(first.sequence, Some(100));
        assert_eq!(first.operation.as_deref(), Some("INSERT"));
        assert_eq!(first.payload.get("name"), Some(&serde_json::json!("Acme")));
        // Identity fields do not leak into the payload.
        assert!(first.payload.get("id").is_none());
        assert!(first.payload.get("update_date").is_none());

        assert_eq!(batch.changes[2].operation.as_deref(), Some("DELETE"));
        assert!(batch.changes[2].payload.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_lines_become_empty_changes() {
        let file = write_feed(&[
            r#"{"key": "a", "sequence": 1, "op": "upsert"}"#,
            "not json at all",
            r#"[1, 2, 3]"#,
        ]);
        let mut source = JsonlSource::new("feed", file.path(), FieldMapping::default());
        source.open().await.unwrap();

        let batch = source.fetch(SourceOffset(0), 10).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.changes[1].key.is_none());
        assert!(batch.changes[2].key.is_none());
        // Offsets still count the poisoned lines.
        assert_eq!(batch.changes[2].source_offset, SourceOffset(3));
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let file = write_feed(&[
            r#"{"key": "a", "sequence": 1, "op": "upsert"}"#,
            "",
            r#"{"key": "b", "sequence": 2, "op": "upsert"}"#,
        ]);
        let mut source = JsonlSource::new("feed", file.path(), FieldMapping::default());
        source.open().await.unwrap();

        let batch = source.fetch(SourceOffset(0), 10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.changes[1].source_offset, SourceOffset(2));
    }

    #[tokio::test]
    async fn test_fetch_before_open_fails() {
        let mut source = JsonlSource::new("feed", "/nonexistent.jsonl", FieldMapping::default());
        let err = source.fetch(SourceOffset(0), 10).await.unwrap_err();
        assert!(matches!(err, SourceError::NotOpen(_)));
    }

    #[tokio::test]
    async fn test_missing_file_fails_open() {
        let mut source = JsonlSource::new(
            "feed",
            "/nonexistent/strata-test.jsonl",
            FieldMapping::default(),
        );
        assert!(matches!(
            source.open().await,
            Err(SourceError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_mid_file() {
        let file = write_feed(&[
            r#"{"key": "a", "sequence": 1, "op": "upsert"}"#,
            r#"{"key": "b", "sequence": 2, "op": "upsert"}"#,
            r#"{"key": "c", "sequence": 3, "op": "upsert"}"#,
        ]);
        let mut source = JsonlSource::new("feed", file.path(), FieldMapping::default());
        source.open().await.unwrap();

        let batch = source.fetch(SourceOffset(2), 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.changes[0].key.as_deref(), Some("c"));
    }
}
