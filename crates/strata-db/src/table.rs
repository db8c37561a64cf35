//! Table registration.

use std::sync::Arc;

use strata_connectors::ChangeSource;
use strata_core::config::MergeConfig;
use strata_core::gate::QualityRule;
use strata_core::validate::MalformedAction;
use strata_storage::VersionStore;

/// Declares one target table: the feed it consumes, how changes merge,
/// which quality rules admit rows, and which tables must be processed
/// before it.
///
/// # Example
///
/// ```rust,ignore
/// let table = TableSpec::new("suppliers", Box::new(source))
///     .merge(MergeConfig::history())
///     .rule(QualityRule::expect_or_drop("has_email", |row| {
///         row.get("email").is_some()
///     }))
///     .depends_on("vendors");
/// ```
pub struct TableSpec {
    pub(crate) name: String,
    pub(crate) source: Box<dyn ChangeSource>,
    pub(crate) merge: MergeConfig,
    pub(crate) malformed: MalformedAction,
    pub(crate) rules: Vec<QualityRule>,
    pub(crate) depends_on: Vec<String>,
    pub(crate) store: Option<Arc<dyn VersionStore>>,
}

impl TableSpec {
    /// Declares a table fed by `source`, with overwrite merge semantics
    /// and no quality rules.
    #[must_use]
    pub fn new(name: impl Into<String>, source: Box<dyn ChangeSource>) -> Self {
        Self {
            name: name.into(),
            source,
            merge: MergeConfig::default(),
            malformed: MalformedAction::default(),
            rules: Vec::new(),
            depends_on: Vec::new(),
            store: None,
        }
    }

    /// Sets the merge configuration.
    #[must_use]
    pub fn merge(mut self, config: MergeConfig) -> Self {
        self.merge = config;
        self
    }

    /// Sets how malformed changes are handled.
    #[must_use]
    pub fn malformed(mut self, action: MalformedAction) -> Self {
        self.malformed = action;
        self
    }

    /// Appends a quality rule. Rules evaluate in registration order.
    #[must_use]
    pub fn rule(mut self, rule: QualityRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Declares that this table reads `table`'s output and must be
    /// processed after it.
    #[must_use]
    pub fn depends_on(mut self, table: impl Into<String>) -> Self {
        self.depends_on.push(table.into());
        self
    }

    /// Supplies the version store backing this table.
    ///
    /// Defaults to a fresh in-memory store. Passing a shared handle
    /// lets a store outlive the pipeline, which is how state survives a
    /// restart and resumes from the checkpointed offsets.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn VersionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for TableSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSpec")
            .field("name", &self.name)
            .field("merge", &self.merge)
            .field("malformed", &self.malformed)
            .field("rules", &self.rules.len())
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_connectors::MemorySource;

    #[test]
    fn test_builder_accumulates() {
        let spec = TableSpec::new("orders", Box::new(MemorySource::new("orders", Vec::new())))
            .merge(MergeConfig::history())
            .rule(QualityRule::expect("has_id", |row| row.get("id").is_some()))
            .depends_on("customers")
            .depends_on("products");

        assert_eq!(spec.name(), "orders");
        assert_eq!(spec.merge.scd_mode, strata_core::config::ScdMode::History);
        assert_eq!(spec.rules.len(), 1);
        assert_eq!(spec.depends_on, vec!["customers", "products"]);
    }
}
