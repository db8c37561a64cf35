//! Merge behavior configuration for a target table.

use serde::{Deserialize, Serialize};

use crate::sequence::TieBreak;

/// How the target table versions rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScdMode {
    /// Keep only the latest value per key; upserts rewrite the row in
    /// place and deletes remove it.
    #[default]
    Overwrite,
    /// Keep every version per key with validity intervals; upserts close
    /// the current version and append a new one.
    History,
}

impl std::fmt::Display for ScdMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overwrite => write!(f, "overwrite"),
            Self::History => write!(f, "history"),
        }
    }
}

/// What a delete does to stored rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Physically remove the key's rows. In history mode this purges the
    /// key's entire version trail.
    #[default]
    HardDelete,
    /// Close the current version's validity interval and keep every row.
    /// Only meaningful in history mode.
    SoftClose,
}

impl std::fmt::Display for DeleteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HardDelete => write!(f, "hard_delete"),
            Self::SoftClose => write!(f, "soft_close"),
        }
    }
}

/// Merge configuration for one target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Versioning mode.
    pub scd_mode: ScdMode,
    /// Delete handling.
    pub delete_mode: DeleteMode,
    /// Resolution for distinct changes sharing a key and sequence.
    pub tie_break: TieBreak,
}

impl MergeConfig {
    /// Overwrite-mode configuration: latest value per key, hard deletes.
    #[must_use]
    pub fn overwrite() -> Self {
        Self {
            scd_mode: ScdMode::Overwrite,
            delete_mode: DeleteMode::HardDelete,
            tie_break: TieBreak::default(),
        }
    }

    /// History-mode configuration: full version trail, soft-close deletes.
    #[must_use]
    pub fn history() -> Self {
        Self {
            scd_mode: ScdMode::History,
            delete_mode: DeleteMode::SoftClose,
            tie_break: TieBreak::default(),
        }
    }

    /// Sets the delete mode.
    #[must_use]
    pub fn with_delete_mode(mut self, delete_mode: DeleteMode) -> Self {
        self.delete_mode = delete_mode;
        self
    }

    /// Sets the tie-break rule.
    #[must_use]
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Checks that the combination of modes is coherent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SoftCloseRequiresHistory`] for
    /// overwrite-mode tables configured with soft-close deletes: overwrite
    /// mode keeps no closed versions, so there is nothing to soft-close.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scd_mode == ScdMode::Overwrite && self.delete_mode == DeleteMode::SoftClose {
            return Err(ConfigError::SoftCloseRequiresHistory);
        }
        Ok(())
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self::overwrite()
    }
}

/// Rejected configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Soft-close deletes were requested for an overwrite-mode table.
    #[error("soft_close deletes require history mode")]
    SoftCloseRequiresHistory,
    /// A pipeline option held a value outside its accepted range.
    #[error("invalid option '{option}': {message}")]
    InvalidOption {
        /// Name of the offending option.
        option: &'static str,
        /// What was wrong with it.
        message: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_overwrite_hard_delete() {
        let config = MergeConfig::default();
        assert_eq!(config.scd_mode, ScdMode::Overwrite);
        assert_eq!(config.delete_mode, DeleteMode::HardDelete);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_history_defaults_to_soft_close() {
        let config = MergeConfig::history();
        assert_eq!(config.delete_mode, DeleteMode::SoftClose);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overwrite_rejects_soft_close() {
        let config = MergeConfig::overwrite().with_delete_mode(DeleteMode::SoftClose);
        assert_eq!(
            config.validate(),
            Err(ConfigError::SoftCloseRequiresHistory)
        );
    }

    #[test]
    fn test_history_allows_hard_delete() {
        let config = MergeConfig::history().with_delete_mode(DeleteMode::HardDelete);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mode_display_names_match_config_grammar() {
        assert_eq!(ScdMode::Overwrite.to_string(), "overwrite");
        assert_eq!(ScdMode::History.to_string(), "history");
        assert_eq!(DeleteMode::HardDelete.to_string(), "hard_delete");
        assert_eq!(DeleteMode::SoftClose.to_string(), "soft_close");
    }
}
