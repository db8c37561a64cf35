//! Pipeline configuration.

use std::collections::HashMap;
use std::time::Duration;

use strata_core::config::ConfigError;

/// Tuning options for pipeline batch application.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Maximum changes fetched from a source per batch.
    pub max_changes_per_batch: usize,

    /// Concurrent commit workers per batch.
    ///
    /// Keys are partitioned across workers by hash, so all of one key's
    /// mutations run on a single worker and per-key ordering holds.
    pub commit_workers: usize,

    /// Optimistic replans after a commit conflict before a key gives up.
    pub max_commit_retries: u32,

    /// Whole-batch retries after a transient failure before the run
    /// fails. Each retry refetches from the last committed offset.
    pub max_batch_retries: u32,

    /// Delay between retry attempts.
    pub retry_backoff: Duration,

    /// Free-form operator parameters.
    ///
    /// The pipeline does not interpret these; they are logged at startup
    /// and readable through [`Pipeline::parameter`] so deployments can
    /// thread environment names, owners, or run labels through to
    /// operators.
    ///
    /// [`Pipeline::parameter`]: crate::pipeline::Pipeline::parameter
    pub parameters: HashMap<String, String>,
}

impl PipelineOptions {
    /// Rejects option combinations the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] naming the offending
    /// option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_changes_per_batch == 0 {
            return Err(ConfigError::InvalidOption {
                option: "max_changes_per_batch",
                message: "must be at least 1",
            });
        }
        if self.commit_workers == 0 {
            return Err(ConfigError::InvalidOption {
                option: "commit_workers",
                message: "must be at least 1",
            });
        }
        Ok(())
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_changes_per_batch: 1024,
            commit_workers: 4,
            max_commit_retries: 3,
            max_batch_retries: 3,
            retry_backoff: Duration::from_millis(50),
            parameters: HashMap::new(),
        }
    }
}

/// When the pipeline processes new changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Drain whatever each source has buffered, then stop.
    Triggered,
    /// Poll sources until shut down, sleeping between drains.
    Continuous {
        /// Delay before polling again once every table is caught up.
        poll_interval: Duration,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(PipelineOptions::default().validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let options = PipelineOptions {
            max_changes_per_batch: 0,
            ..PipelineOptions::default()
        };
        let err = options.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidOption {
                option: "max_changes_per_batch",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let options = PipelineOptions {
            commit_workers: 0,
            ..PipelineOptions::default()
        };
        assert!(options.validate().is_err());
    }
}
