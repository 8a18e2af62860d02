//! File-based configuration for the change queue.
//!
//! ```toml
//! [changelog]
//! enabled = true
//! user_enabled = true
//! directory = "/var/lib/sombra/changelog"
//!
//! [pipeline]
//! slow_phase_ms = 1000
//! max_fixpoint_sweeps = 10000
//! worker_threads = 4
//! ```
//!
//! Build [`QueueOptions`] once per service and clone them into each queue;
//! the worker pool they carry is shared by every clone.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::changelog::FsChangeLog;
use crate::options::{QueueOptions, DEFAULT_MAX_FIXPOINT_SWEEPS};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config file path, or `<inline>` for string input.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
    /// Auditing is enabled but no directory is configured.
    #[error("change log enabled but no directory configured")]
    MissingDirectory,
    /// The worker pool could not be started.
    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

/// Parsed configuration file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ChangeQueueConfig {
    /// `[changelog]` table.
    pub changelog: ChangeLogSection,
    /// `[pipeline]` table.
    pub pipeline: PipelineSection,
}

/// `[changelog]` table.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ChangeLogSection {
    /// Per-object change logs.
    pub enabled: bool,
    /// Per-user change logs.
    pub user_enabled: bool,
    /// Root directory of the file-system change log.
    pub directory: Option<PathBuf>,
}

/// `[pipeline]` table.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    /// Slow-phase logging threshold in milliseconds.
    pub slow_phase_ms: u64,
    /// Inner-hook sweep cap.
    pub max_fixpoint_sweeps: usize,
    /// Change-log writer threads; `0` writes inline on the committing thread.
    pub worker_threads: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            slow_phase_ms: 1000,
            max_fixpoint_sweeps: DEFAULT_MAX_FIXPOINT_SWEEPS,
            worker_threads: 0,
        }
    }
}

impl ChangeQueueConfig {
    /// Loads configuration from `path`; a missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "config file missing, using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses configuration from a TOML string.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    /// Builds queue options, opening the file-system sink and worker pool.
    pub fn to_options(&self) -> Result<QueueOptions, ConfigError> {
        let mut options = QueueOptions::new()
            .audit(self.changelog.enabled)
            .user_audit(self.changelog.user_enabled)
            .slow_phase_threshold(Duration::from_millis(self.pipeline.slow_phase_ms))
            .max_fixpoint_sweeps(self.pipeline.max_fixpoint_sweeps);
        match &self.changelog.directory {
            Some(dir) => {
                options = options.change_log(Arc::new(FsChangeLog::new(dir)));
            }
            None if options.any_audit() => return Err(ConfigError::MissingDirectory),
            None => {}
        }
        if self.pipeline.worker_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.pipeline.worker_threads)
                .thread_name(|i| format!("changelog-{i}"))
                .build()
                .map_err(|e| ConfigError::WorkerPool(e.to_string()))?;
            options = options.worker_pool(Arc::new(pool));
        }
        Ok(options)
    }
}
