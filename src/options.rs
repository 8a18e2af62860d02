//! Per-queue settings.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::changelog::{ChangeLogSink, MemoryChangeLog};
use crate::metrics::{default_metrics, PipelineMetrics};

/// Default cap on inner-hook fixpoint sweeps.
pub const DEFAULT_MAX_FIXPOINT_SWEEPS: usize = 10_000;

/// Configuration supplied when creating a [`super::ModificationQueue`].
#[derive(Clone)]
pub struct QueueOptions {
    /// Whether per-object change logs are written.
    pub audit_enabled: bool,
    /// Whether per-user change logs are written.
    pub user_audit_enabled: bool,
    /// Destination for drained change logs.
    pub change_log: Arc<dyn ChangeLogSink>,
    /// Metrics collection implementation.
    pub metrics: Arc<dyn PipelineMetrics>,
    /// Worker pool used to fan out change-log writes; `None` writes inline.
    pub worker_pool: Option<Arc<rayon::ThreadPool>>,
    /// Phases slower than this are logged at `info`.
    pub slow_phase_threshold: Duration,
    /// Upper bound on inner-hook sweeps before the cascade is declared divergent.
    pub max_fixpoint_sweeps: usize,
}

impl fmt::Debug for QueueOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueOptions")
            .field("audit_enabled", &self.audit_enabled)
            .field("user_audit_enabled", &self.user_audit_enabled)
            .field("worker_pool", &self.worker_pool.is_some())
            .field("slow_phase_threshold", &self.slow_phase_threshold)
            .field("max_fixpoint_sweeps", &self.max_fixpoint_sweeps)
            .finish_non_exhaustive()
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            audit_enabled: false,
            user_audit_enabled: false,
            change_log: Arc::new(MemoryChangeLog::new()),
            metrics: default_metrics(),
            worker_pool: None,
            slow_phase_threshold: Duration::from_secs(1),
            max_fixpoint_sweeps: DEFAULT_MAX_FIXPOINT_SWEEPS,
        }
    }
}

impl QueueOptions {
    /// Creates options with auditing disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables per-object change logs.
    pub fn audit(mut self, enabled: bool) -> Self {
        self.audit_enabled = enabled;
        self
    }

    /// Enables or disables per-user change logs.
    pub fn user_audit(mut self, enabled: bool) -> Self {
        self.user_audit_enabled = enabled;
        self
    }

    /// Sets the change-log destination.
    pub fn change_log(mut self, sink: Arc<dyn ChangeLogSink>) -> Self {
        self.change_log = sink;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Injects the worker pool used for change-log writes.
    pub fn worker_pool(mut self, pool: Arc<rayon::ThreadPool>) -> Self {
        self.worker_pool = Some(pool);
        self
    }

    /// Sets the slow-phase logging threshold.
    pub fn slow_phase_threshold(mut self, threshold: Duration) -> Self {
        self.slow_phase_threshold = threshold;
        self
    }

    /// Sets the inner-hook sweep cap.
    pub fn max_fixpoint_sweeps(mut self, sweeps: usize) -> Self {
        self.max_fixpoint_sweeps = sweeps.max(1);
        self
    }

    /// Returns true if any change log is written.
    pub fn any_audit(&self) -> bool {
        self.audit_enabled || self.user_audit_enabled
    }
}
