//! Counters for queue activity and phase timings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::Phase;

/// Trait for tracking modification-queue activity and commit-phase timings.
///
/// Implementations collect statistics about staged records, phase durations
/// and change-log writes. This information can be used for monitoring,
/// profiling and spotting runaway hook cascades.
pub trait PipelineMetrics: Send + Sync {
    /// Records the creation of a new change record.
    fn record_created(&self);

    /// Records one fixpoint sweep of the inner-hook phase.
    ///
    /// # Parameters
    /// * `dirty` - Number of dirty records the sweep consumed.
    fn inner_sweep(&self, dirty: usize);

    /// Records the completion of a phase.
    ///
    /// # Parameters
    /// * `phase` - The phase that finished.
    /// * `elapsed` - Wall-clock time spent in the phase.
    /// * `ok` - Whether the phase succeeded.
    fn phase_finished(&self, phase: Phase, elapsed: Duration, ok: bool);

    /// Records a successful change-log append of `bytes` bytes.
    fn change_log_appended(&self, bytes: usize);

    /// Records a failed change-log append.
    fn change_log_failed(&self);
}

/// A no-op implementation of [`PipelineMetrics`] that discards all recorded metrics.
#[derive(Default)]
pub struct NoopMetrics;

impl PipelineMetrics for NoopMetrics {
    fn record_created(&self) {}
    fn inner_sweep(&self, _dirty: usize) {}
    fn phase_finished(&self, _phase: Phase, _elapsed: Duration, _ok: bool) {}
    fn change_log_appended(&self, _bytes: usize) {}
    fn change_log_failed(&self) {}
}

/// A thread-safe counter-based implementation of [`PipelineMetrics`].
///
/// All counters are atomics and can be read from other threads while a
/// transaction is committing.
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of change records created.
    pub records_created: AtomicU64,

    /// Number of inner-hook fixpoint sweeps run.
    pub inner_sweeps: AtomicU64,

    /// Number of inner hooks invoked across all sweeps.
    pub inner_hooks: AtomicU64,

    /// Number of phases that finished successfully.
    pub phases_ok: AtomicU64,

    /// Number of phases that failed.
    pub phases_failed: AtomicU64,

    /// Total microseconds spent in validation and indexing.
    pub validation_micros: AtomicU64,

    /// Number of change-log appends written.
    pub change_log_appends: AtomicU64,

    /// Number of change-log bytes written.
    pub change_log_bytes: AtomicU64,

    /// Number of change-log appends that failed.
    pub change_log_failures: AtomicU64,
}

impl PipelineMetrics for CounterMetrics {
    fn record_created(&self) {
        self.records_created.fetch_add(1, Ordering::Relaxed);
    }

    fn inner_sweep(&self, dirty: usize) {
        self.inner_sweeps.fetch_add(1, Ordering::Relaxed);
        self.inner_hooks.fetch_add(dirty as u64, Ordering::Relaxed);
    }

    fn phase_finished(&self, phase: Phase, elapsed: Duration, ok: bool) {
        if ok {
            self.phases_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.phases_failed.fetch_add(1, Ordering::Relaxed);
        }
        if phase == Phase::Validation {
            self.validation_micros
                .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        }
    }

    fn change_log_appended(&self, bytes: usize) {
        self.change_log_appends.fetch_add(1, Ordering::Relaxed);
        self.change_log_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn change_log_failed(&self) {
        self.change_log_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
///
/// The default implementation is [`NoopMetrics`], which has zero overhead
/// as it discards all recorded metrics.
pub fn default_metrics() -> Arc<dyn PipelineMetrics> {
    Arc::new(NoopMetrics)
}
