//! Drives the commit phases around the storage transaction.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::error::{ChangeError, ErrorBuffer, Result};
use crate::queue::{ModificationQueue, RecordSnapshot};
use crate::types::Principal;

/// Commit phases in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Inner hooks, run to a fixpoint.
    InnerCallbacks,
    /// Validation and indexing.
    Validation,
    /// Registered post-process actions.
    PostProcessing,
    /// Outer hooks, after the storage commit.
    OuterCallbacks,
    /// Change-log drain.
    ChangeLog,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::InnerCallbacks => "inner-callbacks",
            Phase::Validation => "validation",
            Phase::PostProcessing => "post-processing",
            Phase::OuterCallbacks => "outer-callbacks",
            Phase::ChangeLog => "change-log",
        };
        f.write_str(name)
    }
}

/// Deferred action registered on the queue and run once in Phase 3.
pub trait PostProcess: Send {
    /// Runs the action; adding tokens to `errors` fails it like an `Err`.
    fn execute(&self, principal: Option<&Principal>, errors: &mut ErrorBuffer) -> Result<()>;
}

impl<F> PostProcess for F
where
    F: Fn(Option<&Principal>, &mut ErrorBuffer) -> Result<()> + Send,
{
    fn execute(&self, principal: Option<&Principal>, errors: &mut ErrorBuffer) -> Result<()> {
        self(principal, errors)
    }
}

/// The storage engine's side of one transaction.
pub trait StorageTransaction {
    /// Makes the staged writes durable.
    fn commit(&mut self) -> Result<()>;

    /// Discards the staged writes.
    fn rollback(&mut self) -> Result<()>;
}

/// Outcome of a successful commit.
#[derive(Debug, Default)]
pub struct CommitReport {
    /// Every record as it stood when the storage commit succeeded.
    pub records: Vec<RecordSnapshot>,
    /// Synchronization keys collected during the transaction.
    pub synchronization_keys: BTreeSet<String>,
    /// Outer-hook failures; the commit stands regardless.
    pub warnings: Vec<ChangeError>,
    /// Number of change-log appends written.
    pub change_logs_written: usize,
    /// Wall-clock time per phase, in execution order.
    pub timings: Vec<(Phase, Duration)>,
}

/// Runs the five phases of a queue in strict order.
#[derive(Clone, Copy, Debug)]
pub struct CommitPipeline {
    validate: bool,
}

impl Default for CommitPipeline {
    fn default() -> Self {
        Self { validate: true }
    }
}

impl CommitPipeline {
    /// Pipeline with validation enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables business-rule validation; indexing still runs.
    pub fn skip_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    /// Commits the transaction recorded in `queue`.
    ///
    /// A failure in phases 1 to 3 rolls `storage` back and returns the
    /// error. After a successful storage commit, outer-hook failures are
    /// reported in [`CommitReport::warnings`] and never undo the commit.
    /// The queue is cleared in every case.
    pub fn commit(
        &self,
        queue: &mut ModificationQueue,
        user: Option<&Principal>,
        storage: &mut dyn StorageTransaction,
    ) -> Result<CommitReport> {
        let mut report = CommitReport::default();
        let mut errors = ErrorBuffer::new();

        if let Err(err) = self.prepare(queue, user, &mut errors, &mut report.timings) {
            debug!(error = %err, "commit aborted before storage commit");
            Self::rollback(queue, storage);
            return Err(err);
        }

        report.records = queue.records();
        report.synchronization_keys = queue.synchronization_keys().clone();
        if let Err(err) = storage.commit() {
            error!(error = %err, "storage commit failed");
            queue.clear();
            return Err(err);
        }

        let started = Instant::now();
        report.warnings = queue.do_outer_callbacks(user);
        report.timings.push((Phase::OuterCallbacks, started.elapsed()));

        let started = Instant::now();
        report.change_logs_written = queue.update_change_log();
        report.timings.push((Phase::ChangeLog, started.elapsed()));

        queue.clear();
        debug!(
            records = report.records.len(),
            warnings = report.warnings.len(),
            "transaction committed"
        );
        Ok(report)
    }

    /// Rolls `storage` back and discards everything staged in `queue`.
    pub fn rollback(queue: &mut ModificationQueue, storage: &mut dyn StorageTransaction) {
        if let Err(err) = storage.rollback() {
            warn!(error = %err, "storage rollback failed");
        }
        queue.clear();
    }

    fn prepare(
        &self,
        queue: &mut ModificationQueue,
        user: Option<&Principal>,
        errors: &mut ErrorBuffer,
        timings: &mut Vec<(Phase, Duration)>,
    ) -> Result<()> {
        let started = Instant::now();
        queue.do_inner_callbacks(user, errors)?;
        timings.push((Phase::InnerCallbacks, started.elapsed()));

        let started = Instant::now();
        queue.do_validation(user, errors, self.validate)?;
        timings.push((Phase::Validation, started.elapsed()));

        let started = Instant::now();
        queue.do_post_processing(user, errors)?;
        timings.push((Phase::PostProcessing, started.elapsed()));
        Ok(())
    }
}
