//! The five commit phases, each visiting records ascending by first touch.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use super::{sorted_ids, ModificationQueue};
use crate::changelog::{drain, group_writes, LogKind};
use crate::error::{ChangeError, ErrorBuffer, Result};
use crate::object::InnerContext;
use crate::pipeline::Phase;
use crate::record::Verb;
use crate::types::Principal;

impl ModificationQueue {
    /// Phase 1: runs inner hooks until no record is dirty.
    ///
    /// Each sweep takes a fresh ordered snapshot, so records created by a
    /// hook are picked up in a later sweep. A record's dirty flag is cleared
    /// after its hook returns; writes the hook makes to its own object do not
    /// re-trigger it.
    pub fn do_inner_callbacks(
        &mut self,
        user: Option<&Principal>,
        errors: &mut ErrorBuffer,
    ) -> Result<()> {
        let started = Instant::now();
        let result = self.run_inner_callbacks(user, errors);
        self.finish_phase(Phase::InnerCallbacks, started, result.is_ok());
        result
    }

    fn run_inner_callbacks(
        &mut self,
        user: Option<&Principal>,
        errors: &mut ErrorBuffer,
    ) -> Result<()> {
        let mut sweeps = 0usize;
        loop {
            let mut visited = 0usize;
            for id in self.sorted_ids() {
                let pending = self.inspect(id, |record| {
                    record.is_dirty().then(|| {
                        (
                            Arc::clone(record.object()),
                            record.verb(),
                            record.callback_id().map(str::to_owned),
                        )
                    })
                });
                let Some((object, verb, callback_id)) = pending.flatten() else {
                    continue;
                };
                if sweeps >= self.options.max_fixpoint_sweeps {
                    warn!(object = %id, sweeps, "inner hooks did not converge");
                    return Err(ChangeError::hook(
                        id,
                        Phase::InnerCallbacks,
                        format!("cascade did not converge after {sweeps} sweeps"),
                    ));
                }
                visited += 1;

                let mark = errors.len();
                let mut ctx = InnerContext {
                    principal: user,
                    verb,
                    callback_id: callback_id.as_deref(),
                    errors: &mut *errors,
                };
                object.on_inner_callback(self, &mut ctx)?;
                if errors.len() > mark {
                    return Err(ChangeError::hook(
                        id,
                        Phase::InnerCallbacks,
                        errors.since(mark).to_string(),
                    ));
                }
                if let Some(record) = self.records.write().get_mut(&id) {
                    record.clear_dirty();
                }
            }
            if visited == 0 {
                break;
            }
            sweeps += 1;
            self.options.metrics.inner_sweep(visited);
            trace!(sweep = sweeps, visited, "inner hook sweep finished");
        }
        debug!(sweeps, records = self.len(), "inner hooks converged");
        Ok(())
    }

    /// Phase 2: validates and indexes every touched object.
    ///
    /// Stale objects are skipped. Created and modified objects are validated
    /// when `validate` is set; every processed object is indexed. The first
    /// failure aborts the phase.
    pub fn do_validation(
        &mut self,
        user: Option<&Principal>,
        errors: &mut ErrorBuffer,
        validate: bool,
    ) -> Result<()> {
        let started = Instant::now();
        let result = self.run_validation(user, errors, validate);
        self.finish_phase(Phase::Validation, started, result.is_ok());
        result
    }

    fn run_validation(
        &mut self,
        user: Option<&Principal>,
        errors: &mut ErrorBuffer,
        validate: bool,
    ) -> Result<()> {
        for id in self.sorted_ids() {
            let records = self.records.read();
            let Some(record) = records.get(&id) else {
                continue;
            };
            let object = Arc::clone(record.object());
            if object.is_stale() {
                trace!(object = %id, "skipping stale object");
                continue;
            }

            let mark = errors.len();
            let validation_start = Instant::now();
            let valid = !validate
                || !matches!(record.verb(), Verb::Create | Verb::Modify)
                || object.validate(record, errors);
            let validation_time = validation_start.elapsed();
            if !valid {
                debug!(object = %id, user = user.map(|u| u.id.as_str()), "validation rejected");
                return Err(ChangeError::Validation {
                    object: id,
                    tokens: errors.since(mark),
                });
            }

            let indexing_start = Instant::now();
            object.index(record)?;
            let indexing_time = indexing_start.elapsed();
            drop(records);

            if let Some(record) = self.records.write().get_mut(&id) {
                record.add_timings(validation_time, indexing_time);
            }
        }
        Ok(())
    }

    /// Phase 3: runs each registered post-process action once, in
    /// registration order.
    pub fn do_post_processing(
        &mut self,
        user: Option<&Principal>,
        errors: &mut ErrorBuffer,
    ) -> Result<()> {
        let started = Instant::now();
        let actions = std::mem::take(&mut self.post_processes);
        let mut result = Ok(());
        for (key, action) in actions {
            let mark = errors.len();
            let outcome = action.execute(user, errors);
            let failure = match outcome {
                Err(ChangeError::PostProcess { key, message }) => {
                    Some(ChangeError::PostProcess { key, message })
                }
                Err(err) => Some(ChangeError::PostProcess {
                    key: key.clone(),
                    message: err.to_string(),
                }),
                Ok(()) if errors.len() > mark => Some(ChangeError::PostProcess {
                    key: key.clone(),
                    message: errors.since(mark).to_string(),
                }),
                Ok(()) => None,
            };
            if let Some(err) = failure {
                debug!(key = %key, error = %err, "post-process action failed");
                result = Err(err);
                break;
            }
            trace!(key = %key, "post-process action finished");
        }
        self.finish_phase(Phase::PostProcessing, started, result.is_ok());
        result
    }

    /// Phase 4: runs every outer hook. Failures are logged and returned as
    /// warnings; they never stop the remaining hooks.
    pub fn do_outer_callbacks(&mut self, user: Option<&Principal>) -> Vec<ChangeError> {
        let started = Instant::now();
        let mut warnings = Vec::new();
        for id in self.sorted_ids() {
            let records = self.records.read();
            let Some(record) = records.get(&id) else {
                continue;
            };
            if let Err(err) = record.object().on_outer_callback(record, user) {
                warn!(object = %id, error = %err, "outer hook failed");
                warnings.push(ChangeError::hook(
                    id,
                    Phase::OuterCallbacks,
                    err.to_string(),
                ));
            }
        }
        self.finish_phase(Phase::OuterCallbacks, started, warnings.is_empty());
        warnings
    }

    /// Phase 5: drains buffered audit lines to the change-log sink and
    /// returns the number of successful appends.
    ///
    /// Append failures are logged and counted, never returned.
    pub fn update_change_log(&mut self) -> usize {
        if !self.change_log_enabled || !self.options.any_audit() {
            return 0;
        }
        let started = Instant::now();
        let mut object_logs = Vec::new();
        let mut user_logs = Vec::new();
        {
            let mut records = self.records.write();
            for id in sorted_ids(&records) {
                let Some(record) = records.get_mut(&id) else {
                    continue;
                };
                let (log, users) = record.take_change_logs();
                if self.options.audit_enabled {
                    object_logs.push((LogKind::from(id.kind), record.uuid().to_owned(), log));
                }
                if self.options.user_audit_enabled {
                    user_logs.extend(users);
                }
            }
        }
        let writes = group_writes(object_logs, user_logs);
        let written = drain(
            writes,
            self.options.change_log.as_ref(),
            self.options.metrics.as_ref(),
            self.options.worker_pool.as_ref(),
        );
        self.finish_phase(Phase::ChangeLog, started, true);
        written
    }

    fn finish_phase(&self, phase: Phase, started: Instant, ok: bool) {
        let elapsed = started.elapsed();
        self.options.metrics.phase_finished(phase, elapsed, ok);
        if elapsed > self.options.slow_phase_threshold {
            info!(
                phase = %phase,
                elapsed_ms = elapsed.as_millis() as u64,
                records = self.len(),
                "slow commit phase"
            );
        } else {
            trace!(phase = %phase, elapsed_us = elapsed.as_micros() as u64, ok, "phase finished");
        }
    }
}
