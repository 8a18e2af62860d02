//! Per-transaction owner of all change records and the commit phases.
//!
//! Mutating code records every create, modify and delete here instead of
//! notifying listeners directly. At commit time the queue drives the phases
//! in [`phases`] in strict order, always visiting records ascending by the
//! logical time of their first touch.
//!
//! The record map lives behind an `Arc<RwLock<..>>` so that a
//! [`QueueObserver`] can inspect it from another thread; all writes go
//! through `&mut ModificationQueue` on the owning thread. The lock is never
//! held while a hook that receives the queue is running.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::object::ObjectRef;
use crate::options::QueueOptions;
use crate::pipeline::PostProcess;
use crate::record::{ChangeRecord, ChangeSummary, Verb};
use crate::registry::{EmptyRegistry, TypeRegistry};
use crate::types::{ObjectId, PropertyKey};

mod observer;
mod phases;
mod record_ops;
mod resolver;

pub use observer::{QueueObserver, RecordSnapshot};

pub(crate) type RecordMap = FxHashMap<ObjectId, ChangeRecord>;

/// Stages every change of one transaction and runs the commit phases.
pub struct ModificationQueue {
    records: Arc<RwLock<RecordMap>>,
    already_propagated: FxHashSet<ObjectId>,
    synchronization_keys: BTreeSet<String>,
    post_processes: Vec<(String, Box<dyn PostProcess>)>,
    post_process_keys: FxHashSet<String>,
    registry: Arc<dyn TypeRegistry>,
    options: QueueOptions,
    change_log_enabled: bool,
    next_tick: u64,
}

impl fmt::Debug for ModificationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModificationQueue")
            .field("records", &self.len())
            .field("already_propagated", &self.already_propagated.len())
            .field("synchronization_keys", &self.synchronization_keys)
            .field("post_processes", &self.post_processes.len())
            .field("change_log_enabled", &self.change_log_enabled)
            .finish_non_exhaustive()
    }
}

impl Default for ModificationQueue {
    fn default() -> Self {
        Self::new(QueueOptions::default(), Arc::new(EmptyRegistry))
    }
}

impl ModificationQueue {
    /// Creates an empty queue for one transaction.
    pub fn new(options: QueueOptions, registry: Arc<dyn TypeRegistry>) -> Self {
        Self {
            records: Arc::new(RwLock::new(FxHashMap::default())),
            already_propagated: FxHashSet::default(),
            synchronization_keys: BTreeSet::new(),
            post_processes: Vec::new(),
            post_process_keys: FxHashSet::default(),
            registry,
            options,
            change_log_enabled: true,
            next_tick: 0,
        }
    }

    /// Options the queue was created with.
    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Number of change records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing has been touched.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns true if a record exists for `id`.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.records.read().contains_key(&id)
    }

    /// Synchronization keys of every synchronized property written so far.
    pub fn synchronization_keys(&self) -> &BTreeSet<String> {
        &self.synchronization_keys
    }

    /// Returns true if `id` has been marked as propagated.
    pub fn is_propagated(&self, id: ObjectId) -> bool {
        self.already_propagated.contains(&id)
    }

    /// Skips change-log emission for this queue regardless of configuration.
    pub fn disable_change_log(&mut self) {
        self.change_log_enabled = false;
    }

    /// Read-only handle that can be shared with other threads.
    pub fn observer(&self) -> QueueObserver {
        QueueObserver::new(Arc::clone(&self.records))
    }

    /// Snapshots of all records in first-touch order.
    pub fn records(&self) -> Vec<RecordSnapshot> {
        observer::snapshot(&self.records.read())
    }

    /// Runs `f` against the record of `id`, if present.
    pub fn inspect<R>(&self, id: ObjectId, f: impl FnOnce(&ChangeRecord) -> R) -> Option<R> {
        self.records.read().get(&id).map(f)
    }

    /// Returns true if `id` was deleted, actively or passively.
    pub fn is_deleted(&self, id: ObjectId) -> bool {
        self.records
            .read()
            .get(&id)
            .is_some_and(ChangeRecord::is_deleted)
    }

    /// Returns true if `key` appears in the modified properties of `id`.
    ///
    /// Only regular properties count; structural changes (owner, security,
    /// location) are not properties.
    pub fn is_property_modified(&self, id: ObjectId, key: &PropertyKey) -> bool {
        self.records.read().get(&id).is_some_and(|record| {
            record
                .modified_properties()
                .keys()
                .any(|k| k.name() == key.name())
        })
    }

    /// All modified property keys across every record.
    pub fn modified_keys(&self) -> BTreeSet<PropertyKey> {
        let records = self.records.read();
        let mut keys = BTreeSet::new();
        for id in sorted_ids(&records) {
            if let Some(record) = records.get(&id) {
                keys.extend(record.modified_properties().keys().cloned());
            }
        }
        keys
    }

    /// `{before, after, added, removed}` of `id`, or `None` if untouched.
    pub fn change_summary(&self, id: ObjectId) -> Option<ChangeSummary> {
        self.records.read().get(&id).map(ChangeRecord::summary)
    }

    /// Drops every record, the propagation set, pending post-process
    /// actions and all buffered change-log lines.
    pub fn clear(&mut self) {
        self.records.write().clear();
        self.already_propagated.clear();
        self.synchronization_keys.clear();
        self.post_processes.clear();
        self.post_process_keys.clear();
    }

    /// Looks up or lazily creates the record of `obj`, then applies `f`.
    ///
    /// A fresh record gets `initial` as its verb and the next logical tick
    /// as its first-touch time.
    pub(crate) fn with_record<R>(
        &mut self,
        obj: &ObjectRef,
        initial: Verb,
        f: impl FnOnce(&mut ChangeRecord) -> R,
    ) -> R {
        let id = obj.id();
        let tick = self.next_tick;
        let mut created = false;
        let mut records = self.records.write();
        let record = records.entry(id).or_insert_with(|| {
            created = true;
            ChangeRecord::new(Arc::clone(obj), tick, initial)
        });
        if created {
            self.next_tick += 1;
            self.options.metrics.record_created();
            trace!(object = %id, tick, verb = %initial, "change record created");
        }
        f(record)
    }

    pub(crate) fn sorted_ids(&self) -> Vec<ObjectId> {
        sorted_ids(&self.records.read())
    }
}

/// Identities ascending by first touch.
pub(crate) fn sorted_ids(records: &RecordMap) -> Vec<ObjectId> {
    let mut ids: Vec<(u64, ObjectId)> = records
        .values()
        .map(|record| (record.first_touch(), record.id()))
        .collect();
    ids.sort_unstable();
    ids.into_iter().map(|(_, id)| id).collect()
}
