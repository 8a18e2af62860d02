//! Per-object staged diff.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use crate::changelog::ChangeLogEntry;
use crate::object::ObjectRef;
use crate::types::{ObjectId, Principal, PropertyKey, Value};

/// What happened to an object during the transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Object was created in this transaction.
    Create,
    /// Object existed and had properties or relationships changed.
    Modify,
    /// Object was deleted explicitly.
    Delete,
    /// Object was deleted as a consequence of another deletion.
    PassivelyDeleted,
    /// Object's materialized state changed as a side effect only.
    Propagated,
}

impl Verb {
    /// Returns true for the terminal deletion verbs.
    pub fn is_deletion(self) -> bool {
        matches!(self, Verb::Delete | Verb::PassivelyDeleted)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verb::Create => "create",
            Verb::Modify => "modify",
            Verb::Delete => "delete",
            Verb::PassivelyDeleted => "passive-delete",
            Verb::Propagated => "propagated",
        };
        f.write_str(name)
    }
}

/// Net change of a single property.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyDiff {
    /// Value before the first write in this transaction; `None` if unset.
    pub previous: Option<Value>,
    /// Value after the last write in this transaction; `None` if removed.
    pub new: Option<Value>,
}

/// Scalar structural changes caused by well-known relationship kinds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StructuralChanges {
    /// Owner changed (`OWNS`).
    pub owner: bool,
    /// Access grants changed (`SECURITY`).
    pub security: bool,
    /// Location changed (`IS_AT`).
    pub location: bool,
}

impl StructuralChanges {
    /// Returns true if any structural flag is set.
    pub fn any(&self) -> bool {
        self.owner || self.security || self.location
    }
}

/// Read-side view of one record: `{before, after, added, removed}`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSummary {
    /// Removed properties plus the previous value of every modified key.
    pub before: BTreeMap<String, Value>,
    /// New properties plus the new value of every modified key.
    pub after: BTreeMap<String, Value>,
    /// Relationship references gained, per property name.
    pub added: BTreeMap<String, BTreeSet<ObjectId>>,
    /// Relationship references lost, per property name.
    pub removed: BTreeMap<String, BTreeSet<ObjectId>>,
}

/// Staged diff for one object within one transaction.
pub struct ChangeRecord {
    object: ObjectRef,
    id: ObjectId,
    uuid: String,
    verb: Verb,
    first_touch: u64,
    modified_properties: BTreeMap<PropertyKey, PropertyDiff>,
    new_properties: BTreeMap<PropertyKey, Value>,
    removed_properties: BTreeMap<PropertyKey, Value>,
    added_rel_refs: BTreeMap<PropertyKey, BTreeSet<ObjectId>>,
    removed_rel_refs: BTreeMap<PropertyKey, BTreeSet<ObjectId>>,
    structural: StructuralChanges,
    dirty: bool,
    callback_id: Option<String>,
    validation_micros: u64,
    indexing_micros: u64,
    change_log: String,
    user_change_logs: BTreeMap<String, String>,
}

impl fmt::Debug for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeRecord")
            .field("id", &self.id)
            .field("uuid", &self.uuid)
            .field("verb", &self.verb)
            .field("first_touch", &self.first_touch)
            .field("dirty", &self.dirty)
            .field("modified", &self.modified_properties.len())
            .field("added_refs", &self.added_rel_refs.len())
            .field("removed_refs", &self.removed_rel_refs.len())
            .finish_non_exhaustive()
    }
}

impl ChangeRecord {
    pub(crate) fn new(object: ObjectRef, first_touch: u64, verb: Verb) -> Self {
        let id = object.id();
        let uuid = object.uuid().to_owned();
        Self {
            object,
            id,
            uuid,
            verb,
            first_touch,
            modified_properties: BTreeMap::new(),
            new_properties: BTreeMap::new(),
            removed_properties: BTreeMap::new(),
            added_rel_refs: BTreeMap::new(),
            removed_rel_refs: BTreeMap::new(),
            structural: StructuralChanges::default(),
            dirty: true,
            callback_id: None,
            validation_micros: 0,
            indexing_micros: 0,
            change_log: String::new(),
            user_change_logs: BTreeMap::new(),
        }
    }

    /// Identity of the tracked object.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Uuid captured when the record was created; survives deletion.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Handle to the tracked object.
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// Current verb.
    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Logical time of the first touch; fixed for the record's lifetime.
    pub fn first_touch(&self) -> u64 {
        self.first_touch
    }

    /// Returns true if the record was written since its inner hook last ran.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns true if the object was deleted actively or passively.
    pub fn is_deleted(&self) -> bool {
        self.verb.is_deletion()
    }

    /// Correlation token registered for this object.
    pub fn callback_id(&self) -> Option<&str> {
        self.callback_id.as_deref()
    }

    /// Net property diffs keyed by property.
    pub fn modified_properties(&self) -> &BTreeMap<PropertyKey, PropertyDiff> {
        &self.modified_properties
    }

    /// Properties that had no value before this transaction.
    pub fn new_properties(&self) -> &BTreeMap<PropertyKey, Value> {
        &self.new_properties
    }

    /// Properties whose value was removed in this transaction.
    pub fn removed_properties(&self) -> &BTreeMap<PropertyKey, Value> {
        &self.removed_properties
    }

    /// Relationship references gained, per property.
    pub fn added_rel_refs(&self) -> &BTreeMap<PropertyKey, BTreeSet<ObjectId>> {
        &self.added_rel_refs
    }

    /// Relationship references lost, per property.
    pub fn removed_rel_refs(&self) -> &BTreeMap<PropertyKey, BTreeSet<ObjectId>> {
        &self.removed_rel_refs
    }

    /// Structural (owner/security/location) changes.
    pub fn structural(&self) -> StructuralChanges {
        self.structural
    }

    /// Time spent validating this object, in microseconds.
    pub fn validation_micros(&self) -> u64 {
        self.validation_micros
    }

    /// Time spent indexing this object, in microseconds.
    pub fn indexing_micros(&self) -> u64 {
        self.indexing_micros
    }

    /// Buffered object change-log lines not yet drained.
    pub fn change_log(&self) -> &str {
        &self.change_log
    }

    /// Buffered per-user change-log lines not yet drained.
    pub fn user_change_logs(&self) -> &BTreeMap<String, String> {
        &self.user_change_logs
    }

    /// Builds the `{before, after, added, removed}` view.
    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for (key, value) in &self.removed_properties {
            summary.before.insert(key.name().to_owned(), value.clone());
        }
        for (key, value) in &self.new_properties {
            summary.after.insert(key.name().to_owned(), value.clone());
        }
        for (key, diff) in &self.modified_properties {
            if let Some(previous) = &diff.previous {
                summary.before.insert(key.name().to_owned(), previous.clone());
            }
            if let Some(new) = &diff.new {
                summary.after.insert(key.name().to_owned(), new.clone());
            }
        }
        for (key, refs) in &self.added_rel_refs {
            summary.added.insert(key.name().to_owned(), refs.clone());
        }
        for (key, refs) in &self.removed_rel_refs {
            summary.removed.insert(key.name().to_owned(), refs.clone());
        }
        summary
    }

    pub(crate) fn create(&mut self) {
        if !self.verb.is_deletion() {
            self.verb = Verb::Create;
        }
        self.dirty = true;
    }

    pub(crate) fn delete(&mut self, passive: bool) {
        if !self.verb.is_deletion() {
            self.verb = if passive {
                Verb::PassivelyDeleted
            } else {
                Verb::Delete
            };
        }
        self.dirty = true;
    }

    pub(crate) fn propagated(&mut self) {
        self.dirty = true;
    }

    /// Merges a property write into the net diff: the first `previous`
    /// and the last `new` win.
    pub(crate) fn modify(&mut self, key: &PropertyKey, previous: Option<Value>, new: Option<Value>) {
        self.touch();
        let diff = self
            .modified_properties
            .entry(key.clone())
            .or_insert(PropertyDiff {
                previous,
                new: None,
            });
        diff.new = new;

        let (previous, new) = (diff.previous.clone(), diff.new.clone());
        self.new_properties.remove(key);
        self.removed_properties.remove(key);
        match (previous, new) {
            (None, Some(value)) => {
                self.new_properties.insert(key.clone(), value);
            }
            (Some(value), None) => {
                self.removed_properties.insert(key.clone(), value);
            }
            _ => {}
        }
    }

    /// Records a reference gained under `key`; cancels a pending removal.
    pub(crate) fn add_ref(&mut self, key: &PropertyKey, other: ObjectId) {
        self.touch();
        if !take_ref(&mut self.removed_rel_refs, key, other) {
            self.added_rel_refs
                .entry(key.clone())
                .or_default()
                .insert(other);
        }
    }

    /// Records a reference lost under `key`; cancels a pending addition.
    pub(crate) fn remove_ref(&mut self, key: &PropertyKey, other: ObjectId) {
        self.touch();
        if !take_ref(&mut self.added_rel_refs, key, other) {
            self.removed_rel_refs
                .entry(key.clone())
                .or_default()
                .insert(other);
        }
    }

    pub(crate) fn modify_owner(&mut self) {
        self.touch();
        self.structural.owner = true;
    }

    pub(crate) fn modify_security(&mut self) {
        self.touch();
        self.structural.security = true;
    }

    pub(crate) fn modify_location(&mut self) {
        self.touch();
        self.structural.location = true;
    }

    pub(crate) fn set_callback_id(&mut self, token: String) {
        self.callback_id = Some(token);
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn add_timings(&mut self, validation: Duration, indexing: Duration) {
        self.validation_micros = self
            .validation_micros
            .saturating_add(validation.as_micros() as u64);
        self.indexing_micros = self
            .indexing_micros
            .saturating_add(indexing.as_micros() as u64);
    }

    /// Appends an entry to the object log and, for a known user, to that
    /// user's log.
    pub(crate) fn push_log(&mut self, user: Option<&Principal>, entry: &ChangeLogEntry<'_>) {
        entry.write_object_line(user, &mut self.change_log);
        if let Some(user) = user {
            let buffer = self.user_change_logs.entry(user.id.clone()).or_default();
            entry.write_user_line(&self.uuid, buffer);
        }
    }

    pub(crate) fn take_change_logs(&mut self) -> (String, BTreeMap<String, String>) {
        (
            std::mem::take(&mut self.change_log),
            std::mem::take(&mut self.user_change_logs),
        )
    }

    fn touch(&mut self) {
        if self.verb == Verb::Propagated {
            self.verb = Verb::Modify;
        }
        self.dirty = true;
    }
}

fn take_ref(
    refs: &mut BTreeMap<PropertyKey, BTreeSet<ObjectId>>,
    key: &PropertyKey,
    other: ObjectId,
) -> bool {
    let Some(set) = refs.get_mut(key) else {
        return false;
    };
    let removed = set.remove(&other);
    if set.is_empty() {
        refs.remove(key);
    }
    removed
}
