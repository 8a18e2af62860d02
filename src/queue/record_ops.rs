use tracing::trace;

use super::ModificationQueue;
use crate::changelog::{ChangeLogEntry, Direction, LogVerb};
use crate::error::{ErrorBuffer, Result};
use crate::object::ObjectRef;
use crate::pipeline::PostProcess;
use crate::record::Verb;
use crate::types::{Principal, PropertyKey, RelType, Value};

impl ModificationQueue {
    /// Records the creation of `obj`.
    pub fn create(&mut self, user: Option<&Principal>, obj: &ObjectRef) {
        let audit = self.options.any_audit();
        self.with_record(obj, Verb::Create, |record| {
            record.create();
            if audit {
                record.push_log(user, &ChangeLogEntry::new(LogVerb::Create).target(obj.uuid()));
            }
        });
    }

    /// Records a property write on `obj`.
    ///
    /// Repeated writes to the same key collapse into one net diff that keeps
    /// the first `previous` and the last `new`.
    pub fn modify(
        &mut self,
        user: Option<&Principal>,
        obj: &ObjectRef,
        key: &PropertyKey,
        previous: Option<Value>,
        new: Option<Value>,
    ) {
        let audit = self.options.any_audit();
        self.write_property(user, obj, key, previous, new, audit);
    }

    /// Records the deletion of `obj`; `passive` marks cascade deletions.
    pub fn delete(&mut self, user: Option<&Principal>, obj: &ObjectRef, passive: bool) {
        let audit = self.options.any_audit();
        self.with_record(obj, Verb::Modify, |record| {
            record.delete(passive);
            if audit {
                record.push_log(user, &ChangeLogEntry::new(LogVerb::Delete).target(obj.uuid()));
            }
        });
    }

    /// Records the creation of relationship `rel` and folds it into both
    /// endpoints.
    pub fn create_relationship(&mut self, user: Option<&Principal>, rel: &ObjectRef) {
        self.with_record(rel, Verb::Create, |record| record.create());
        let (Some(source), Some(target)) = (rel.source_node(), rel.target_node()) else {
            trace!(rel = %rel.id(), "relationship endpoints not resolvable");
            return;
        };
        self.fold_relationship(user, rel, &source, &target, false);
        if self.options.any_audit() {
            self.log_relationship(user, rel, &source, &target, false);
        }
    }

    /// Records the deletion of relationship `rel` and folds it into both
    /// endpoints.
    pub fn delete_relationship(&mut self, user: Option<&Principal>, rel: &ObjectRef, passive: bool) {
        self.with_record(rel, Verb::Modify, |record| record.delete(passive));
        let (Some(source), Some(target)) = (rel.source_node(), rel.target_node()) else {
            trace!(rel = %rel.id(), "relationship endpoints not resolvable");
            return;
        };
        self.fold_relationship(user, rel, &source, &target, true);
        if self.options.any_audit() {
            self.log_relationship(user, rel, &source, &target, true);
        }
    }

    /// Marks `obj` as changed by propagation only.
    ///
    /// Creates a `Propagated` record if the object is untouched and was never
    /// propagated before. The identity is remembered before the record is
    /// created; callers recurse into neighbours only when this returns true,
    /// which bounds cascades through cyclic graphs.
    pub fn mark_propagated(&mut self, obj: &ObjectRef) -> bool {
        let id = obj.id();
        let fresh = self.already_propagated.insert(id);
        if !fresh || self.contains(id) {
            return false;
        }
        self.with_record(obj, Verb::Propagated, |record| record.propagated());
        true
    }

    /// Flags an owner change on `obj`.
    pub fn modify_owner(&mut self, obj: &ObjectRef) {
        self.with_record(obj, Verb::Modify, |record| record.modify_owner());
    }

    /// Flags an access-grant change on `obj`.
    pub fn modify_security(&mut self, obj: &ObjectRef) {
        self.with_record(obj, Verb::Modify, |record| record.modify_security());
    }

    /// Flags a location change on `obj`.
    pub fn modify_location(&mut self, obj: &ObjectRef) {
        self.with_record(obj, Verb::Modify, |record| record.modify_location());
    }

    /// Attaches a correlation token to `obj`, touching it if needed.
    pub fn register_callback(&mut self, obj: &ObjectRef, token: impl Into<String>) {
        let token = token.into();
        self.with_record(obj, Verb::Modify, |record| record.set_callback_id(token));
    }

    /// Registers a post-process action under `key`.
    ///
    /// The first registration per key wins; returns false for duplicates.
    pub fn post_process<F>(&mut self, key: impl Into<String>, action: F) -> bool
    where
        F: Fn(Option<&Principal>, &mut ErrorBuffer) -> Result<()> + Send + 'static,
    {
        self.post_process_boxed(key, Box::new(action))
    }

    /// Boxed form of [`post_process`](Self::post_process) for named actions.
    pub fn post_process_boxed(&mut self, key: impl Into<String>, action: Box<dyn PostProcess>) -> bool {
        let key = key.into();
        if !self.post_process_keys.insert(key.clone()) {
            trace!(key = %key, "post-process action already registered");
            return false;
        }
        self.post_processes.push((key, action));
        true
    }

    pub(crate) fn write_property(
        &mut self,
        user: Option<&Principal>,
        obj: &ObjectRef,
        key: &PropertyKey,
        previous: Option<Value>,
        new: Option<Value>,
        audit: bool,
    ) {
        self.with_record(obj, Verb::Modify, |record| {
            if audit {
                let entry = ChangeLogEntry::new(LogVerb::Change).change(
                    key.name(),
                    previous.as_ref(),
                    new.as_ref(),
                );
                record.push_log(user, &entry);
            }
            record.modify(key, previous, new);
        });
        if let Some(sync_key) = key.sync_key() {
            if !self.synchronization_keys.contains(sync_key) {
                self.synchronization_keys.insert(sync_key.to_owned());
            }
        }
    }

    fn log_relationship(
        &mut self,
        user: Option<&Principal>,
        rel: &ObjectRef,
        source: &ObjectRef,
        target: &ObjectRef,
        deletion: bool,
    ) {
        let rel_type = rel.rel_type().map(RelType::as_str).unwrap_or_default();
        let (verb, link) = if deletion {
            (LogVerb::Delete, LogVerb::Unlink)
        } else {
            (LogVerb::Create, LogVerb::Link)
        };
        self.with_record(rel, Verb::Modify, |record| {
            let entry = ChangeLogEntry::new(verb)
                .relationship(rel_type, rel.uuid())
                .source(source.uuid())
                .target(target.uuid());
            record.push_log(user, &entry);
        });
        self.with_record(source, Verb::Modify, |record| {
            let entry = ChangeLogEntry::new(link)
                .relationship(rel_type, rel.uuid())
                .target(target.uuid())
                .direction(Direction::Out);
            record.push_log(user, &entry);
        });
        self.with_record(target, Verb::Modify, |record| {
            let entry = ChangeLogEntry::new(link)
                .relationship(rel_type, rel.uuid())
                .target(source.uuid())
                .direction(Direction::In);
            record.push_log(user, &entry);
        });
    }
}
