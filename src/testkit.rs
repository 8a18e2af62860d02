//! Scriptable graph objects and storage doubles for exercising the queue.
//!
//! Used by this crate's own tests and handy for embedders writing tests
//! against their hook implementations.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{ChangeError, ErrorBuffer, ErrorToken, Result};
use crate::object::{GraphObject, InnerContext, ObjectRef};
use crate::pipeline::{Phase, StorageTransaction};
use crate::queue::ModificationQueue;
use crate::record::ChangeRecord;
use crate::types::{ObjectId, Principal, RelType};

/// Inner hook installed on a [`TestObject`]; receives the object itself.
pub type InnerHook =
    dyn Fn(&ObjectRef, &mut ModificationQueue, &mut InnerContext<'_>) -> Result<()> + Send + Sync;

/// Hook invocations recorded by a [`Journal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Inner hook ran.
    Inner,
    /// Validation ran.
    Validate,
    /// Indexing ran.
    Index,
    /// Outer hook ran.
    Outer,
}

/// Shared, ordered log of hook invocations.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    events: Arc<Mutex<Vec<(HookEvent, ObjectId)>>>,
}

impl Journal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one invocation.
    pub fn record(&self, event: HookEvent, id: ObjectId) {
        self.events.lock().push((event, id));
    }

    /// Every invocation so far, oldest first.
    pub fn events(&self) -> Vec<(HookEvent, ObjectId)> {
        self.events.lock().clone()
    }

    /// Objects that saw `event`, in invocation order.
    pub fn order(&self, event: HookEvent) -> Vec<ObjectId> {
        self.events
            .lock()
            .iter()
            .filter(|(e, _)| *e == event)
            .map(|(_, id)| *id)
            .collect()
    }

    /// How often `event` fired for `id`.
    pub fn count(&self, event: HookEvent, id: ObjectId) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(e, i)| *e == event && *i == id)
            .count()
    }
}

/// Configurable [`GraphObject`] double.
pub struct TestObject {
    id: ObjectId,
    uuid: String,
    rel_type: Option<RelType>,
    source: Option<ObjectRef>,
    target: Option<ObjectRef>,
    journal: Option<Journal>,
    inner: Option<Arc<InnerHook>>,
    reject_field: Option<String>,
    fail_outer: bool,
    stale: bool,
    me: Weak<TestObject>,
}

impl fmt::Debug for TestObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestObject")
            .field("id", &self.id)
            .field("uuid", &self.uuid)
            .field("rel_type", &self.rel_type)
            .finish_non_exhaustive()
    }
}

impl TestObject {
    fn blank(id: ObjectId, uuid: String) -> Self {
        Self {
            id,
            uuid,
            rel_type: None,
            source: None,
            target: None,
            journal: None,
            inner: None,
            reject_field: None,
            fail_outer: false,
            stale: false,
            me: Weak::new(),
        }
    }

    /// Node with storage id `id` and a uuid derived from it.
    pub fn node(id: u64) -> Self {
        Self::blank(ObjectId::node(id), format!("{id:032x}"))
    }

    /// Relationship of `rel_type` from `source` to `target`.
    pub fn relationship(
        id: u64,
        rel_type: impl Into<RelType>,
        source: &ObjectRef,
        target: &ObjectRef,
    ) -> Self {
        let mut rel = Self::blank(ObjectId::relationship(id), format!("r{id:031x}"));
        rel.rel_type = Some(rel_type.into());
        rel.source = Some(Arc::clone(source));
        rel.target = Some(Arc::clone(target));
        rel
    }

    /// Overrides the derived uuid.
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    /// Records every hook invocation into `journal`.
    pub fn journal(mut self, journal: &Journal) -> Self {
        self.journal = Some(journal.clone());
        self
    }

    /// Installs an inner hook.
    pub fn on_inner<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ObjectRef, &mut ModificationQueue, &mut InnerContext<'_>) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.inner = Some(Arc::new(hook));
        self
    }

    /// Makes validation fail with a token on `field`.
    pub fn reject_validation(mut self, field: impl Into<String>) -> Self {
        self.reject_field = Some(field.into());
        self
    }

    /// Makes the outer hook fail.
    pub fn fail_outer(mut self) -> Self {
        self.fail_outer = true;
        self
    }

    /// Reports the object as stale.
    pub fn stale(mut self) -> Self {
        self.stale = true;
        self
    }

    /// Finishes the builder.
    pub fn into_ref(self) -> ObjectRef {
        let object: Arc<TestObject> = Arc::new_cyclic(|me| TestObject {
            me: me.clone(),
            ..self
        });
        object
    }

    fn log(&self, event: HookEvent) {
        if let Some(journal) = &self.journal {
            journal.record(event, self.id);
        }
    }
}

impl GraphObject for TestObject {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn is_stale(&self) -> bool {
        self.stale
    }

    fn rel_type(&self) -> Option<&RelType> {
        self.rel_type.as_ref()
    }

    fn source_node(&self) -> Option<ObjectRef> {
        self.source.clone()
    }

    fn target_node(&self) -> Option<ObjectRef> {
        self.target.clone()
    }

    fn on_inner_callback(
        &self,
        queue: &mut ModificationQueue,
        ctx: &mut InnerContext<'_>,
    ) -> Result<()> {
        self.log(HookEvent::Inner);
        let (Some(hook), Some(me)) = (&self.inner, self.me.upgrade()) else {
            return Ok(());
        };
        let me: ObjectRef = me;
        hook(&me, queue, ctx)
    }

    fn validate(&self, _change: &ChangeRecord, errors: &mut ErrorBuffer) -> bool {
        self.log(HookEvent::Validate);
        match &self.reject_field {
            Some(field) => {
                errors.add(ErrorToken::new("TestObject", Some(field), "invalid"));
                false
            }
            None => true,
        }
    }

    fn index(&self, _change: &ChangeRecord) -> Result<()> {
        self.log(HookEvent::Index);
        Ok(())
    }

    fn on_outer_callback(&self, _change: &ChangeRecord, _principal: Option<&Principal>) -> Result<()> {
        self.log(HookEvent::Outer);
        if self.fail_outer {
            return Err(ChangeError::hook(
                self.id,
                Phase::OuterCallbacks,
                "outer hook refused",
            ));
        }
        Ok(())
    }
}

/// [`StorageTransaction`] double that remembers what happened to it.
#[derive(Debug, Default)]
pub struct RecordingStorage {
    /// Set once `commit` succeeded.
    pub committed: bool,
    /// Set once `rollback` ran.
    pub rolled_back: bool,
    fail_commit: bool,
}

impl RecordingStorage {
    /// Storage that refuses to commit.
    pub fn failing() -> Self {
        Self {
            fail_commit: true,
            ..Self::default()
        }
    }
}

impl StorageTransaction for RecordingStorage {
    fn commit(&mut self) -> Result<()> {
        if self.fail_commit {
            return Err(ChangeError::Storage("commit refused".into()));
        }
        self.committed = true;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.rolled_back = true;
        Ok(())
    }
}
