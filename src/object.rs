//! The object model the queue tracks and the hooks it drives.

use std::sync::Arc;

use crate::error::{ErrorBuffer, Result};
use crate::queue::ModificationQueue;
use crate::record::{ChangeRecord, Verb};
use crate::types::{ObjectId, Principal, RelType};

/// Shared handle to a tracked node or relationship.
pub type ObjectRef = Arc<dyn GraphObject>;

/// Arguments handed to an inner hook besides the queue itself.
pub struct InnerContext<'a> {
    /// Acting user, `None` for internal actors.
    pub principal: Option<&'a Principal>,
    /// Verb of the record the hook runs for.
    pub verb: Verb,
    /// Correlation token registered for the object, if any.
    pub callback_id: Option<&'a str>,
    /// Error sink; any token added here fails the phase.
    pub errors: &'a mut ErrorBuffer,
}

/// A node or relationship as seen by the change queue.
///
/// Only identity is mandatory; every hook defaults to a no-op so plain data
/// objects can be tracked without ceremony.
pub trait GraphObject: Send + Sync {
    /// Stable identity.
    fn id(&self) -> ObjectId;

    /// Uuid naming the object's change log.
    fn uuid(&self) -> &str;

    /// Returns true once the backing storage entity has been invalidated.
    fn is_stale(&self) -> bool {
        false
    }

    /// Relationship type; `None` for nodes.
    fn rel_type(&self) -> Option<&RelType> {
        None
    }

    /// Source endpoint, if this is a relationship and the node is resolvable.
    fn source_node(&self) -> Option<ObjectRef> {
        None
    }

    /// Target endpoint, if this is a relationship and the node is resolvable.
    fn target_node(&self) -> Option<ObjectRef> {
        None
    }

    /// Inner mutation hook, run before validation. May record further
    /// changes on `queue`, including on objects not yet touched.
    fn on_inner_callback(
        &self,
        _queue: &mut ModificationQueue,
        _ctx: &mut InnerContext<'_>,
    ) -> Result<()> {
        Ok(())
    }

    /// Business-rule validation. Returns false (and adds tokens) to reject.
    fn validate(&self, _change: &ChangeRecord, _errors: &mut ErrorBuffer) -> bool {
        true
    }

    /// (Re)indexes the object after validation.
    fn index(&self, _change: &ChangeRecord) -> Result<()> {
        Ok(())
    }

    /// Outer hook, run after the storage commit succeeded.
    fn on_outer_callback(&self, _change: &ChangeRecord, _principal: Option<&Principal>) -> Result<()> {
        Ok(())
    }
}
