//! Folds a relationship change into its two endpoint records.

use tracing::trace;

use super::ModificationQueue;
use crate::object::ObjectRef;
use crate::record::Verb;
use crate::registry::PropertyDescriptor;
use crate::types::{Principal, Value, WellKnownKind};

/// Which end of the edge a node sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Source,
    Target,
}

impl ModificationQueue {
    /// Applies the endpoint side effects of creating (or deleting) `rel`.
    ///
    /// Unknown types, types without descriptors and unresolved endpoints are
    /// skipped; folding never fails the transaction.
    pub(crate) fn fold_relationship(
        &mut self,
        user: Option<&Principal>,
        rel: &ObjectRef,
        source: &ObjectRef,
        target: &ObjectRef,
        deletion: bool,
    ) {
        let Some(rel_type) = rel.rel_type() else {
            trace!(rel = %rel.id(), "relationship has no type, skipping fold");
            return;
        };

        if let Some(kind) = rel_type.well_known() {
            self.fold_structural(kind, source, target);
            return;
        }

        let Some(descriptors) = self.registry.edge_descriptors(rel_type) else {
            trace!(rel = %rel.id(), rel_type = %rel_type, "no edge descriptors, skipping fold");
            return;
        };

        // refs are only tracked for edges described on both ends
        let track_refs = descriptors.source_side.is_some() && descriptors.target_side.is_some();
        if let Some(descriptor) = &descriptors.source_side {
            self.touch_endpoint(user, Side::Source, descriptor, source, target, deletion, track_refs);
        }
        if let Some(descriptor) = &descriptors.target_side {
            self.touch_endpoint(user, Side::Target, descriptor, target, source, deletion, track_refs);
        }
    }

    fn fold_structural(&mut self, kind: WellKnownKind, source: &ObjectRef, target: &ObjectRef) {
        match kind {
            WellKnownKind::Ownership => {
                self.modify_owner(source);
                self.modify_owner(target);
            }
            WellKnownKind::AccessGrant => {
                self.modify_security(source);
                self.modify_security(target);
            }
            WellKnownKind::Locality => {
                self.modify_location(source);
                self.modify_location(target);
            }
        }
    }

    /// Records the property touch on `endpoint`, whose `descriptor` property
    /// now gains (or loses) `other`. The reference change is recorded only
    /// when `track_refs` is set.
    #[allow(clippy::too_many_arguments)]
    fn touch_endpoint(
        &mut self,
        user: Option<&Principal>,
        side: Side,
        descriptor: &PropertyDescriptor,
        endpoint: &ObjectRef,
        other: &ObjectRef,
        deletion: bool,
        track_refs: bool,
    ) {
        let (previous, new) = if descriptor.is_collection() {
            (None, Some(Value::List(Vec::new())))
        } else if deletion {
            (Some(Value::Ref(other.uuid().to_owned())), None)
        } else {
            (None, Some(Value::Ref(other.uuid().to_owned())))
        };
        self.write_property(user, endpoint, &descriptor.key, previous, new, false);

        let other_id = other.id();
        if track_refs {
            self.with_record(endpoint, Verb::Modify, |record| {
                if deletion {
                    record.remove_ref(&descriptor.key, other_id);
                } else {
                    record.add_ref(&descriptor.key, other_id);
                }
            });
        }
        trace!(
            endpoint = %endpoint.id(),
            side = ?side,
            key = %descriptor.key,
            other = %other_id,
            deletion,
            track_refs,
            "relationship folded into endpoint"
        );
    }
}
