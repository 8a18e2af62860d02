//! Edge-type metadata consumed by the relationship resolver.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::types::{PropertyKey, RelType};

/// Whether an endpoint property holds one reference or many.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    /// Single reference (`owner`, `parent`).
    Scalar,
    /// Collection of references (`children`, `members`).
    Collection,
}

/// Property an endpoint exposes for one side of a relationship type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyDescriptor {
    /// Property key on the endpoint.
    pub key: PropertyKey,
    /// Scalar or collection.
    pub cardinality: Cardinality,
}

impl PropertyDescriptor {
    /// Collection-typed descriptor.
    pub fn collection(key: impl Into<PropertyKey>) -> Self {
        Self {
            key: key.into(),
            cardinality: Cardinality::Collection,
        }
    }

    /// Scalar-typed descriptor.
    pub fn scalar(key: impl Into<PropertyKey>) -> Self {
        Self {
            key: key.into(),
            cardinality: Cardinality::Scalar,
        }
    }

    /// Returns true for collection descriptors.
    pub fn is_collection(&self) -> bool {
        self.cardinality == Cardinality::Collection
    }
}

/// Both endpoint properties of a relationship type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeDescriptors {
    /// Property on the source node that lists its targets, e.g. `children`.
    pub source_side: Option<PropertyDescriptor>,
    /// Property on the target node that points back, e.g. `parents`.
    pub target_side: Option<PropertyDescriptor>,
}

/// Lookup from relationship type to endpoint descriptors.
pub trait TypeRegistry: Send + Sync {
    /// Descriptors for `rel_type`, or `None` if the type is unknown.
    fn edge_descriptors(&self, rel_type: &RelType) -> Option<EdgeDescriptors>;
}

/// Registry with no relationship types; every lookup misses.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyRegistry;

impl TypeRegistry for EmptyRegistry {
    fn edge_descriptors(&self, _rel_type: &RelType) -> Option<EdgeDescriptors> {
        None
    }
}

/// In-memory registry populated explicitly at startup.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    edges: RwLock<HashMap<RelType, EdgeDescriptors>>,
}

impl StaticRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the descriptors of `rel_type`.
    pub fn register(
        &self,
        rel_type: impl Into<RelType>,
        source_side: Option<PropertyDescriptor>,
        target_side: Option<PropertyDescriptor>,
    ) {
        self.edges.write().insert(
            rel_type.into(),
            EdgeDescriptors {
                source_side,
                target_side,
            },
        );
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(
        self,
        rel_type: impl Into<RelType>,
        source_side: PropertyDescriptor,
        target_side: PropertyDescriptor,
    ) -> Self {
        self.register(rel_type, Some(source_side), Some(target_side));
        self
    }

    /// Number of registered relationship types.
    pub fn len(&self) -> usize {
        self.edges.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.edges.read().is_empty()
    }
}

impl TypeRegistry for StaticRegistry {
    fn edge_descriptors(&self, rel_type: &RelType) -> Option<EdgeDescriptors> {
        self.edges.read().get(rel_type).cloned()
    }
}
