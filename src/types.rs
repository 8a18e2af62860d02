//! Identities, property keys, values and principals shared by every stage.

use std::fmt;

use serde::Serialize;

/// Whether a tracked object is a node or a relationship (edge).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    /// A graph node.
    Node,
    /// A graph relationship (edge).
    Relationship,
}

impl ObjectKind {
    /// Single-letter prefix used in identity display and change-log folders.
    pub fn prefix(self) -> &'static str {
        match self {
            ObjectKind::Node => "n",
            ObjectKind::Relationship => "r",
        }
    }
}

/// Stable key of a node or edge within one transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    /// Node or relationship.
    pub kind: ObjectKind,
    /// Storage-engine identifier.
    pub id: u64,
}

impl ObjectId {
    /// Identity of the node with the given storage id.
    pub const fn node(id: u64) -> Self {
        Self {
            kind: ObjectKind::Node,
            id,
        }
    }

    /// Identity of the relationship with the given storage id.
    pub const fn relationship(id: u64) -> Self {
        Self {
            kind: ObjectKind::Relationship,
            id,
        }
    }

    /// Returns true if this identity refers to a node.
    pub fn is_node(&self) -> bool {
        self.kind == ObjectKind::Node
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ObjectKind::Node => write!(f, "N{}", self.id),
            ObjectKind::Relationship => write!(f, "R{}", self.id),
        }
    }
}

/// Property key as handed out by the external property system.
///
/// A key carrying a synchronization key requires cross-object
/// synchronization once the transaction commits.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyKey {
    name: String,
    sync_key: Option<String>,
}

impl PropertyKey {
    /// Creates a plain property key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sync_key: None,
        }
    }

    /// Marks the key as requiring synchronization under `sync_key`.
    pub fn synchronized(mut self, sync_key: impl Into<String>) -> Self {
        self.sync_key = Some(sync_key.into());
        self
    }

    /// Property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Synchronization key, if the property requires cross-object sync.
    pub fn sync_key(&self) -> Option<&str> {
        self.sync_key.as_deref()
    }

    /// Returns true if writes to this key must be synchronized.
    pub fn requires_synchronization(&self) -> bool {
        self.sync_key.is_some()
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::new(name)
    }
}

/// Owned property value staged in a change record.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// Owned string.
    Str(String),
    /// Owned byte vector.
    Bytes(Vec<u8>),
    /// Date value represented as Unix timestamp (days since epoch).
    Date(i64),
    /// DateTime value represented as Unix timestamp (milliseconds since epoch).
    DateTime(i64),
    /// Reference to another object by uuid.
    Ref(String),
    /// Ordered collection of values.
    List(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "bytes(len={})", v.len()),
            Value::Date(v) => write!(f, "date({v})"),
            Value::DateTime(v) => write!(f, "datetime({v})"),
            Value::Ref(v) => write!(f, "ref({v})"),
            Value::List(items) => write!(f, "list(len={})", items.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Acting user of a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Principal {
    /// Stable user identifier; also names the per-user change log.
    pub id: String,
    /// Display name written into audit lines.
    pub name: String,
}

impl Principal {
    /// Creates a principal.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Relationship type name, e.g. `OWNS` or `HAS_CHILD`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelType(String);

/// Structural relationship kinds folded as scalar endpoint updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WellKnownKind {
    /// `OWNS`: the source principal owns the target node.
    Ownership,
    /// `SECURITY`: the source principal holds an access grant on the target.
    AccessGrant,
    /// `IS_AT`: the source node is located at the target node.
    Locality,
}

impl RelType {
    /// Ownership edge type.
    pub const OWNS: &'static str = "OWNS";
    /// Access-grant edge type.
    pub const SECURITY: &'static str = "SECURITY";
    /// Spatial-locality edge type.
    pub const IS_AT: &'static str = "IS_AT";

    /// Creates a relationship type from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the structural kind if this is one of the well-known types.
    pub fn well_known(&self) -> Option<WellKnownKind> {
        match self.0.as_str() {
            Self::OWNS => Some(WellKnownKind::Ownership),
            Self::SECURITY => Some(WellKnownKind::AccessGrant),
            Self::IS_AT => Some(WellKnownKind::Locality),
            _ => None,
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RelType {
    fn from(name: &str) -> Self {
        RelType::new(name)
    }
}
