use std::sync::Arc;

use parking_lot::RwLock;

use super::{sorted_ids, RecordMap};
use crate::record::{ChangeSummary, Verb};
use crate::types::ObjectId;

/// Point-in-time copy of one change record.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordSnapshot {
    /// Object identity.
    pub id: ObjectId,
    /// Object uuid.
    pub uuid: String,
    /// Verb at snapshot time.
    pub verb: Verb,
    /// Logical time of first touch.
    pub first_touch: u64,
    /// Whether the inner hook still has to run.
    pub dirty: bool,
    /// Registered correlation token.
    pub callback_id: Option<String>,
    /// Property and reference changes.
    pub summary: ChangeSummary,
}

/// Read-only view of a queue's records, safe to use from other threads
/// while the owning thread keeps recording.
#[derive(Clone)]
pub struct QueueObserver {
    records: Arc<RwLock<RecordMap>>,
}

impl QueueObserver {
    pub(super) fn new(records: Arc<RwLock<RecordMap>>) -> Self {
        Self { records }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the queue holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Verb of `id`, if touched.
    pub fn verb(&self, id: ObjectId) -> Option<Verb> {
        self.records.read().get(&id).map(|r| r.verb())
    }

    /// Snapshots of every record in first-touch order.
    pub fn snapshot(&self) -> Vec<RecordSnapshot> {
        snapshot(&self.records.read())
    }
}

pub(super) fn snapshot(records: &RecordMap) -> Vec<RecordSnapshot> {
    sorted_ids(records)
        .into_iter()
        .filter_map(|id| records.get(&id))
        .map(|record| RecordSnapshot {
            id: record.id(),
            uuid: record.uuid().to_owned(),
            verb: record.verb(),
            first_touch: record.first_touch(),
            dirty: record.is_dirty(),
            callback_id: record.callback_id().map(str::to_owned),
            summary: record.summary(),
        })
        .collect()
}
