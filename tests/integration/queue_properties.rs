#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use sombra_changeset::testkit::TestObject;
use sombra_changeset::{ModificationQueue, ObjectId, ObjectRef, PropertyKey, Value, Verb};

#[derive(Debug, Clone)]
enum Op {
    Create(u64),
    Modify { node: u64, key: u8, value: i64 },
    Delete { node: u64, passive: bool },
    Propagate(u64),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..12).prop_map(Op::Create),
        (0u64..12, 0u8..4, any::<i64>()).prop_map(|(node, key, value)| Op::Modify {
            node,
            key,
            value
        }),
        (0u64..12, any::<bool>()).prop_map(|(node, passive)| Op::Delete { node, passive }),
        (0u64..12).prop_map(Op::Propagate),
    ]
}

fn apply(queue: &mut ModificationQueue, nodes: &BTreeMap<u64, ObjectRef>, op: &Op) {
    match op {
        Op::Create(n) => queue.create(None, &nodes[n]),
        Op::Modify { node, key, value } => {
            let key = PropertyKey::new(format!("k{key}"));
            queue.modify(None, &nodes[node], &key, None, Some(Value::Int(*value)));
        }
        Op::Delete { node, passive } => queue.delete(None, &nodes[node], *passive),
        Op::Propagate(n) => {
            queue.mark_propagated(&nodes[n]);
        }
    }
}

fn target(op: &Op) -> u64 {
    match op {
        Op::Create(n) | Op::Propagate(n) => *n,
        Op::Modify { node, .. } | Op::Delete { node, .. } => *node,
    }
}

proptest! {
    #[test]
    fn one_record_per_identity(ops in prop::collection::vec(arb_op(), 1..80)) {
        let nodes: BTreeMap<u64, ObjectRef> =
            (0..12).map(|id| (id, TestObject::node(id).into_ref())).collect();
        let mut queue = ModificationQueue::default();
        for op in &ops {
            apply(&mut queue, &nodes, op);
        }
        let touched: BTreeSet<u64> = ops.iter().map(target).collect();
        prop_assert_eq!(queue.len(), touched.len());
        let ids: BTreeSet<ObjectId> = queue.records().iter().map(|r| r.id).collect();
        prop_assert_eq!(ids.len(), queue.len());
    }

    #[test]
    fn snapshots_follow_first_touch(ops in prop::collection::vec(arb_op(), 1..80)) {
        let nodes: BTreeMap<u64, ObjectRef> =
            (0..12).map(|id| (id, TestObject::node(id).into_ref())).collect();
        let mut queue = ModificationQueue::default();
        let mut first_seen = Vec::new();
        for op in &ops {
            let n = target(op);
            if !first_seen.contains(&n) {
                first_seen.push(n);
            }
            apply(&mut queue, &nodes, op);
        }
        let order: Vec<u64> = queue.records().iter().map(|r| r.id.id).collect();
        prop_assert_eq!(order, first_seen);
    }

    #[test]
    fn deletion_stays_terminal(ops in prop::collection::vec(arb_op(), 1..60)) {
        let nodes: BTreeMap<u64, ObjectRef> =
            (0..12).map(|id| (id, TestObject::node(id).into_ref())).collect();
        let mut queue = ModificationQueue::default();
        let mut deleted = BTreeSet::new();
        for op in &ops {
            apply(&mut queue, &nodes, op);
            if let Op::Delete { node, .. } = op {
                deleted.insert(*node);
            }
        }
        for snapshot in queue.records() {
            let is_deletion = matches!(snapshot.verb, Verb::Delete | Verb::PassivelyDeleted);
            prop_assert_eq!(is_deletion, deleted.contains(&snapshot.id.id));
        }
    }

    #[test]
    fn net_diff_keeps_first_previous_and_last_new(values in prop::collection::vec(any::<i64>(), 1..20)) {
        let node = TestObject::node(1).into_ref();
        let key = PropertyKey::new("score");
        let mut queue = ModificationQueue::default();
        let mut previous = None;
        for value in &values {
            queue.modify(None, &node, &key, previous.clone(), Some(Value::Int(*value)));
            previous = Some(Value::Int(*value));
        }
        let summary = queue.change_summary(ObjectId::node(1)).unwrap();
        prop_assert!(summary.before.get("score").is_none());
        let last = values.last().map(|v| Value::Int(*v));
        prop_assert_eq!(summary.after.get("score"), last.as_ref());
    }
}
