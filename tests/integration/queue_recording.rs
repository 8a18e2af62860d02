#![allow(missing_docs)]

use std::collections::BTreeMap;

use sombra_changeset::testkit::{HookEvent, Journal, TestObject};
use sombra_changeset::{
    ChangeSummary, ErrorBuffer, GraphObject, InnerContext, ModificationQueue, ObjectId, ObjectRef,
    PropertyKey, Result, Value, Verb,
};

#[test]
fn end_to_end_summary_after_inner_and_validation() -> Result<()> {
    let mut queue = ModificationQueue::default();
    let node = TestObject::node(1).into_ref();
    queue.create(None, &node);
    queue.modify(None, &node, &"name".into(), None, Some(Value::from("foo")));

    let mut errors = ErrorBuffer::new();
    queue.do_inner_callbacks(None, &mut errors)?;
    assert_eq!(queue.inspect(node.id(), |r| r.is_dirty()), Some(false));
    queue.do_validation(None, &mut errors, true)?;

    let expected = ChangeSummary {
        after: BTreeMap::from([("name".to_owned(), Value::from("foo"))]),
        ..ChangeSummary::default()
    };
    assert_eq!(queue.change_summary(node.id()), Some(expected));
    Ok(())
}

#[test]
fn repeated_modify_keeps_first_previous_and_last_new() {
    let mut queue = ModificationQueue::default();
    let node = TestObject::node(1).into_ref();
    let key = PropertyKey::new("status");
    queue.modify(None, &node, &key, Some("draft".into()), Some("review".into()));
    queue.modify(None, &node, &key, Some("review".into()), Some("approved".into()));
    queue.modify(None, &node, &key, Some("approved".into()), Some("published".into()));

    let summary = queue.change_summary(node.id()).unwrap();
    assert_eq!(summary.before.get("status"), Some(&Value::from("draft")));
    assert_eq!(summary.after.get("status"), Some(&Value::from("published")));
    let diffs = queue
        .inspect(node.id(), |r| r.modified_properties().len())
        .unwrap();
    assert_eq!(diffs, 1);
}

#[test]
fn records_are_processed_in_first_touch_order() -> Result<()> {
    let journal = Journal::new();
    let mut queue = ModificationQueue::default();
    let third = TestObject::node(3).journal(&journal).into_ref();
    let first = TestObject::node(30).journal(&journal).into_ref();
    let second = TestObject::node(7).journal(&journal).into_ref();

    queue.modify(None, &first, &"a".into(), None, Some(Value::Int(1)));
    queue.create(None, &second);
    queue.delete(None, &third, false);
    queue.modify(None, &first, &"b".into(), None, Some(Value::Int(2)));

    let mut errors = ErrorBuffer::new();
    queue.do_inner_callbacks(None, &mut errors)?;
    queue.do_validation(None, &mut errors, true)?;
    queue.do_outer_callbacks(None);

    let expected = vec![first.id(), second.id(), third.id()];
    assert_eq!(journal.order(HookEvent::Inner), expected);
    assert_eq!(journal.order(HookEvent::Index), expected);
    assert_eq!(journal.order(HookEvent::Outer), expected);
    Ok(())
}

#[test]
fn hook_cascade_reaches_untouched_objects() -> Result<()> {
    let journal = Journal::new();
    let mut queue = ModificationQueue::default();
    let b = TestObject::node(2).journal(&journal).into_ref();
    let cascade_target = b.clone();
    let a = TestObject::node(1)
        .journal(&journal)
        .on_inner(move |_, queue, _| {
            queue.modify(None, &cascade_target, &"touched".into(), None, Some(true.into()));
            Ok(())
        })
        .into_ref();
    queue.create(None, &a);

    queue.do_inner_callbacks(None, &mut ErrorBuffer::new())?;

    assert_eq!(journal.count(HookEvent::Inner, a.id()), 1);
    assert_eq!(journal.count(HookEvent::Inner, b.id()), 1);
    assert!(queue.records().iter().all(|r| !r.dirty));
    assert_eq!(queue.inspect(b.id(), |r| r.verb()), Some(Verb::Modify));
    Ok(())
}

#[test]
fn rewritten_record_runs_hook_again_in_next_sweep() -> Result<()> {
    let journal = Journal::new();
    let mut queue = ModificationQueue::default();
    let a = TestObject::node(1).journal(&journal).into_ref();
    let back = a.clone();
    let b = TestObject::node(2)
        .journal(&journal)
        .on_inner(move |_, queue, ctx: &mut InnerContext<'_>| {
            if ctx.verb == Verb::Create {
                queue.modify(None, &back, &"child_created".into(), None, Some(true.into()));
            }
            Ok(())
        })
        .into_ref();
    queue.create(None, &a);
    queue.create(None, &b);

    queue.do_inner_callbacks(None, &mut ErrorBuffer::new())?;

    assert_eq!(journal.count(HookEvent::Inner, a.id()), 2);
    assert_eq!(journal.count(HookEvent::Inner, b.id()), 1);
    Ok(())
}

/// Node whose inner hook marks its neighbours as propagated and recurses
/// only when the mark created a record.
struct Propagating {
    id: u64,
    uuid: String,
    neighbours: parking_lot::Mutex<Vec<ObjectRef>>,
}

impl Propagating {
    fn new(id: u64) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            id,
            uuid: format!("p{id:031x}"),
            neighbours: parking_lot::Mutex::new(Vec::new()),
        })
    }

    fn spread(&self, queue: &mut ModificationQueue) {
        let neighbours = self.neighbours.lock().clone();
        for neighbour in neighbours {
            if queue.mark_propagated(&neighbour) {
                neighbour.on_inner_callback(
                    queue,
                    &mut InnerContext {
                        principal: None,
                        verb: Verb::Propagated,
                        callback_id: None,
                        errors: &mut ErrorBuffer::new(),
                    },
                )
                .ok();
            }
        }
    }
}

impl GraphObject for Propagating {
    fn id(&self) -> ObjectId {
        ObjectId::node(self.id)
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn on_inner_callback(
        &self,
        queue: &mut ModificationQueue,
        _ctx: &mut InnerContext<'_>,
    ) -> Result<()> {
        self.spread(queue);
        Ok(())
    }
}

#[test]
fn propagation_through_a_cycle_terminates() -> Result<()> {
    let a = Propagating::new(1);
    let b = Propagating::new(2);
    let c = Propagating::new(3);
    let (a_ref, b_ref, c_ref): (ObjectRef, ObjectRef, ObjectRef) = (a.clone(), b.clone(), c.clone());
    a.neighbours.lock().push(b_ref.clone());
    b.neighbours.lock().push(c_ref.clone());
    c.neighbours.lock().push(a_ref.clone());

    let mut queue = ModificationQueue::default();
    queue.modify(None, &a_ref, &"seed".into(), None, Some(Value::Int(1)));
    queue.do_inner_callbacks(None, &mut ErrorBuffer::new())?;

    assert_eq!(queue.len(), 3);
    assert_eq!(queue.inspect(b_ref.id(), |r| r.verb()), Some(Verb::Propagated));
    assert_eq!(queue.inspect(c_ref.id(), |r| r.verb()), Some(Verb::Propagated));
    assert_eq!(queue.inspect(a_ref.id(), |r| r.verb()), Some(Verb::Modify));
    assert!(queue.is_propagated(a_ref.id()));

    // the cycle holds strong references; break it so the nodes are freed
    for node in [&a, &b, &c] {
        node.neighbours.lock().clear();
    }
    Ok(())
}

#[test]
fn propagated_record_turns_into_modify_on_write() {
    let mut queue = ModificationQueue::default();
    let node = TestObject::node(4).into_ref();
    assert!(queue.mark_propagated(&node));
    assert!(!queue.mark_propagated(&node));
    queue.modify(None, &node, &"x".into(), None, Some(Value::Int(1)));
    assert_eq!(queue.inspect(node.id(), |r| r.verb()), Some(Verb::Modify));
    assert_eq!(queue.len(), 1);
}

#[test]
fn deletion_is_terminal_even_after_create() {
    let mut queue = ModificationQueue::default();
    let node = TestObject::node(5).into_ref();
    queue.delete(None, &node, true);
    queue.create(None, &node);
    queue.modify(None, &node, &"late".into(), None, Some(Value::Int(1)));
    assert_eq!(
        queue.inspect(node.id(), |r| r.verb()),
        Some(Verb::PassivelyDeleted)
    );
    assert!(queue.is_deleted(node.id()));
}

#[test]
fn modify_then_create_promotes_to_create() {
    let mut queue = ModificationQueue::default();
    let node = TestObject::node(6).into_ref();
    queue.modify(None, &node, &"x".into(), None, Some(Value::Int(1)));
    queue.create(None, &node);
    assert_eq!(queue.inspect(node.id(), |r| r.verb()), Some(Verb::Create));
    assert_eq!(queue.inspect(node.id(), |r| r.first_touch()), Some(0));
}

#[test]
fn observer_sees_records_without_blocking_writer() {
    let mut queue = ModificationQueue::default();
    let observer = queue.observer();
    for id in 0..10 {
        queue.create(None, &TestObject::node(id).into_ref());
    }
    let handle = std::thread::spawn(move || observer.snapshot());
    let seen = handle.join().unwrap();
    assert_eq!(seen.len(), 10);
    assert!(seen.windows(2).all(|w| w[0].first_touch < w[1].first_touch));
}
