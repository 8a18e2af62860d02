#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::Arc;

use sombra_changeset::testkit::TestObject;
use sombra_changeset::{
    ModificationQueue, ObjectId, PropertyDescriptor, QueueOptions, RelType,
    StaticRegistry, Value, Verb,
};

fn family_queue() -> ModificationQueue {
    let registry = StaticRegistry::new()
        .with(
            "HAS_CHILD",
            PropertyDescriptor::collection("children"),
            PropertyDescriptor::collection("parents"),
        )
        .with(
            "LIVES_IN",
            PropertyDescriptor::scalar("home"),
            PropertyDescriptor::collection("residents"),
        );
    ModificationQueue::new(QueueOptions::default(), Arc::new(registry))
}

#[test]
fn many_to_many_creation_adds_refs_on_both_sides() {
    let mut queue = family_queue();
    let a = TestObject::node(1).into_ref();
    let b = TestObject::node(2).into_ref();
    let rel = TestObject::relationship(100, "HAS_CHILD", &a, &b).into_ref();

    queue.create_relationship(None, &rel);

    let a_summary = queue.change_summary(a.id()).unwrap();
    let b_summary = queue.change_summary(b.id()).unwrap();
    assert_eq!(a_summary.added["children"], BTreeSet::from([b.id()]));
    assert_eq!(b_summary.added["parents"], BTreeSet::from([a.id()]));
    assert!(a_summary.removed.is_empty());
    assert_eq!(queue.inspect(rel.id(), |r| r.verb()), Some(Verb::Create));
}

#[test]
fn many_to_many_deletion_removes_refs_on_both_sides() {
    let mut queue = family_queue();
    let a = TestObject::node(1).into_ref();
    let b = TestObject::node(2).into_ref();
    let rel = TestObject::relationship(100, "HAS_CHILD", &a, &b).into_ref();

    queue.delete_relationship(None, &rel, true);

    let a_summary = queue.change_summary(a.id()).unwrap();
    let b_summary = queue.change_summary(b.id()).unwrap();
    assert_eq!(a_summary.removed["children"], BTreeSet::from([b.id()]));
    assert_eq!(b_summary.removed["parents"], BTreeSet::from([a.id()]));
    assert!(a_summary.added.is_empty());
    assert_eq!(
        queue.inspect(rel.id(), |r| r.verb()),
        Some(Verb::PassivelyDeleted)
    );
}

#[test]
fn several_edges_accumulate_in_one_collection() {
    let mut queue = family_queue();
    let parent = TestObject::node(1).into_ref();
    let kids: Vec<_> = (2..5).map(|id| TestObject::node(id).into_ref()).collect();
    for (i, kid) in kids.iter().enumerate() {
        let rel = TestObject::relationship(100 + i as u64, "HAS_CHILD", &parent, kid).into_ref();
        queue.create_relationship(None, &rel);
    }
    let added = &queue.change_summary(parent.id()).unwrap().added["children"];
    let expected: BTreeSet<ObjectId> = kids.iter().map(|k| k.id()).collect();
    assert_eq!(added, &expected);
    assert_eq!(queue.len(), 1 + kids.len() + kids.len());
}

#[test]
fn scalar_endpoint_records_uuid_of_other_side() {
    let mut queue = family_queue();
    let person = TestObject::node(1).into_ref();
    let city = TestObject::node(2).with_uuid("city-0001-berlin").into_ref();
    let rel = TestObject::relationship(7, "LIVES_IN", &person, &city).into_ref();

    queue.create_relationship(None, &rel);

    let summary = queue.change_summary(person.id()).unwrap();
    assert_eq!(
        summary.after.get("home"),
        Some(&Value::Ref("city-0001-berlin".into()))
    );
    let city_summary = queue.change_summary(city.id()).unwrap();
    assert_eq!(city_summary.after.get("residents"), Some(&Value::List(vec![])));
}

#[test]
fn ownership_edges_flag_both_endpoints_without_refs() {
    let mut queue = family_queue();
    let owner = TestObject::node(1).into_ref();
    let doc = TestObject::node(2).into_ref();
    let rel = TestObject::relationship(9, RelType::OWNS, &owner, &doc).into_ref();

    queue.create_relationship(None, &rel);

    for id in [owner.id(), doc.id()] {
        let summary = queue.change_summary(id).unwrap();
        assert!(summary.added.is_empty());
        assert!(summary.removed.is_empty());
        assert!(summary.after.is_empty());
        let structural = queue.inspect(id, |r| r.structural()).unwrap();
        assert!(structural.owner);
        assert!(!structural.location);
    }
}

#[test]
fn security_and_locality_use_their_own_flags() {
    let mut queue = family_queue();
    let user = TestObject::node(1).into_ref();
    let doc = TestObject::node(2).into_ref();
    let place = TestObject::node(3).into_ref();
    let grant = TestObject::relationship(10, RelType::SECURITY, &user, &doc).into_ref();
    let at = TestObject::relationship(11, RelType::IS_AT, &doc, &place).into_ref();

    queue.create_relationship(None, &grant);
    queue.delete_relationship(None, &at, false);

    let user_flags = queue.inspect(user.id(), |r| r.structural()).unwrap();
    let doc_flags = queue.inspect(doc.id(), |r| r.structural()).unwrap();
    let place_flags = queue.inspect(place.id(), |r| r.structural()).unwrap();
    assert!(user_flags.security && !user_flags.location);
    assert!(doc_flags.security && doc_flags.location);
    assert!(place_flags.location && !place_flags.security);
}

#[test]
fn unknown_types_and_missing_endpoints_are_ignored() {
    let mut queue = family_queue();
    let a = TestObject::node(1).into_ref();
    let b = TestObject::node(2).into_ref();
    let unknown = TestObject::relationship(1, "FOLLOWS", &a, &b).into_ref();
    queue.create_relationship(None, &unknown);
    assert_eq!(queue.len(), 1);

    let dangling = TestObject::node(50).into_ref();
    queue.delete_relationship(None, &dangling, false);
    assert_eq!(queue.len(), 2);
    assert!(queue.is_deleted(dangling.id()));
}

#[test]
fn create_then_delete_nets_out_references() {
    let mut queue = family_queue();
    let a = TestObject::node(1).into_ref();
    let b = TestObject::node(2).into_ref();
    let rel = TestObject::relationship(100, "HAS_CHILD", &a, &b).into_ref();
    queue.create_relationship(None, &rel);
    queue.delete_relationship(None, &rel, false);

    let summary = queue.change_summary(b.id()).unwrap();
    assert!(summary.added.is_empty());
    assert!(summary.removed.is_empty());
}
