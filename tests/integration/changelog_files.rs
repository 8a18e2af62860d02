#![allow(missing_docs)]

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::Value as Json;
use sombra_changeset::changelog::change_log_path;
use sombra_changeset::testkit::{RecordingStorage, TestObject};
use sombra_changeset::{
    ChangeQueueConfig, CommitPipeline, CounterMetrics, EmptyRegistry, FsChangeLog,
    LogKind, ModificationQueue, Principal, PropertyDescriptor, QueueOptions, StaticRegistry, Value,
};
use tempfile::tempdir;

fn lines(text: &str) -> Vec<Json> {
    text.lines()
        .map(|line| serde_json::from_str(line).expect("valid json line"))
        .collect()
}

#[test]
fn commit_writes_object_and_user_logs() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sink = Arc::new(FsChangeLog::new(dir.path()));
    let options = QueueOptions::new()
        .audit(true)
        .user_audit(true)
        .change_log(sink.clone());
    let mut queue = ModificationQueue::new(options, Arc::new(EmptyRegistry));
    let user = Principal::new("user-0001", "alice");
    let node = TestObject::node(0xabcdef).into_ref();

    queue.create(Some(&user), &node);
    queue.modify(Some(&user), &node, &"name".into(), None, Some(Value::from("foo")));
    let report = CommitPipeline::new().commit(&mut queue, Some(&user), &mut RecordingStorage::default())?;
    assert_eq!(report.change_logs_written, 2);

    let path = change_log_path(dir.path(), LogKind::Node, node.uuid());
    assert!(path.starts_with(dir.path().join("n").join("00").join("00").join("00")));
    let object_log = lines(&fs::read_to_string(&path)?);
    assert_eq!(object_log.len(), 2);
    assert_eq!(object_log[0]["verb"], "create");
    assert_eq!(object_log[0]["userId"], "user-0001");
    assert_eq!(object_log[0]["userName"], "alice");
    assert_eq!(object_log[1]["verb"], "change");
    assert!(object_log[1]["prev"].is_null());
    assert_eq!(object_log[1]["val"], "foo");
    assert!(object_log[1]["time"].as_i64().unwrap() > 0);

    let user_log = lines(&sink.read(LogKind::User, "user-0001")?.unwrap());
    assert_eq!(user_log.len(), 2);
    assert_eq!(user_log[0]["objId"], node.uuid());
    assert!(user_log[0].get("userId").is_none());
    Ok(())
}

#[test]
fn successive_transactions_append() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sink = Arc::new(FsChangeLog::new(dir.path()));
    let options = QueueOptions::new().audit(true).change_log(sink.clone());
    let node = TestObject::node(1).into_ref();

    for round in 0..3i64 {
        let mut queue = ModificationQueue::new(options.clone(), Arc::new(EmptyRegistry));
        queue.modify(None, &node, &"count".into(), Some(round.into()), Some((round + 1).into()));
        CommitPipeline::new().commit(&mut queue, None, &mut RecordingStorage::default())?;
    }

    let log = lines(&sink.read(LogKind::Node, node.uuid())?.unwrap());
    let values: Vec<i64> = log.iter().map(|l| l["val"].as_i64().unwrap()).collect();
    assert_eq!(values, vec![1, 2, 3]);
    assert!(sink.read(LogKind::User, "nobody")?.is_none());
    Ok(())
}

#[test]
fn relationship_logs_link_both_nodes() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sink = Arc::new(FsChangeLog::new(dir.path()));
    let registry = StaticRegistry::new().with(
        "HAS_CHILD",
        PropertyDescriptor::collection("children"),
        PropertyDescriptor::collection("parents"),
    );
    let options = QueueOptions::new().audit(true).change_log(sink.clone());
    let mut queue = ModificationQueue::new(options, Arc::new(registry));
    let parent = TestObject::node(1).into_ref();
    let child = TestObject::node(2).into_ref();
    let rel = TestObject::relationship(3, "HAS_CHILD", &parent, &child).into_ref();

    queue.create_relationship(None, &rel);
    CommitPipeline::new().commit(&mut queue, None, &mut RecordingStorage::default())?;

    let rel_log = lines(&sink.read(LogKind::Relationship, rel.uuid())?.unwrap());
    assert_eq!(rel_log[0]["verb"], "create");
    assert_eq!(rel_log[0]["rel"], "HAS_CHILD");
    assert_eq!(rel_log[0]["source"], parent.uuid());
    assert_eq!(rel_log[0]["target"], child.uuid());

    let parent_log = lines(&sink.read(LogKind::Node, parent.uuid())?.unwrap());
    assert_eq!(parent_log.len(), 1);
    assert_eq!(parent_log[0]["verb"], "link");
    assert_eq!(parent_log[0]["relDir"], "out");
    assert_eq!(parent_log[0]["relId"], rel.uuid());

    let child_log = lines(&sink.read(LogKind::Node, child.uuid())?.unwrap());
    assert_eq!(child_log[0]["relDir"], "in");
    assert_eq!(child_log[0]["target"], parent.uuid());
    Ok(())
}

#[test]
fn disabled_toggles_write_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let sink = Arc::new(FsChangeLog::new(dir.path()));
    let user = Principal::new("u1", "alice");
    let node = TestObject::node(1).into_ref();

    let options = QueueOptions::new().change_log(sink.clone());
    let mut queue = ModificationQueue::new(options, Arc::new(EmptyRegistry));
    queue.create(Some(&user), &node);
    let report = CommitPipeline::new().commit(&mut queue, Some(&user), &mut RecordingStorage::default())?;
    assert_eq!(report.change_logs_written, 0);
    assert_eq!(fs::read_dir(dir.path())?.count(), 0);

    let options = QueueOptions::new().user_audit(true).change_log(sink.clone());
    let mut queue = ModificationQueue::new(options, Arc::new(EmptyRegistry));
    queue.create(Some(&user), &node);
    CommitPipeline::new().commit(&mut queue, Some(&user), &mut RecordingStorage::default())?;
    assert!(sink.read(LogKind::Node, node.uuid())?.is_none());
    assert!(sink.read(LogKind::User, "u1")?.is_some());
    Ok(())
}

#[test]
fn io_failures_are_swallowed_and_counted() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    // a regular file where the `n` folder should be makes every node append fail
    fs::write(dir.path().join("n"), b"not a directory")?;
    let metrics = Arc::new(CounterMetrics::default());
    let options = QueueOptions::new()
        .audit(true)
        .change_log(Arc::new(FsChangeLog::new(dir.path())))
        .metrics(metrics.clone());
    let mut queue = ModificationQueue::new(options, Arc::new(EmptyRegistry));
    queue.create(None, &TestObject::node(1).into_ref());

    let mut storage = RecordingStorage::default();
    let report = CommitPipeline::new().commit(&mut queue, None, &mut storage)?;

    assert!(storage.committed);
    assert_eq!(report.change_logs_written, 0);
    assert_eq!(metrics.change_log_failures.load(Ordering::Relaxed), 1);
    Ok(())
}

#[test]
fn config_file_drives_pooled_writes() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let logs = dir.path().join("logs");
    let config_path = dir.path().join("changelog.toml");
    fs::write(
        &config_path,
        format!(
            "[changelog]\nenabled = true\nuser_enabled = true\ndirectory = {:?}\n\n[pipeline]\nworker_threads = 2\n",
            logs.display().to_string()
        ),
    )?;
    let options = ChangeQueueConfig::load(&config_path)?.to_options()?;
    assert!(options.worker_pool.is_some());

    let mut queue = ModificationQueue::new(options, Arc::new(EmptyRegistry));
    let user = Principal::new("u1", "alice");
    let nodes: Vec<_> = (1..=8).map(|id| TestObject::node(id).into_ref()).collect();
    for node in &nodes {
        queue.create(Some(&user), node);
    }
    let report = CommitPipeline::new().commit(&mut queue, Some(&user), &mut RecordingStorage::default())?;
    assert_eq!(report.change_logs_written, nodes.len() + 1);

    let sink = FsChangeLog::new(&logs);
    for node in &nodes {
        assert!(sink.read(LogKind::Node, node.uuid())?.is_some());
    }
    let user_log = sink.read(LogKind::User, "u1")?.unwrap();
    assert_eq!(user_log.lines().count(), nodes.len());
    Ok(())
}
