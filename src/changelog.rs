//! Audit trail: line formatting, sinks and the Phase 5 drain.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, error};

use crate::error::ChangeError;
use crate::metrics::PipelineMetrics;
use crate::types::{ObjectKind, Principal, Value};

/// Kind of change-log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogVerb {
    /// Object created.
    Create,
    /// Property changed.
    Change,
    /// Object deleted.
    Delete,
    /// Relationship attached to this node.
    Link,
    /// Relationship detached from this node.
    Unlink,
}

/// Direction of a link, seen from the node whose log is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The node is the relationship's target.
    In,
    /// The node is the relationship's source.
    Out,
}

/// Folder a change log lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogKind {
    /// Per-node log (`n`).
    Node,
    /// Per-relationship log (`r`).
    Relationship,
    /// Per-user log (`u`).
    User,
}

impl LogKind {
    /// On-disk folder name.
    pub fn folder(self) -> &'static str {
        match self {
            LogKind::Node => "n",
            LogKind::Relationship => "r",
            LogKind::User => "u",
        }
    }
}

impl From<ObjectKind> for LogKind {
    fn from(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Node => LogKind::Node,
            ObjectKind::Relationship => LogKind::Relationship,
        }
    }
}

static NULL_VALUE: Value = Value::Null;

/// One audit line, serialized as a JSON object.
#[derive(Clone, Debug, Serialize)]
pub struct ChangeLogEntry<'a> {
    time: i64,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    #[serde(rename = "userName", skip_serializing_if = "Option::is_none")]
    user_name: Option<&'a str>,
    #[serde(rename = "objId", skip_serializing_if = "Option::is_none")]
    obj_id: Option<&'a str>,
    verb: LogVerb,
    #[serde(skip_serializing_if = "Option::is_none")]
    rel: Option<&'a str>,
    #[serde(rename = "relId", skip_serializing_if = "Option::is_none")]
    rel_id: Option<&'a str>,
    #[serde(rename = "relDir", skip_serializing_if = "Option::is_none")]
    rel_dir: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prev: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    val: Option<&'a Value>,
}

impl<'a> ChangeLogEntry<'a> {
    /// Starts an entry stamped with the current wall-clock time.
    pub fn new(verb: LogVerb) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            time: (now.unix_timestamp_nanos() / 1_000_000) as i64,
            user_id: None,
            user_name: None,
            obj_id: None,
            verb,
            rel: None,
            rel_id: None,
            rel_dir: None,
            source: None,
            target: None,
            key: None,
            prev: None,
            val: None,
        }
    }

    /// Sets the target uuid.
    pub fn target(mut self, target: &'a str) -> Self {
        self.target = Some(target);
        self
    }

    /// Sets the source uuid (relationship creation/deletion).
    pub fn source(mut self, source: &'a str) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets relationship type and uuid.
    pub fn relationship(mut self, rel: &'a str, rel_id: &'a str) -> Self {
        self.rel = Some(rel);
        self.rel_id = Some(rel_id);
        self
    }

    /// Sets the link direction.
    pub fn direction(mut self, dir: Direction) -> Self {
        self.rel_dir = Some(dir);
        self
    }

    /// Sets the changed key with previous and new value.
    pub fn change(mut self, key: &'a str, prev: Option<&'a Value>, val: Option<&'a Value>) -> Self {
        self.key = Some(key);
        self.prev = Some(prev.unwrap_or(&NULL_VALUE));
        self.val = Some(val.unwrap_or(&NULL_VALUE));
        self
    }

    pub(crate) fn write_object_line<'b>(&self, user: Option<&'b Principal>, out: &mut String)
    where
        'a: 'b,
    {
        let mut line: ChangeLogEntry<'b> = self.clone();
        if let Some(user) = user {
            line.user_id = Some(&user.id);
            line.user_name = Some(&user.name);
        }
        line.write_to(out);
    }

    pub(crate) fn write_user_line<'b>(&self, obj_id: &'b str, out: &mut String)
    where
        'a: 'b,
    {
        let mut line: ChangeLogEntry<'b> = self.clone();
        line.obj_id = Some(obj_id);
        line.write_to(out);
    }

    fn write_to(&self, out: &mut String) {
        match serde_json::to_string(self) {
            Ok(json) => {
                let _ = writeln!(out, "{json}");
            }
            Err(err) => {
                error!(error = %err, "failed to serialize change log entry");
            }
        }
    }
}

/// Append-only destination for drained change logs.
pub trait ChangeLogSink: Send + Sync {
    /// Appends `text` to the log identified by `kind` and `id` in one call.
    fn append(&self, kind: LogKind, id: &str, text: &str) -> Result<(), ChangeError>;
}

/// Returns the on-disk location of a change log below `root`.
///
/// The first six characters of `id` are split into three two-character
/// directories so that no folder grows unbounded.
pub fn change_log_path(root: &Path, kind: LogKind, id: &str) -> PathBuf {
    let mut path = root.join(kind.folder());
    if id.len() >= 6 && id.is_ascii() {
        path.push(&id[0..2]);
        path.push(&id[2..4]);
        path.push(&id[4..6]);
    }
    path.push(id);
    path
}

/// Returns true if `id` can name a log file without leaving its folder.
///
/// Ids come from principals and object uuids, so separators, parent
/// components and absolute forms are refused.
pub fn is_safe_log_id(id: &str) -> bool {
    !id.is_empty()
        && !id.contains(['/', '\\', '\0'])
        && !id.contains("..")
        && id != "."
        && !Path::new(id).is_absolute()
}

fn unsafe_id(kind: LogKind, id: &str) -> String {
    format!("refusing change log id {id:?} for {kind:?} log")
}

/// File-system change log rooted at a directory.
#[derive(Clone, Debug)]
pub struct FsChangeLog {
    root: PathBuf,
}

impl FsChangeLog {
    /// Creates a sink writing below `root`; directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads a whole log, or `None` if nothing was ever written.
    pub fn read(&self, kind: LogKind, id: &str) -> io::Result<Option<String>> {
        if !is_safe_log_id(id) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, unsafe_id(kind, id)));
        }
        match fs::read_to_string(change_log_path(&self.root, kind, id)) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl ChangeLogSink for FsChangeLog {
    fn append(&self, kind: LogKind, id: &str, text: &str) -> Result<(), ChangeError> {
        if !is_safe_log_id(id) {
            return Err(ChangeError::InvalidArgument(unsafe_id(kind, id)));
        }
        let path = change_log_path(&self.root, kind, id);
        let write = || -> io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(text.as_bytes())
        };
        write().map_err(|source| ChangeError::AuditIo {
            path: path.clone(),
            source,
        })
    }
}

/// In-memory sink, handy for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryChangeLog {
    logs: Mutex<BTreeMap<(LogKind, String), String>>,
}

impl MemoryChangeLog {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the accumulated text of one log.
    pub fn get(&self, kind: LogKind, id: &str) -> Option<String> {
        self.logs.lock().get(&(kind, id.to_owned())).cloned()
    }

    /// Number of distinct logs written.
    pub fn len(&self) -> usize {
        self.logs.lock().len()
    }

    /// Returns true if nothing was ever written.
    pub fn is_empty(&self) -> bool {
        self.logs.lock().is_empty()
    }
}

impl ChangeLogSink for MemoryChangeLog {
    fn append(&self, kind: LogKind, id: &str, text: &str) -> Result<(), ChangeError> {
        self.logs
            .lock()
            .entry((kind, id.to_owned()))
            .or_default()
            .push_str(text);
        Ok(())
    }
}

/// One pending append produced by draining a record.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    pub(crate) kind: LogKind,
    pub(crate) id: String,
    pub(crate) text: String,
}

/// Writes every pending append. Failures are logged and counted, never
/// returned; the number of successful appends is.
pub(crate) fn drain(
    writes: Vec<PendingWrite>,
    sink: &dyn ChangeLogSink,
    metrics: &dyn PipelineMetrics,
    pool: Option<&Arc<rayon::ThreadPool>>,
) -> usize {
    let write_one = |write: &PendingWrite| -> bool {
        match sink.append(write.kind, &write.id, &write.text) {
            Ok(()) => {
                metrics.change_log_appended(write.text.len());
                true
            }
            Err(err) => {
                error!(
                    kind = write.kind.folder(),
                    id = %write.id,
                    error = %err,
                    "unable to write change log"
                );
                metrics.change_log_failed();
                false
            }
        }
    };
    let written = match pool {
        Some(pool) if writes.len() > 1 => {
            pool.install(|| writes.par_iter().filter(|w| write_one(*w)).count())
        }
        _ => writes.iter().filter(|w| write_one(*w)).count(),
    };
    debug!(written, total = writes.len(), "change log drained");
    written
}

/// Groups buffered lines so that each log receives exactly one append.
pub(crate) fn group_writes(
    object_logs: Vec<(LogKind, String, String)>,
    user_logs: Vec<(String, String)>,
) -> Vec<PendingWrite> {
    let mut grouped: BTreeMap<(LogKind, String), String> = BTreeMap::new();
    for (kind, id, text) in object_logs {
        if !text.is_empty() {
            grouped.entry((kind, id)).or_default().push_str(&text);
        }
    }
    for (user, text) in user_logs {
        if !text.is_empty() {
            grouped
                .entry((LogKind::User, user))
                .or_default()
                .push_str(&text);
        }
    }
    grouped
        .into_iter()
        .map(|((kind, id), text)| PendingWrite { kind, id, text })
        .collect()
}
