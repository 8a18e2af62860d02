//! Transaction-scoped change tracking for a graph store.
//!
//! Mutating code records every create, modify and delete of nodes and
//! relationships on a [`ModificationQueue`]. At commit time a
//! [`CommitPipeline`] runs inner hooks to a fixpoint, validates and indexes
//! the touched objects, runs deferred post-process actions, commits the
//! storage transaction, notifies outer hooks and finally appends the
//! buffered audit lines to the change log.
//!
//! ```
//! use sombra_changeset::testkit::{RecordingStorage, TestObject};
//! use sombra_changeset::{CommitPipeline, ModificationQueue, Value};
//!
//! let mut queue = ModificationQueue::default();
//! let node = TestObject::node(1).into_ref();
//! queue.create(None, &node);
//! queue.modify(None, &node, &"name".into(), None, Some(Value::from("Ada")));
//!
//! let mut storage = RecordingStorage::default();
//! let report = CommitPipeline::new().commit(&mut queue, None, &mut storage)?;
//! assert_eq!(report.records.len(), 1);
//! assert!(queue.is_empty());
//! # Ok::<(), sombra_changeset::ChangeError>(())
//! ```

#![warn(missing_docs)]

pub mod changelog;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod object;
pub mod options;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod registry;
pub mod testkit;
pub mod types;

pub use changelog::{ChangeLogSink, FsChangeLog, LogKind, MemoryChangeLog};
pub use config::{ChangeQueueConfig, ConfigError};
pub use error::{ChangeError, ErrorBuffer, ErrorToken, ErrorTokens, Result};
pub use logging::init_logging;
pub use metrics::{default_metrics, CounterMetrics, NoopMetrics, PipelineMetrics};
pub use object::{GraphObject, InnerContext, ObjectRef};
pub use options::QueueOptions;
pub use pipeline::{CommitPipeline, CommitReport, Phase, PostProcess, StorageTransaction};
pub use queue::{ModificationQueue, QueueObserver, RecordSnapshot};
pub use record::{ChangeRecord, ChangeSummary, PropertyDiff, StructuralChanges, Verb};
pub use registry::{
    Cardinality, EdgeDescriptors, EmptyRegistry, PropertyDescriptor, StaticRegistry, TypeRegistry,
};
pub use types::{ObjectId, ObjectKind, Principal, PropertyKey, RelType, Value, WellKnownKind};
