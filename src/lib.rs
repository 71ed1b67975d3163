//! A distributed word-count MapReduce (lite) engine.
//!
//! A coordinator splits the documents staged in an object store across a
//! fixed number of mapper tasks. Mappers tokenize their documents and
//! partition words into shards by hashing; reducers merge every shard
//! addressed to them and fold the result into a global word index held in a
//! coordination store. Documents, shards and aggregates live on an
//! S3-compatible object store rather than a distributed file system.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod cmd;
pub mod codec;
pub mod config;
pub mod coordination;
pub mod coordinator;
pub mod dispatch;
pub mod index;
pub mod mapper;
pub mod object_store;
pub mod reducer;
pub mod retry;
pub mod rpc;
pub mod utils;
pub mod wc;

/////////////////////////////////////////////////////////////////////////////
// Partitioning
/////////////////////////////////////////////////////////////////////////////

const FNV_OFFSET_BASIS: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over the given bytes.
#[inline]
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Computes the reducer responsible for `word` as
/// `fnv1a_32(utf8(word)) % num_reducers`.
///
/// Mappers and reducers both call this to agree on shard ownership, so it
/// must stay a pure function of `word` and `num_reducers`.
///
/// # Panics
///
/// Panics if `num_reducers` is zero.
#[inline]
pub fn partition(word: &str, num_reducers: u32) -> u32 {
    assert!(num_reducers > 0, "num_reducers must be at least 1");
    fnv1a_32(word.as_bytes()) % num_reducers
}

/////////////////////////////////////////////////////////////////////////////
// Tasks
/////////////////////////////////////////////////////////////////////////////

/// Identifies one MapReduce run. Intermediate objects are namespaced by it
/// and index merges are tagged with it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// A fresh, random run id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for RunId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Work handed to a single mapper.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapTask {
    pub run_id: RunId,
    /// Document names relative to the input namespace.
    pub document_names: Vec<String>,
    pub mapper_index: u32,
    pub num_reducers: u32,
}

/// Work handed to a single reducer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceTask {
    pub run_id: RunId,
    pub reducer_index: u32,
    pub num_mappers: u32,
}

/// Either kind of task the coordinator dispatches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Task {
    Map(MapTask),
    Reduce(ReduceTask),
}

impl Task {
    /// The mapper or reducer index this task runs as.
    pub fn index(&self) -> u32 {
        match self {
            Task::Map(task) => task.mapper_index,
            Task::Reduce(task) => task.reducer_index,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Task::Map(_) => "map",
            Task::Reduce(_) => "reduce",
        }
    }
}

/// Terminal status a task reports back to the coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Succeeded,
    Failed(String),
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Succeeded)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Succeeded => f.write_str("succeeded"),
            TaskStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Handles a mapper or reducer task runs against.
#[derive(Clone)]
pub struct TaskContext {
    pub objects: Arc<dyn object_store::ObjectStore>,
    pub coordination: Arc<dyn coordination::CoordinationStore>,
    pub config: Arc<config::Config>,
}

impl TaskContext {
    pub fn new(
        objects: Arc<dyn object_store::ObjectStore>,
        coordination: Arc<dyn coordination::CoordinationStore>,
        config: config::Config,
    ) -> Self {
        Self {
            objects,
            coordination,
            config: Arc::new(config),
        }
    }
}
