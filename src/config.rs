//! Run configuration.
//!
//! Loaded from a JSON file; every field has a default so a partial file (or
//! none at all) is valid. Command line flags override individual values.

use crate::codec::ShardName;
use crate::retry::RetryPolicy;
use crate::RunId;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Flag value meaning "set".
pub const FLAG_YES: &str = "YES";
/// Flag value meaning "unset".
pub const FLAG_NO: &str = "NO";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub num_mappers: u32,
    pub num_reducers: u32,
    pub bucket: String,
    pub input_prefix: String,
    pub shard_prefix: String,
    pub output_prefix: String,
    /// Hash holding the global word index.
    pub index_hash: String,
    /// Set once a full indexing run has finished; gates triggered runs.
    pub armed_flag: String,
    /// Held while a run is in progress.
    pub processing_flag: String,
    /// Retry budget for a single object transfer.
    pub transfer: RetryPolicy,
    /// Concurrent transfers per task.
    pub transfer_concurrency: usize,
    /// Retry budget and deadline for a dispatched task.
    pub task: RetryPolicy,
    /// Compare-and-swap attempts per word when merging into the index.
    pub merge_max_attempts: u32,
    pub object_store: ObjectStoreConfig,
    pub store_addr: String,
    pub worker_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_mappers: 5,
            num_reducers: 5,
            bucket: "mrl-lite".into(),
            input_prefix: "input/".into(),
            shard_prefix: "mapper_outputs/".into(),
            output_prefix: "reducer_outputs/".into(),
            index_hash: "words".into(),
            armed_flag: "map_reduce_manual_indexing_done".into(),
            processing_flag: "map_reduce_processing".into(),
            transfer: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1000,
                timeout_secs: 120,
            },
            transfer_concurrency: 5,
            task: RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1000,
                timeout_secs: 600,
            },
            merge_max_attempts: 64,
            object_store: ObjectStoreConfig::default(),
            store_addr: "127.0.0.1:50052".into(),
            worker_addr: "127.0.0.1:50051".into(),
        }
    }
}

/// Connection settings for the S3-compatible object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub user: String,
    pub password: String,
    pub region: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9000".into(),
            user: "ROOTNAME".into(),
            password: "CHANGEME123".into(),
            region: "us-east-1".into(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Loads `path` if given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_mappers == 0 {
            bail!("num_mappers must be at least 1");
        }
        if self.num_reducers == 0 {
            bail!("num_reducers must be at least 1");
        }
        if self.transfer_concurrency == 0 {
            bail!("transfer_concurrency must be at least 1");
        }
        for (name, prefix) in [
            ("input_prefix", &self.input_prefix),
            ("shard_prefix", &self.shard_prefix),
            ("output_prefix", &self.output_prefix),
        ] {
            if !prefix.ends_with('/') {
                bail!("{name} `{prefix}` must end with `/`");
            }
        }
        if self.shard_prefix == self.output_prefix || self.shard_prefix == self.input_prefix {
            bail!("shard_prefix must differ from input_prefix and output_prefix");
        }
        Ok(())
    }

    /// Object name of an input document.
    pub fn input_object(&self, document: &str) -> String {
        format!("{}{}", self.input_prefix, document)
    }

    /// Strips the input namespace from an object name, if present.
    pub fn document_name<'a>(&self, object: &'a str) -> &'a str {
        object.strip_prefix(&self.input_prefix).unwrap_or(object)
    }

    /// Namespace holding every shard of one run.
    pub fn shard_namespace(&self, run_id: &RunId) -> String {
        format!("{}{}/", self.shard_prefix, run_id)
    }

    pub fn shard_object(&self, run_id: &RunId, shard: ShardName) -> String {
        format!("{}{}", self.shard_namespace(run_id), shard)
    }

    /// Namespace holding every reducer aggregate of one run.
    pub fn output_namespace(&self, run_id: &RunId) -> String {
        format!("{}{}/", self.output_prefix, run_id)
    }

    pub fn aggregate_object(&self, run_id: &RunId, reducer_index: u32) -> String {
        format!(
            "{}reducer_output_{}.json",
            self.output_namespace(run_id),
            reducer_index
        )
    }
}

impl RetryPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
