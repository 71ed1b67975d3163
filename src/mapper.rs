//! The map task.
//!
//! Downloads the assigned documents, counts words per document, and writes
//! one shard per reducer that received at least one word. Shard contents
//! are sorted, so re-running a mapper over the same documents reproduces
//! byte-identical shards.

use crate::codec::{encode_shard, ShardName, ShardRecord};
use crate::retry::{run_bounded, with_retry};
use crate::utils::{document_basename, string_from_bytes};
use crate::wc::count_words;
use crate::{partition, MapTask, TaskContext};
use anyhow::{bail, Result};
use bytes::Bytes;
use fnv::FnvHashMap;
use itertools::Itertools;
use tracing::{debug, info, warn};

type ReducerIndex = u32;
type ShardBuffers = FnvHashMap<ReducerIndex, Vec<ShardRecord>>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MapSummary {
    pub documents_read: usize,
    /// Missing, unreadable or undecodable documents.
    pub documents_skipped: usize,
    pub shards_uploaded: usize,
    /// Shards whose upload still failed after retries.
    pub failed_shards: Vec<ShardName>,
}

impl MapSummary {
    /// Every produced shard reached the object store.
    pub fn is_complete(&self) -> bool {
        self.failed_shards.is_empty()
    }
}

/// Runs one map task.
///
/// Skipped documents only shrink the output. A shard that cannot be
/// uploaded is recorded in the summary without stopping its siblings.
pub async fn run(ctx: &TaskContext, task: &MapTask) -> Result<MapSummary> {
    if task.num_reducers == 0 {
        bail!("map task {} has no reducers to partition into", task.mapper_index);
    }
    let mapper = task.mapper_index;
    info!(
        mapper,
        run = %task.run_id,
        documents = task.document_names.len(),
        "map task started"
    );

    clear_previous_attempt(ctx, task).await;

    let mut summary = MapSummary::default();
    let mut buffers = ShardBuffers::default();
    for (document, text) in download_documents(ctx, task).await {
        match text {
            Some(text) => {
                summary.documents_read += 1;
                emit(&mut buffers, document_basename(&document), &text, task.num_reducers);
            }
            None => summary.documents_skipped += 1,
        }
    }

    let shards = buffers
        .into_iter()
        .map(|(reducer, mut records)| {
            records.sort();
            let bytes = encode_shard(&records)?;
            Ok((ShardName::new(mapper, reducer), bytes))
        })
        .collect::<Result<Vec<_>>>()?;

    let objects = ctx.objects.clone();
    let config = ctx.config.clone();
    let run_id = task.run_id.clone();
    let uploads = run_bounded(
        shards,
        ctx.config.transfer_concurrency,
        move |(shard, bytes): (ShardName, Bytes)| {
            let objects = objects.clone();
            let object = config.shard_object(&run_id, shard);
            let policy = config.transfer;
            async move {
                with_retry(&policy, &format!("upload {object}"), || {
                    objects.put(&object, bytes.clone())
                })
                .await
            }
        },
    )
    .await;

    for ((shard, _), outcome) in uploads {
        match outcome {
            Ok(()) => summary.shards_uploaded += 1,
            Err(err) => {
                warn!(mapper, %shard, error = ?err, "shard upload failed");
                summary.failed_shards.push(shard);
            }
        }
    }
    summary.failed_shards.sort();

    if summary.is_complete() {
        info!(
            mapper,
            read = summary.documents_read,
            skipped = summary.documents_skipped,
            shards = summary.shards_uploaded,
            "map task finished"
        );
    } else {
        warn!(
            mapper,
            failed = %summary.failed_shards.iter().join(", "),
            "map task finished with missing shards"
        );
    }
    Ok(summary)
}

/// Adds the word counts of one document to the per-reducer buffers.
fn emit(buffers: &mut ShardBuffers, document: &str, text: &str, num_reducers: u32) {
    for (word, count) in count_words(text) {
        let reducer = partition(&word, num_reducers);
        buffers
            .entry(reducer)
            .or_default()
            .push(ShardRecord::new(word, document, count));
    }
}

/// Fetches every assigned document. Documents that are missing or fail to
/// download or decode come back as `None`.
async fn download_documents(ctx: &TaskContext, task: &MapTask) -> Vec<(String, Option<String>)> {
    let objects = ctx.objects.clone();
    let config = ctx.config.clone();
    let downloads = run_bounded(
        task.document_names.clone(),
        ctx.config.transfer_concurrency,
        move |document: String| {
            let objects = objects.clone();
            let object = config.input_object(&document);
            let policy = config.transfer;
            async move {
                with_retry(&policy, &format!("download {object}"), || objects.get(&object)).await
            }
        },
    )
    .await;

    let mapper = task.mapper_index;
    downloads
        .into_iter()
        .map(|(document, outcome)| {
            let text = match outcome {
                Ok(Some(bytes)) => match string_from_bytes(bytes) {
                    Ok(text) => Some(text),
                    Err(err) => {
                        warn!(mapper, %document, error = %err, "document is not UTF-8, skipping");
                        None
                    }
                },
                Ok(None) => {
                    warn!(mapper, %document, "document does not exist, skipping");
                    None
                }
                Err(err) => {
                    warn!(mapper, %document, error = ?err, "document download failed, skipping");
                    None
                }
            };
            (document, text)
        })
        .collect()
}

/// Removes shards an earlier attempt of this mapper left in the run's
/// namespace, so the reducers only ever see one attempt's output.
async fn clear_previous_attempt(ctx: &TaskContext, task: &MapTask) {
    let namespace = ctx.config.shard_namespace(&task.run_id);
    let existing = match ctx.objects.list(&namespace).await {
        Ok(existing) => existing,
        Err(err) => {
            warn!(mapper = task.mapper_index, error = ?err, "could not list earlier shards");
            return;
        }
    };
    for object in existing {
        let ours = ShardName::parse(&object).map_or(false, |shard| shard.mapper_index == task.mapper_index);
        if !ours {
            continue;
        }
        debug!(mapper = task.mapper_index, %object, "removing shard from earlier attempt");
        if let Err(err) = ctx.objects.delete(&object).await {
            warn!(%object, error = ?err, "could not remove earlier shard");
        }
    }
}
