//! The reduce task.
//!
//! Collects every shard addressed to one reducer across all mappers of a
//! run, sums the records into a single [`Aggregate`], uploads it, then
//! folds it into the global word index.

use crate::codec::{decode_shard, Aggregate, ShardName};
use crate::index::{merge_aggregate, merge_token, MergeSummary};
use crate::retry::{run_bounded, with_retry};
use crate::{ReduceTask, TaskContext};
use anyhow::{anyhow, Context, Result};
use itertools::Itertools;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReduceSummary {
    pub shards_merged: usize,
    /// Shards that were listed but could not be downloaded or decoded.
    pub shards_skipped: usize,
    /// Mappers that emitted nothing for this reducer.
    pub missing_mappers: Vec<u32>,
    pub words: usize,
    pub index: MergeSummary,
}

/// Runs one reduce task.
///
/// Unreadable shards are skipped. Failing to list the shard namespace,
/// upload the aggregate or merge into the index fails the task.
pub async fn run(ctx: &TaskContext, task: &ReduceTask) -> Result<ReduceSummary> {
    let reducer = task.reducer_index;
    let config = &ctx.config;
    info!(reducer, run = %task.run_id, mappers = task.num_mappers, "reduce task started");

    let namespace = config.shard_namespace(&task.run_id);
    let listed = with_retry(&config.transfer, &format!("list {namespace}"), || {
        ctx.objects.list(&namespace)
    })
    .await?;

    let shards: Vec<ShardName> = listed
        .iter()
        .filter_map(|object| ShardName::parse(object))
        .filter(|shard| shard.reducer_index == reducer && shard.mapper_index < task.num_mappers)
        .sorted()
        .collect();

    let mut summary = ReduceSummary {
        missing_mappers: (0..task.num_mappers)
            .filter(|m| !shards.iter().any(|shard| shard.mapper_index == *m))
            .collect(),
        ..ReduceSummary::default()
    };
    if !summary.missing_mappers.is_empty() {
        info!(
            reducer,
            mappers = %summary.missing_mappers.iter().join(", "),
            "no shard from these mappers"
        );
    }

    let objects = ctx.objects.clone();
    let shared = ctx.config.clone();
    let run_id = task.run_id.clone();
    let downloads = run_bounded(shards, config.transfer_concurrency, move |shard: ShardName| {
        let objects = objects.clone();
        let object = shared.shard_object(&run_id, shard);
        let policy = shared.transfer;
        async move {
            let bytes = with_retry(&policy, &format!("download {object}"), || objects.get(&object))
                .await?
                .ok_or_else(|| anyhow!("{object} disappeared after listing"))?;
            decode_shard(&bytes)
        }
    })
    .await;

    let mut aggregate = Aggregate::new();
    for (shard, outcome) in downloads {
        match outcome {
            Ok(records) => {
                debug!(reducer, %shard, records = records.len(), "merging shard");
                aggregate.extend(records);
                summary.shards_merged += 1;
            }
            Err(err) => {
                warn!(reducer, %shard, error = ?err, "skipping unreadable shard");
                summary.shards_skipped += 1;
            }
        }
    }
    summary.words = aggregate.len();

    let object = config.aggregate_object(&task.run_id, reducer);
    let body = aggregate.encode()?;
    with_retry(&config.transfer, &format!("upload {object}"), || {
        ctx.objects.put(&object, body.clone())
    })
    .await
    .with_context(|| format!("reducer {reducer} could not store its aggregate"))?;

    let token = merge_token(&task.run_id, reducer);
    summary.index = merge_aggregate(
        ctx.coordination.as_ref(),
        &config.index_hash,
        &aggregate,
        &token,
        config.merge_max_attempts,
    )
    .await
    .with_context(|| format!("reducer {reducer} could not merge into the index"))?;

    info!(
        reducer,
        merged = summary.shards_merged,
        skipped = summary.shards_skipped,
        words = summary.words,
        inserted = summary.index.inserted,
        updated = summary.index.updated,
        "reduce task finished"
    );
    Ok(summary)
}
