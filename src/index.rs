//! The global word index.
//!
//! One hash in the coordination store, field = word, value = JSON
//! [`IndexEntry`]. Reducers fold their aggregates in with an optimistic
//! compare-and-swap loop per word, so concurrent writers never lose each
//! other's counts. Each entry records the `(run, reducer)` merges it absorbed
//! from the latest run that touched it; replaying one of those is a no-op.
//! Runs never overlap, so tokens of earlier runs are dropped.

use crate::codec::Aggregate;
use crate::coordination::CoordinationStore;
use crate::RunId;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// Per-document counts of one word, plus the merges of the latest run
/// already applied.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(default)]
    pub filenames: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub runs: BTreeSet<String>,
}

impl IndexEntry {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("malformed index entry")
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Occurrences across all documents.
    pub fn total(&self) -> u64 {
        self.filenames.values().sum()
    }

    /// Drops tokens that belong to a run other than `token`'s.
    fn forget_other_runs(&mut self, token: &str) {
        let run = token_run(token);
        self.runs.retain(|applied| token_run(applied) == run);
    }

    fn absorb(&mut self, counts: &BTreeMap<String, u64>) {
        for (document, count) in counts {
            *self.filenames.entry(document.clone()).or_insert(0) += count;
        }
    }
}

/// Provenance token for the merge performed by one reducer of one run.
pub fn merge_token(run_id: &RunId, reducer_index: u32) -> String {
    format!("{run_id}/r{reducer_index}")
}

fn token_run(token: &str) -> &str {
    token.rsplit_once('/').map_or(token, |(run, _)| run)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    /// The entry already carried this merge's token.
    AlreadyApplied,
}

/// Merges `counts` for `word` into the index under `token`.
pub async fn merge_word(
    store: &dyn CoordinationStore,
    hash: &str,
    word: &str,
    counts: &BTreeMap<String, u64>,
    token: &str,
    max_attempts: u32,
) -> Result<MergeOutcome> {
    for attempt in 1..=max_attempts.max(1) {
        let current = store.hash_get(hash, word).await?;
        let mut entry = match &current {
            Some(raw) => IndexEntry::parse(raw).with_context(|| format!("index entry for `{word}`"))?,
            None => IndexEntry::default(),
        };
        if entry.runs.contains(token) {
            trace!(word, token, "merge already applied");
            return Ok(MergeOutcome::AlreadyApplied);
        }
        entry.forget_other_runs(token);
        entry.absorb(counts);
        entry.runs.insert(token.to_string());

        let value = entry.to_json()?;
        if store
            .hash_compare_and_swap(hash, word, current.as_deref(), &value)
            .await?
        {
            return Ok(if current.is_none() {
                MergeOutcome::Inserted
            } else {
                MergeOutcome::Updated
            });
        }
        debug!(word, attempt, "index entry changed underneath merge, retrying");
        tokio::task::yield_now().await;
    }
    bail!("gave up merging `{word}` after {max_attempts} conflicting attempts")
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    pub updated: usize,
    pub already_applied: usize,
}

/// Merges every word of `aggregate` into the index. Stops at the first
/// word that cannot be merged; words merged before that stay merged and
/// are skipped if the same token is merged again.
pub async fn merge_aggregate(
    store: &dyn CoordinationStore,
    hash: &str,
    aggregate: &Aggregate,
    token: &str,
    max_attempts: u32,
) -> Result<MergeSummary> {
    let mut summary = MergeSummary::default();
    for (word, counts) in &aggregate.words {
        match merge_word(store, hash, word, &counts.filenames, token, max_attempts).await? {
            MergeOutcome::Inserted => summary.inserted += 1,
            MergeOutcome::Updated => summary.updated += 1,
            MergeOutcome::AlreadyApplied => summary.already_applied += 1,
        }
    }
    Ok(summary)
}

/// Reads the index entry for `word`.
pub async fn lookup(store: &dyn CoordinationStore, hash: &str, word: &str) -> Result<Option<IndexEntry>> {
    store
        .hash_get(hash, word)
        .await?
        .map(|raw| IndexEntry::parse(&raw))
        .transpose()
}

/// Reads the whole index as word to per-document counts.
pub async fn snapshot(store: &dyn CoordinationStore, hash: &str) -> Result<BTreeMap<String, BTreeMap<String, u64>>> {
    let mut index = BTreeMap::new();
    for word in store.hash_fields(hash).await? {
        if let Some(entry) = lookup(store, hash, &word).await? {
            index.insert(word, entry.filenames);
        }
    }
    Ok(index)
}
