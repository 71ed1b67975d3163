//! Encoding of intermediate shards and reducer aggregates.
//!
//! A shard holds one JSON array `[word, document, count]` per line. A
//! reducer aggregate is a single JSON object mapping each word to its total
//! and per-document counts.

use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/////////////////////////////////////////////////////////////////////////////
// Shard naming
/////////////////////////////////////////////////////////////////////////////

/// Addresses the shard written by one mapper for one reducer. Rendered as
/// `m{mapper}r{reducer}.json`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardName {
    pub mapper_index: u32,
    pub reducer_index: u32,
}

impl ShardName {
    pub fn new(mapper_index: u32, reducer_index: u32) -> Self {
        Self {
            mapper_index,
            reducer_index,
        }
    }

    /// Parses the final path component of an object name. Returns `None`
    /// for anything that is not exactly a shard name.
    pub fn parse(object: &str) -> Option<Self> {
        let file = object.rsplit('/').next()?;
        let indices = file.strip_suffix(".json")?.strip_prefix('m')?;
        let (mapper, reducer) = indices.split_once('r')?;
        let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(mapper) || !all_digits(reducer) {
            return None;
        }
        Some(Self::new(mapper.parse().ok()?, reducer.parse().ok()?))
    }
}

impl fmt::Display for ShardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}r{}.json", self.mapper_index, self.reducer_index)
    }
}

/////////////////////////////////////////////////////////////////////////////
// Shard records
/////////////////////////////////////////////////////////////////////////////

/// Occurrences of `word` in `document` seen by one mapper.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardRecord {
    pub word: String,
    pub document: String,
    pub count: u64,
}

impl ShardRecord {
    pub fn new(word: impl Into<String>, document: impl Into<String>, count: u64) -> Self {
        Self {
            word: word.into(),
            document: document.into(),
            count,
        }
    }
}

impl Serialize for ShardRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.word, &self.document, self.count).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ShardRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (word, document, count) = <(String, String, u64)>::deserialize(deserializer)?;
        Ok(Self {
            word,
            document,
            count,
        })
    }
}

pub fn encode_shard(records: &[ShardRecord]) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    for record in records {
        buf.put_slice(&serde_json::to_vec(record)?);
        buf.put_u8(b'\n');
    }
    Ok(buf.freeze())
}

pub fn decode_shard(buf: &[u8]) -> Result<Vec<ShardRecord>> {
    let text = std::str::from_utf8(buf).context("shard is not valid UTF-8")?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("malformed shard record on line {}", n + 1))
        })
        .collect()
}

/////////////////////////////////////////////////////////////////////////////
// Reducer aggregates
/////////////////////////////////////////////////////////////////////////////

/// Total and per-document occurrence counts of a single word.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordCounts {
    pub count: u64,
    pub filenames: BTreeMap<String, u64>,
}

/// Everything one reducer produced: word to counts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Aggregate {
    pub words: BTreeMap<String, WordCounts>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one record. Addition is commutative, so records may arrive in
    /// any order.
    pub fn add(&mut self, record: ShardRecord) {
        let entry = self.words.entry(record.word).or_default();
        entry.count += record.count;
        *entry.filenames.entry(record.document).or_insert(0) += record.count;
    }

    pub fn extend<I: IntoIterator<Item = ShardRecord>>(&mut self, records: I) {
        for record in records {
            self.add(record);
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn get(&self, word: &str) -> Option<&WordCounts> {
        self.words.get(word)
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec_pretty(self)?))
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        serde_json::from_slice(buf).context("malformed reducer aggregate")
    }
}

impl FromIterator<ShardRecord> for Aggregate {
    fn from_iter<I: IntoIterator<Item = ShardRecord>>(records: I) -> Self {
        let mut aggregate = Self::new();
        aggregate.extend(records);
        aggregate
    }
}
