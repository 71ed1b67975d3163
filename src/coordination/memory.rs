use super::CoordinationStore;
use anyhow::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// [`CoordinationStore`] kept in process memory.
///
/// Every operation on a single key (or a single hash) runs under that
/// entry's shard lock, so the compare-and-swap operations are atomic.
/// `wci-store` serves one of these over gRPC.
#[derive(Clone, Default)]
pub struct InMemoryCoordinationStore {
    keys: Arc<DashMap<String, String>>,
    hashes: Arc<DashMap<String, HashMap<String, String>>>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[tonic::async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.keys.get(key).map(|value| value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.keys.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn compare_and_swap(&self, key: &str, expected: Option<&str>, value: &str) -> Result<bool> {
        match self.keys.entry(key.to_string()) {
            Entry::Occupied(mut current) if expected == Some(current.get().as_str()) => {
                current.insert(value.to_string());
                Ok(true)
            }
            Entry::Vacant(vacant) if expected.is_none() => {
                vacant.insert(value.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn hash_get(&self, hash: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .hashes
            .get(hash)
            .and_then(|fields| fields.get(field).cloned()))
    }

    async fn hash_set(&self, hash: &str, field: &str, value: &str) -> Result<()> {
        self.hashes
            .entry(hash.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_exists(&self, hash: &str, field: &str) -> Result<bool> {
        Ok(self
            .hashes
            .get(hash)
            .map_or(false, |fields| fields.contains_key(field)))
    }

    async fn hash_compare_and_swap(
        &self,
        hash: &str,
        field: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool> {
        let mut fields = self.hashes.entry(hash.to_string()).or_default();
        if fields.get(field).map(String::as_str) != expected {
            return Ok(false);
        }
        fields.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hash_fields(&self, hash: &str) -> Result<Vec<String>> {
        let mut fields: Vec<String> = self
            .hashes
            .get(hash)
            .map(|fields| fields.keys().cloned().collect())
            .unwrap_or_default();
        fields.sort();
        Ok(fields)
    }

    async fn clear(&self) -> Result<()> {
        self.keys.clear();
        self.hashes.clear();
        Ok(())
    }
}
