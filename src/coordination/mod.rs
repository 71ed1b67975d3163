//! Key/value and hash-field store holding the run-control flags and the
//! global word index.

use anyhow::Result;

pub mod grpc;
pub mod memory;

pub use grpc::{GrpcCoordinationStore, StoreService};
pub use memory::InMemoryCoordinationStore;

/// Operations the engine needs from the coordination store.
///
/// The compare-and-swap operations are what make concurrent index merges
/// safe: `expected = None` means "only if absent".
#[tonic::async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Sets `key` to `value` only if its current value equals `expected`.
    async fn compare_and_swap(&self, key: &str, expected: Option<&str>, value: &str) -> Result<bool>;

    async fn hash_get(&self, hash: &str, field: &str) -> Result<Option<String>>;

    async fn hash_set(&self, hash: &str, field: &str, value: &str) -> Result<()>;

    async fn hash_exists(&self, hash: &str, field: &str) -> Result<bool>;

    /// Sets `field` of `hash` to `value` only if its current value equals
    /// `expected`.
    async fn hash_compare_and_swap(
        &self,
        hash: &str,
        field: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool>;

    /// All field names of `hash`, sorted.
    async fn hash_fields(&self, hash: &str) -> Result<Vec<String>>;

    /// Removes every key and hash.
    async fn clear(&self) -> Result<()>;
}
