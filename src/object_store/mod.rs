//! Blob storage for input documents, intermediate shards and reducer
//! aggregates.

use anyhow::Result;
use bytes::Bytes;

pub mod memory;
pub mod minio;

pub use memory::InMemoryObjectStore;
pub use minio::S3ObjectStore;

/// Named blobs in a flat namespace; `/` in names is only a convention.
#[tonic::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Creates or replaces `name`.
    async fn put(&self, name: &str, body: Bytes) -> Result<()>;

    /// Returns `None` if `name` does not exist.
    async fn get(&self, name: &str) -> Result<Option<Bytes>>;

    /// Names starting with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Deleting a missing object is not an error.
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Deletes every object under `prefix`, continuing past failures. Returns
/// the number of objects removed.
pub async fn remove_objects_with_prefix(store: &dyn ObjectStore, prefix: &str) -> Result<usize> {
    let mut removed = 0;
    for object in store.list(prefix).await? {
        match store.delete(&object).await {
            Ok(()) => removed += 1,
            Err(err) => tracing::warn!(object = %object, error = %err, "failed to delete object"),
        }
    }
    Ok(removed)
}
