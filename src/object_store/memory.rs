use super::ObjectStore;
use anyhow::{bail, Result};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Process-local object store.
///
/// Used for `--local` runs and tests. Failures can be injected per object
/// name (or per prefix, for `list`) to exercise retry paths.
#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, Bytes>>>,
    failures: Arc<Mutex<HashMap<String, usize>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `content` under `name` without going through the async API.
    pub fn insert(&self, name: impl Into<String>, content: impl Into<Bytes>) {
        locked(&self.objects).insert(name.into(), content.into());
    }

    /// The next `times` operations on `name` fail.
    pub fn fail_next(&self, name: impl Into<String>, times: usize) {
        locked(&self.failures).insert(name.into(), times);
    }

    /// Every operation on `name` fails until [`Self::heal`] is called.
    pub fn fail_always(&self, name: impl Into<String>) {
        self.fail_next(name, usize::MAX);
    }

    pub fn heal(&self, name: &str) {
        locked(&self.failures).remove(name);
    }

    /// Snapshot of all object names.
    pub fn names(&self) -> Vec<String> {
        locked(&self.objects).keys().cloned().collect()
    }

    pub fn read(&self, name: &str) -> Option<Bytes> {
        locked(&self.objects).get(name).cloned()
    }

    fn check_failure(&self, op: &str, name: &str) -> Result<()> {
        let mut failures = locked(&self.failures);
        if let Some(remaining) = failures.get_mut(name) {
            if *remaining > 0 {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                bail!("injected {op} failure for `{name}`");
            }
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, name: &str, body: Bytes) -> Result<()> {
        self.check_failure("put", name)?;
        locked(&self.objects).insert(name.to_string(), body);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Bytes>> {
        self.check_failure("get", name)?;
        Ok(locked(&self.objects).get(name).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_failure("list", prefix)?;
        Ok(locked(&self.objects)
            .range(prefix.to_string()..)
            .map(|(name, _)| name)
            .take_while(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.check_failure("delete", name)?;
        locked(&self.objects).remove(name);
        Ok(())
    }
}
