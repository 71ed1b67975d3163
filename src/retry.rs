//! Retry with exponential backoff, and a bounded worker pool for object
//! transfers.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{error, warn};

/// Attempts, backoff base and per-attempt deadline for a fallible remote
/// operation. Attempt `n` (0-based) that fails waits `base * 2^n` before
/// the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            timeout_secs: 120,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Never fewer than one attempt.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Runs `op` until it succeeds or the policy's attempts are used up. Each
/// attempt is bounded by the policy timeout; an elapsed attempt counts as a
/// failure. The last error is returned.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        let outcome = match timeout(policy.timeout(), op()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow!("timed out after {:?}", policy.timeout())),
        };
        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if attempt + 1 >= attempts {
            return Err(err.context(format!("{what} failed after {attempts} attempts")));
        }
        let delay = policy.backoff(attempt);
        warn!(attempt = attempt + 1, ?delay, error = %err, "{what} failed, retrying");
        sleep(delay).await;
        attempt += 1;
    }
}

/// Applies `op` to every item with at most `limit` running at once.
///
/// Failures are returned alongside their item and never cancel siblings.
/// Results come back in completion order.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, op: F) -> Vec<(T, Result<R>)>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let op = Arc::new(op);
    let mut set = JoinSet::new();
    for item in items {
        let permits = permits.clone();
        let op = op.clone();
        set.spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(_permit) => (op.as_ref())(item.clone()).await,
                Err(err) => Err(err.into()),
            };
            (item, outcome)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(err) => error!(error = %err, "transfer worker panicked"),
        }
    }
    results
}
