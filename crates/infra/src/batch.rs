//! Bounded fan-out of independent per-item work.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Run `work` for every key on its own task, at most `max_concurrency` at a
/// time, and return the outcomes sorted by key.
///
/// Duplicate keys are collapsed. A task that panics or is cancelled yields a
/// [`EngineError::TaskFailed`] for its key; it never takes the batch down.
pub(crate) async fn fan_out<K, T, F, Fut>(
    keys: Vec<K>,
    max_concurrency: usize,
    work: F,
) -> Vec<(K, EngineResult<T>)>
where
    K: Copy + Ord + Send + 'static,
    T: Send + 'static,
    F: Fn(K) -> Fut,
    Fut: Future<Output = EngineResult<T>> + Send + 'static,
{
    let mut pending: BTreeMap<K, Option<EngineResult<T>>> =
        keys.into_iter().map(|k| (k, None)).collect();

    let permits = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut tasks = JoinSet::new();
    for key in pending.keys().copied() {
        let permits = Arc::clone(&permits);
        let unit = work(key);
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            (key, unit.await)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((key, outcome)) => {
                if let Some(slot) = pending.get_mut(&key) {
                    *slot = Some(outcome);
                }
            }
            Err(e) => warn!(error = %e, "per-item task did not complete"),
        }
    }

    pending
        .into_iter()
        .map(|(key, outcome)| {
            let outcome = outcome
                .unwrap_or_else(|| Err(EngineError::TaskFailed("task panicked or was cancelled".into())));
            (key, outcome)
        })
        .collect()
}
