//! Progress Clock
//!
//! Reads the network's progress counter (head slot) and its liveness
//! counter (finalized epoch) from a list of redundant sources.
//!
//! A source that is itself being swapped is expected to be unreachable for
//! a while, so failures are normal: the clock answers with the first source
//! that succeeds, in list order, and reports `None` only when all fail.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};

use crate::error::SourceError;
use crate::types::ProgressSample;

/// One redundant data source (usually a beacon node)
#[async_trait::async_trait]
pub trait ProgressSource: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Current head slot
    async fn head_slot(&self) -> Result<u64, SourceError>;

    /// Finalized checkpoint epoch
    async fn finalized_epoch(&self) -> Result<u64, SourceError>;
}

/// Progress as seen by the orchestrator loop
///
/// `None` means "no new information" and is never an error.
#[async_trait::async_trait]
pub trait ProgressClock: Send + Sync {
    /// Current head slot
    async fn current_slot(&self) -> Option<u64>;

    /// Finalized checkpoint epoch
    async fn finalized_epoch(&self) -> Option<u64>;

    /// Slots per epoch used to derive epochs
    fn slots_per_epoch(&self) -> u64;

    /// Current slot with derived epoch
    async fn sample(&self) -> Option<ProgressSample> {
        let slot = self.current_slot().await?;
        Some(ProgressSample::from_slot(slot, self.slots_per_epoch()))
    }
}

/// Clock backed by an ordered list of redundant sources
///
/// Sources are queried concurrently, each under its own timeout, and the
/// first success in list order wins. A poll returns as soon as every
/// source ahead of an answering one has failed, so a hung source only
/// costs time while nothing preferred to it has answered, and never more
/// than one timeout.
pub struct RedundantClock {
    sources: Vec<Arc<dyn ProgressSource>>,
    timeout: Duration,
    slots_per_epoch: u64,
}

impl std::fmt::Debug for RedundantClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedundantClock")
            .field("sources", &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("slots_per_epoch", &self.slots_per_epoch)
            .finish()
    }
}

impl RedundantClock {
    /// Create a clock over sources in preference order
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn ProgressSource>>, timeout: Duration, slots_per_epoch: u64) -> Self {
        Self {
            sources,
            timeout,
            slots_per_epoch,
        }
    }

    /// Number of configured sources
    #[inline]
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    async fn first_success<'a, F, Fut>(&'a self, what: &'static str, query: F) -> Option<u64>
    where
        F: Fn(&'a dyn ProgressSource) -> Fut,
        Fut: std::future::Future<Output = Result<u64, SourceError>> + 'a,
    {
        let timeout = self.timeout;
        let mut pending: FuturesUnordered<_> = self
            .sources
            .iter()
            .enumerate()
            .map(|(index, source)| {
                let fut = query(source.as_ref());
                async move {
                    let result = match tokio::time::timeout(timeout, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(SourceError::Timeout {
                            source_name: source.name().to_string(),
                            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        }),
                    };
                    (index, result)
                }
            })
            .collect();

        // results[i] is None until source i finishes; `next` is the first
        // source whose outcome still matters
        let mut results: Vec<Option<Result<u64, SourceError>>> = vec![None; self.sources.len()];
        let mut next = 0;
        while let Some((index, result)) = pending.next().await {
            if let Err(e) = &result {
                tracing::debug!(query = what, error = %e, "progress source unavailable");
            }
            results[index] = Some(result);
            while let Some(Some(done)) = results.get(next) {
                match done {
                    Ok(value) => return Some(*value),
                    Err(_) => next += 1,
                }
            }
        }
        tracing::warn!(query = what, sources = self.sources.len(), "no progress source answered");
        None
    }
}

#[async_trait::async_trait]
impl ProgressClock for RedundantClock {
    async fn current_slot(&self) -> Option<u64> {
        self.first_success("head_slot", |s| s.head_slot()).await
    }

    async fn finalized_epoch(&self) -> Option<u64> {
        self.first_success("finalized_epoch", |s| s.finalized_epoch()).await
    }

    fn slots_per_epoch(&self) -> u64 {
        self.slots_per_epoch
    }
}
