//! Execution of a single target
//!
//! `stop → [reinitialize] → start → health (bounded retries)`. Step failures
//! become `ExecutionError`; health that never comes up is only a warning,
//! because the new component did start.

use std::time::{Duration, Instant};

use crate::config::OrchestratorSettings;
use crate::error::{ExecutionError, LifecycleError};
use crate::lifecycle::{HealthStatus, LifecycleSet};
use crate::markers::MarkerOutcome;
use crate::types::{SwapTarget, TargetId};

/// How the health gate ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    /// Probe reported ready
    Healthy {
        /// Peer count if reported
        peers: Option<u32>,
        /// Probes used
        attempts: u32,
    },
    /// Retry budget exhausted
    TimedOut {
        /// Probes used
        attempts: u32,
    },
}

/// Result of a target whose lifecycle steps all succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Executed target
    pub target: TargetId,
    /// Health gate result
    pub health: HealthOutcome,
    /// Wall-clock time spent
    pub elapsed: Duration,
}

impl ExecutionReport {
    /// Marker outcome for this report
    #[must_use]
    pub fn marker_outcome(&self) -> MarkerOutcome {
        match self.health {
            HealthOutcome::Healthy { .. } => MarkerOutcome::Succeeded,
            HealthOutcome::TimedOut { attempts } => MarkerOutcome::Degraded {
                reason: format!("not healthy after {attempts} probes"),
            },
        }
    }
}

/// Runs one target's lifecycle through its kind's provider
#[derive(Debug, Clone)]
pub struct TargetExecutor {
    lifecycles: LifecycleSet,
    health_attempts: u32,
    health_delay: Duration,
    min_peers: u32,
}

impl TargetExecutor {
    /// Create an executor from providers and loop settings
    #[must_use]
    pub fn new(lifecycles: LifecycleSet, settings: &OrchestratorSettings) -> Self {
        Self {
            lifecycles,
            health_attempts: settings.health_attempts.max(1),
            health_delay: settings.health_delay(),
            min_peers: settings.min_peers,
        }
    }

    /// Providers this executor dispatches to
    #[inline]
    #[must_use]
    pub fn lifecycles(&self) -> &LifecycleSet {
        &self.lifecycles
    }

    /// Execute a target
    ///
    /// # Errors
    /// Returns `ExecutionError` if stop, reinitialize or start fails, or if
    /// no provider exists for the target's kind.
    pub async fn execute(&self, target: &SwapTarget) -> Result<ExecutionReport, ExecutionError> {
        let started = Instant::now();
        let provider = self
            .lifecycles
            .get(target.kind)
            .ok_or_else(|| ExecutionError::NoProvider {
                target: target.id.clone(),
                kind: target.kind,
            })?;

        tracing::info!(target = %target.id, kind = %target.kind, version = %target.version, "stopping");
        provider.stop(target).await.map_err(|source| ExecutionError::Stop {
            target: target.id.clone(),
            source,
        })?;

        if target.reinitialize {
            tracing::info!(target = %target.id, "reinitializing shared state");
            provider
                .reinitialize(target)
                .await
                .map_err(|source| ExecutionError::Reinitialize {
                    target: target.id.clone(),
                    source,
                })?;
        }

        tracing::info!(target = %target.id, version = %target.version, "starting");
        provider
            .start(target, &target.version)
            .await
            .map_err(|source| ExecutionError::Start {
                target: target.id.clone(),
                source,
            })?;

        let health = self.await_health(target, provider.as_ref()).await;
        Ok(ExecutionReport {
            target: target.id.clone(),
            health,
            elapsed: started.elapsed(),
        })
    }

    async fn await_health(
        &self,
        target: &SwapTarget,
        provider: &dyn crate::lifecycle::LifecycleProvider,
    ) -> HealthOutcome {
        for attempt in 1..=self.health_attempts {
            match provider.health_check(target).await {
                Ok(HealthStatus::Ready { peers }) => {
                    if let Some(count) = peers {
                        if count < self.min_peers {
                            tracing::warn!(
                                target = %target.id,
                                peers = count,
                                min_peers = self.min_peers,
                                "healthy but under-peered"
                            );
                        }
                    }
                    tracing::info!(target = %target.id, attempt, ?peers, "healthy");
                    return HealthOutcome::Healthy {
                        peers,
                        attempts: attempt,
                    };
                }
                Ok(HealthStatus::NotReady) => {
                    tracing::debug!(target = %target.id, attempt, "not ready yet");
                }
                Err(LifecycleError { message, .. }) => {
                    tracing::debug!(target = %target.id, attempt, error = %message, "health probe failed");
                }
            }
            if attempt < self.health_attempts && !self.health_delay.is_zero() {
                tokio::time::sleep(self.health_delay).await;
            }
        }
        tracing::warn!(
            target = %target.id,
            attempts = self.health_attempts,
            "health not confirmed; continuing, connectivity is expected to recover"
        );
        HealthOutcome::TimedOut {
            attempts: self.health_attempts,
        }
    }
}
