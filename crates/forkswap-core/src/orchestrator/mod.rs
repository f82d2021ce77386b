//! Orchestrator Loop
//!
//! Polls progress, walks the registry in order and executes the first due
//! target without a marker, one at a time, until every target is marked.
//!
//! # Shutdown
//!
//! `run` watches a `tokio::sync::watch` channel carrying `true` on shutdown.
//! The signal is honoured between steps and during sleeps; an execution in
//! flight always runs to completion and gets its marker first.

mod execute;
mod state;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::config::{FailurePolicy, OrchestratorSettings};
use crate::error::{ConfigError, ExecutionError, MarkerError, OrchestratorError};
use crate::lifecycle::LifecycleSet;
use crate::markers::{MarkerOutcome, MarkerStore};
use crate::progress::ProgressClock;
use crate::registry::TargetRegistry;
use crate::types::{Activation, ProgressSample, SwapTarget, TargetId};

pub use execute::{ExecutionReport, HealthOutcome, TargetExecutor};
pub use state::{allowed_transitions, validate_transition, LoopState};

/// One target executed during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutedTarget {
    /// Target identifier
    pub target: TargetId,
    /// Progress when it fired
    pub fired_at: ProgressSample,
    /// Outcome written to the marker
    pub outcome: MarkerOutcome,
}

/// What a call to [`Orchestrator::run`] did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Targets executed, in firing order
    pub executed: Vec<ExecutedTarget>,
    /// Progress polls performed
    pub polls: u64,
    /// Whether every target carries a marker
    pub finished: bool,
}

impl RunSummary {
    /// Targets whose marker records a failure
    pub fn failures(&self) -> impl Iterator<Item = &ExecutedTarget> {
        self.executed
            .iter()
            .filter(|e| matches!(e.outcome, MarkerOutcome::Failed { .. }))
    }
}

/// Result of one target in a manual swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualSwap {
    /// Already had a marker; no lifecycle call was made
    Skipped(TargetId),
    /// Executed and marked
    Executed(ExecutionReport),
}

/// Drives swap targets to completion
pub struct Orchestrator {
    registry: Arc<TargetRegistry>,
    markers: Arc<dyn MarkerStore>,
    clock: Arc<dyn ProgressClock>,
    executor: TargetExecutor,
    settings: OrchestratorSettings,
    state: LoopState,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("targets", &self.registry.len())
            .field("executor", &self.executor)
            .field("settings", &self.settings)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator
    ///
    /// # Errors
    /// Returns `ConfigError::MissingLifecycle` if a registered target's kind
    /// has no provider.
    pub fn new(
        registry: Arc<TargetRegistry>,
        markers: Arc<dyn MarkerStore>,
        clock: Arc<dyn ProgressClock>,
        lifecycles: LifecycleSet,
        settings: OrchestratorSettings,
    ) -> Result<Self, ConfigError> {
        if let Some(target) = registry.iter().find(|t| !lifecycles.contains(t.kind)) {
            return Err(ConfigError::MissingLifecycle(target.kind));
        }
        Ok(Self {
            executor: TargetExecutor::new(lifecycles, &settings),
            registry,
            markers,
            clock,
            settings,
            state: LoopState::Idle,
        })
    }

    /// Current loop state
    #[inline]
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Registry this orchestrator drives
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Run until every target has a marker or shutdown is signalled
    ///
    /// # Errors
    /// - `OrchestratorError::Execution` under `HaltOnFailure`
    /// - `OrchestratorError::Marker` if the marker store fails
    /// - `OrchestratorError::IllegalTransition` if called on a finished loop
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<RunSummary, OrchestratorError> {
        let mut summary = RunSummary::default();
        tracing::info!(
            targets = self.registry.len(),
            policy = ?self.settings.failure_policy,
            "orchestrator starting"
        );

        loop {
            if self.pending_count()? == 0 {
                self.transition(LoopState::Draining)?;
                self.transition(LoopState::Done)?;
                summary.finished = true;
                tracing::info!(executed = summary.executed.len(), "all targets complete");
                return Ok(summary);
            }
            if is_shutdown(&shutdown) {
                return self.interrupted(summary);
            }

            self.transition(LoopState::Polling)?;
            summary.polls += 1;
            let Some(progress) = self.clock.sample().await else {
                self.transition(LoopState::NoProgress)?;
                tracing::warn!(
                    retry_in = ?self.settings.no_progress_retry(),
                    "progress unavailable; no target evaluated"
                );
                if pause(&mut shutdown, self.settings.no_progress_retry()).await {
                    return self.interrupted(summary);
                }
                continue;
            };

            self.transition(LoopState::Evaluating)?;
            tracing::debug!(slot = progress.slot, epoch = progress.epoch, "evaluating targets");
            let Some(target) = self.next_due(progress)?.cloned() else {
                if self.pending_count()? == 0 {
                    continue;
                }
                if pause(&mut shutdown, self.settings.poll_interval()).await {
                    return self.interrupted(summary);
                }
                continue;
            };

            if !target.activation.is_at_boundary() {
                self.liveness_gate(&target, progress).await;
            }

            self.transition(LoopState::Executing)?;
            tracing::info!(
                target = %target.id,
                slot = progress.slot,
                epoch = progress.epoch,
                activation = %target.activation,
                "target due; executing"
            );
            let outcome = match self.executor.execute(&target).await {
                Ok(report) => report.marker_outcome(),
                Err(e) => match self.settings.failure_policy {
                    FailurePolicy::ContinueOnFailure => {
                        tracing::error!(target = %target.id, error = %e, "execution failed; marking and continuing");
                        MarkerOutcome::Failed { reason: e.reason() }
                    }
                    FailurePolicy::HaltOnFailure => {
                        tracing::error!(target = %target.id, error = %e, "execution failed; halting");
                        self.transition(LoopState::Stopped)?;
                        return Err(e.into());
                    }
                },
            };
            self.markers.mark_complete(&target.id, outcome.clone())?;
            summary.executed.push(ExecutedTarget {
                target: target.id.clone(),
                fired_at: progress,
                outcome,
            });

            self.transition(LoopState::Settling)?;
            if pause(&mut shutdown, self.settings.settle()).await {
                return self.interrupted(summary);
            }
        }
    }

    /// Execute the named targets now, in the given order
    ///
    /// Targets that already have a marker are skipped. The first failure
    /// stops the swap and is returned without writing a marker for it.
    ///
    /// # Errors
    /// - `OrchestratorError::Config` if any name is unknown (nothing runs)
    /// - `OrchestratorError::Execution` for the first failed target
    /// - `OrchestratorError::Marker` if the marker store fails
    pub async fn swap_now<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<ManualSwap>, OrchestratorError> {
        let targets: Vec<SwapTarget> = self.registry.resolve(names)?.into_iter().cloned().collect();
        let mut results = Vec::with_capacity(targets.len());
        for target in &targets {
            match self.execute_if_pending(target).await? {
                Some(report) => results.push(ManualSwap::Executed(report)),
                None => {
                    tracing::info!(target = %target.id, "already complete; skipping");
                    results.push(ManualSwap::Skipped(target.id.clone()));
                }
            }
        }
        Ok(results)
    }

    /// Execute a target unless it already has a marker
    ///
    /// Returns `None` without any lifecycle call when the marker exists.
    ///
    /// # Errors
    /// Propagates execution failures unmarked, and marker store failures.
    pub async fn execute_if_pending(&self, target: &SwapTarget) -> Result<Option<ExecutionReport>, OrchestratorError> {
        if self.markers.is_complete(&target.id)? {
            return Ok(None);
        }
        let report = self.executor.execute(target).await.map_err(|e: ExecutionError| {
            tracing::error!(target = %e.target(), error = %e, "manual swap failed");
            e
        })?;
        self.markers.mark_complete(&target.id, report.marker_outcome())?;
        Ok(Some(report))
    }

    fn transition(&mut self, to: LoopState) -> Result<(), OrchestratorError> {
        validate_transition(self.state, to)?;
        tracing::trace!(from = ?self.state, ?to, "loop transition");
        self.state = to;
        Ok(())
    }

    fn interrupted(&mut self, mut summary: RunSummary) -> Result<RunSummary, OrchestratorError> {
        self.transition(LoopState::Stopped)?;
        summary.finished = false;
        tracing::info!(executed = summary.executed.len(), "shutdown requested; leaving loop");
        Ok(summary)
    }

    fn pending_count(&self) -> Result<usize, MarkerError> {
        let mut pending = 0;
        for target in self.registry.iter() {
            if !self.markers.is_complete(&target.id)? {
                pending += 1;
            }
        }
        Ok(pending)
    }

    /// First target in registry order that is due and unmarked
    fn next_due(&self, progress: ProgressSample) -> Result<Option<&SwapTarget>, MarkerError> {
        for target in self.registry.iter() {
            if self.markers.is_complete(&target.id)? {
                continue;
            }
            let due = match &target.activation {
                Activation::Predicate { target_id } => self.markers.is_complete(target_id)?,
                rule => rule.is_due_at(progress),
            };
            if due {
                return Ok(Some(target));
            }
        }
        Ok(None)
    }

    /// Advisory finality check; never blocks execution
    async fn liveness_gate(&self, target: &SwapTarget, progress: ProgressSample) {
        match self.clock.finalized_epoch().await {
            Some(finalized) => {
                let lag = progress.epoch.saturating_sub(finalized);
                if lag > self.settings.finality_lag_warn_epochs {
                    tracing::warn!(
                        target = %target.id,
                        epoch = progress.epoch,
                        finalized,
                        lag,
                        "finality lagging; swapping anyway"
                    );
                }
            }
            None => {
                tracing::warn!(target = %target.id, "finality unknown; swapping anyway");
            }
        }
    }
}

fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Sleep for `duration` unless shutdown arrives first; returns whether it did
async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if is_shutdown(shutdown) {
        return true;
    }
    if duration.is_zero() {
        tokio::task::yield_now().await;
        return is_shutdown(shutdown);
    }
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return is_shutdown(shutdown),
            changed = shutdown.changed() => match changed {
                Ok(()) if is_shutdown(shutdown) => return true,
                Ok(()) => {}
                // sender gone: no shutdown can arrive any more
                Err(_) => {
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}
