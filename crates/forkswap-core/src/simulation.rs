//! Swap Simulator
//!
//! Runs the real orchestrator loop against:
//! 1. A simulated clock advancing a fixed number of slots per poll
//! 2. An in-memory marker store
//! 3. A seeded lifecycle that fails `start` with a configured probability
//!
//! Invariants checked on the resulting trigger log:
//! - no target fires before its threshold
//! - predicate targets fire after their dependency
//! - every target fires at most once

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::sync::watch;

use crate::config::{FailurePolicy, OrchestratorSettings};
use crate::error::{LifecycleError, OrchestratorError};
use crate::lifecycle::{HealthStatus, LifecycleProvider, LifecycleSet};
use crate::markers::{InMemoryMarkerStore, MarkerOutcome};
use crate::orchestrator::{ExecutedTarget, Orchestrator, RunSummary};
use crate::progress::ProgressClock;
use crate::registry::TargetRegistry;
use crate::types::{Activation, SwapTarget, TargetId, VersionRef};

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Probability that a `start` call fails, clamped to `[0, 1]`
    pub fail_rate: f64,
    /// Head slot at the first poll
    pub start_slot: u64,
    /// Slots the clock advances per poll
    pub slots_per_poll: u64,
    /// Epochs finality trails the head
    pub finality_lag_epochs: u64,
    /// Failure policy of the simulated loop
    pub failure_policy: FailurePolicy,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            fail_rate: 0.0,
            start_slot: 0,
            slots_per_poll: 1,
            finality_lag_epochs: 2,
            failure_policy: FailurePolicy::ContinueOnFailure,
        }
    }
}

/// Clock that advances on every head-slot read
#[derive(Debug)]
pub struct SimulatedClock {
    next_slot: AtomicU64,
    step: u64,
    slots_per_epoch: u64,
    finality_lag_epochs: u64,
}

impl SimulatedClock {
    /// Create a clock starting at `start_slot`
    #[must_use]
    pub fn new(start_slot: u64, step: u64, slots_per_epoch: u64, finality_lag_epochs: u64) -> Self {
        Self {
            next_slot: AtomicU64::new(start_slot),
            step,
            slots_per_epoch: slots_per_epoch.max(1),
            finality_lag_epochs,
        }
    }

    /// Slot the next read will return
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.next_slot.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProgressClock for SimulatedClock {
    async fn current_slot(&self) -> Option<u64> {
        Some(self.next_slot.fetch_add(self.step, Ordering::SeqCst))
    }

    async fn finalized_epoch(&self) -> Option<u64> {
        let head_epoch = self.peek() / self.slots_per_epoch;
        Some(head_epoch.saturating_sub(self.finality_lag_epochs))
    }

    fn slots_per_epoch(&self) -> u64 {
        self.slots_per_epoch
    }
}

/// One recorded lifecycle call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleCall {
    /// Operation name
    pub operation: &'static str,
    /// Target it was called for
    pub target: TargetId,
}

/// Lifecycle with seeded fault injection on `start`
#[derive(Debug)]
pub struct FaultyLifecycle {
    rng: Mutex<StdRng>,
    fail_rate: f64,
    calls: Mutex<Vec<LifecycleCall>>,
}

impl FaultyLifecycle {
    /// Create a lifecycle failing `start` with probability `fail_rate`
    #[must_use]
    pub fn new(seed: u64, fail_rate: f64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            fail_rate: if fail_rate.is_nan() { 0.0 } else { fail_rate.clamp(0.0, 1.0) },
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Calls made so far
    #[must_use]
    pub fn calls(&self) -> Vec<LifecycleCall> {
        self.calls.lock().clone()
    }

    fn record(&self, operation: &'static str, target: &SwapTarget) {
        self.calls.lock().push(LifecycleCall {
            operation,
            target: target.id.clone(),
        });
    }
}

#[async_trait::async_trait]
impl LifecycleProvider for FaultyLifecycle {
    async fn stop(&self, target: &SwapTarget) -> Result<(), LifecycleError> {
        self.record("stop", target);
        Ok(())
    }

    async fn reinitialize(&self, target: &SwapTarget) -> Result<(), LifecycleError> {
        self.record("reinitialize", target);
        Ok(())
    }

    async fn start(&self, target: &SwapTarget, version: &VersionRef) -> Result<(), LifecycleError> {
        self.record("start", target);
        if self.rng.lock().gen_bool(self.fail_rate) {
            return Err(LifecycleError::new("start", format!("injected failure starting {version}")));
        }
        Ok(())
    }

    async fn health_check(&self, target: &SwapTarget) -> Result<HealthStatus, LifecycleError> {
        self.record("health", target);
        Ok(HealthStatus::Ready { peers: Some(3) })
    }
}

/// A violation detected in the trigger log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Target fired before its threshold
    FiredEarly {
        /// Target
        target: TargetId,
        /// Slot at which it fired
        slot: u64,
    },
    /// Predicate target fired before its dependency
    FiredBeforeDependency {
        /// Dependent target
        target: TargetId,
        /// Dependency
        dependency: TargetId,
    },
    /// Target fired more than once
    FiredTwice(TargetId),
    /// Loop ended with targets still pending
    Unfinished,
}

/// Final report from the simulator
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Configuration used
    pub config: SimulationConfig,
    /// Loop summary
    pub summary: RunSummary,
    /// Lifecycle calls made
    pub lifecycle_calls: usize,
    /// Detected violations
    pub violations: Vec<Violation>,
}

impl SimulationReport {
    /// Check if the run produced no violations
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        report.push_str("=== forkswap simulation ===\n\n");
        let _ = writeln!(report, "Seed: {}", self.config.seed);
        let _ = writeln!(report, "Fail rate: {}", self.config.fail_rate);
        let _ = writeln!(report, "Start slot: {}", self.config.start_slot);
        let _ = writeln!(report, "Polls: {}", self.summary.polls);
        let _ = writeln!(report, "Lifecycle calls: {}", self.lifecycle_calls);

        report.push_str("\n=== Trigger log ===\n");
        for (i, ExecutedTarget { target, fired_at, outcome }) in self.summary.executed.iter().enumerate() {
            let outcome = match outcome {
                MarkerOutcome::Succeeded => "ok".to_string(),
                MarkerOutcome::Degraded { reason } => format!("degraded: {reason}"),
                MarkerOutcome::Failed { reason } => format!("FAILED: {reason}"),
            };
            let _ = writeln!(report, "{:>3}. {fired_at:<22} {target:<16} {outcome}", i + 1);
        }

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. {v:?}", i + 1);
            }
        }

        let _ = writeln!(report, "\n=== Result: {} ===", if self.passed() { "PASS" } else { "FAIL" });
        report
    }
}

/// Run the simulator over a registry
///
/// # Errors
/// Returns `OrchestratorError` if the loop fails, which only happens under
/// `HaltOnFailure` with an injected failure.
pub async fn run_simulation(
    registry: Arc<TargetRegistry>,
    config: SimulationConfig,
) -> Result<SimulationReport, OrchestratorError> {
    let clock = Arc::new(SimulatedClock::new(
        config.start_slot,
        config.slots_per_poll.max(1),
        registry.slots_per_epoch(),
        config.finality_lag_epochs,
    ));
    let lifecycle = Arc::new(FaultyLifecycle::new(config.seed, config.fail_rate));
    let settings = OrchestratorSettings::immediate()
        .with_failure_policy(config.failure_policy)
        .with_health(1, 0);

    let mut orchestrator = Orchestrator::new(
        Arc::clone(&registry),
        Arc::new(InMemoryMarkerStore::new()),
        clock,
        LifecycleSet::uniform(lifecycle.clone()),
        settings,
    )?;

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let summary = orchestrator.run(shutdown_rx).await?;
    let violations = check_trigger_log(&registry, &summary);
    let lifecycle_calls = lifecycle.calls().len();

    tracing::info!(
        seed = config.seed,
        executed = summary.executed.len(),
        violations = violations.len(),
        "simulation finished"
    );
    Ok(SimulationReport {
        config,
        summary,
        lifecycle_calls,
        violations,
    })
}

fn check_trigger_log(registry: &TargetRegistry, summary: &RunSummary) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut fired_at: HashMap<&TargetId, usize> = HashMap::new();

    for (position, executed) in summary.executed.iter().enumerate() {
        if fired_at.insert(&executed.target, position).is_some() {
            violations.push(Violation::FiredTwice(executed.target.clone()));
            continue;
        }
        let Some(target) = registry.get(&executed.target) else {
            continue;
        };
        match &target.activation {
            Activation::Predicate { target_id } => {
                if !fired_at.contains_key(target_id) {
                    violations.push(Violation::FiredBeforeDependency {
                        target: target.id.clone(),
                        dependency: target_id.clone(),
                    });
                }
            }
            rule => {
                if !rule.is_due_at(executed.fired_at) {
                    violations.push(Violation::FiredEarly {
                        target: target.id.clone(),
                        slot: executed.fired_at.slot,
                    });
                }
            }
        }
    }

    if !summary.finished {
        violations.push(Violation::Unfinished);
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetKind;

    fn id(raw: &str) -> TargetId {
        TargetId::new(raw).unwrap()
    }

    fn registry() -> Arc<TargetRegistry> {
        let targets = vec![
            SwapTarget::new(
                id("node1-el"),
                TargetKind::ExecutionLayer,
                Activation::EpochThreshold { epoch: 2 },
                VersionRef("el:v2".into()),
            ),
            SwapTarget::new(
                id("node1-cl"),
                TargetKind::ConsensusLayer,
                Activation::Predicate {
                    target_id: id("node1-el"),
                },
                VersionRef("cl:v2".into()),
            ),
            SwapTarget::new(
                id("node2-cl"),
                TargetKind::ConsensusLayer,
                Activation::SlotLeadThreshold {
                    boundary_slot: 96,
                    lead_slots: 10,
                },
                VersionRef("cl:v2".into()),
            ),
        ];
        Arc::new(TargetRegistry::from_targets(targets, 32).unwrap())
    }

    #[tokio::test]
    async fn clean_run_fires_everything_in_order() {
        let report = run_simulation(registry(), SimulationConfig::default()).await.unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        let order: Vec<_> = report.summary.executed.iter().map(|e| e.target.as_str()).collect();
        assert_eq!(order, ["node1-el", "node1-cl", "node2-cl"]);
        assert_eq!(report.summary.executed[0].fired_at.slot, 64);
        assert_eq!(report.summary.executed[2].fired_at.slot, 86);
    }

    #[tokio::test]
    async fn certain_failure_still_drains_under_continue() {
        let config = SimulationConfig {
            fail_rate: 1.0,
            start_slot: 200,
            ..SimulationConfig::default()
        };
        let report = run_simulation(registry(), config).await.unwrap();
        assert!(report.passed());
        assert_eq!(report.summary.failures().count(), 3);
        let text = report.generate_text();
        assert!(text.contains("FAILED: start failed: injected failure starting el:v2"), "{text}");
        assert!(!text.contains("start failed: start failed"), "{text}");
    }

    #[tokio::test]
    async fn certain_failure_halts_under_halt_policy() {
        let config = SimulationConfig {
            fail_rate: 1.0,
            start_slot: 200,
            failure_policy: FailurePolicy::HaltOnFailure,
            ..SimulationConfig::default()
        };
        let err = run_simulation(registry(), config).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Execution(_)));
    }

    #[tokio::test]
    async fn same_seed_same_log() {
        let config = SimulationConfig {
            fail_rate: 0.5,
            seed: 7,
            ..SimulationConfig::default()
        };
        let a = run_simulation(registry(), config.clone()).await.unwrap();
        let b = run_simulation(registry(), config).await.unwrap();
        assert_eq!(a.summary.executed, b.summary.executed);
    }
}
