//! Subcommand wiring
//!
//! Everything that can be checked before a lifecycle call happens here:
//! configuration, planning, prerequisite artifacts, lifecycle commands for
//! every kind in use, progress sources and the marker directory. Any of
//! these failing ends the process with [`Exit::Failure`] before a target
//! executes.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use forkswap_backend::{sources_from_urls, CommandLifecycle};
use forkswap_core::config::SwapConfig;
use forkswap_core::markers::{FileMarkerStore, MarkerOutcome};
use forkswap_core::orchestrator::{ManualSwap, Orchestrator};
use forkswap_core::progress::{ProgressClock, RedundantClock};
use forkswap_core::registry::TargetRegistry;
use forkswap_core::simulation::{run_simulation, SimulationConfig};
use forkswap_core::status::StatusReport;
use forkswap_core::types::{Activation, TargetId, TargetKind};
use serde::Serialize;
use tokio::sync::watch;

use crate::cli::{Action, Invocation};

/// Process outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Finished normally
    Success,
    /// Configuration error, failed swap or failed simulation
    Failure,
    /// Daemon stopped by a signal before every target completed
    Interrupted,
}

impl Exit {
    /// Process exit code
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Interrupted => 130,
        }
    }
}

/// Loaded and planned configuration
#[derive(Debug, Clone)]
pub struct Deployment {
    config: SwapConfig,
    registry: Arc<TargetRegistry>,
}

impl Deployment {
    /// Load, validate and plan a configuration file
    ///
    /// # Errors
    /// Fails on any configuration or planning error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = SwapConfig::load(path).with_context(|| format!("loading {}", path.display()))?;
        Self::from_config(config)
    }

    /// Plan an already parsed configuration
    ///
    /// # Errors
    /// Fails on any planning error.
    pub fn from_config(config: SwapConfig) -> anyhow::Result<Self> {
        let registry = TargetRegistry::from_config(&config).context("planning targets")?;
        Ok(Self {
            config,
            registry: Arc::new(registry),
        })
    }

    /// Parsed configuration
    #[must_use]
    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    /// Planned targets
    #[must_use]
    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    fn markers(&self) -> anyhow::Result<Arc<FileMarkerStore>> {
        let dir = &self.config.markers.dir;
        let store = FileMarkerStore::open(dir).with_context(|| format!("opening marker store {}", dir.display()))?;
        Ok(Arc::new(store))
    }

    fn clock(&self) -> anyhow::Result<RedundantClock> {
        let progress = &self.config.progress;
        let sources = sources_from_urls(&progress.sources, progress.timeout()).context("progress sources")?;
        Ok(RedundantClock::new(
            sources,
            progress.timeout(),
            self.config.network.slots_per_epoch,
        ))
    }

    /// Build an orchestrator with every production collaborator
    ///
    /// # Errors
    /// Fails if a prerequisite is missing, a kind in use has no lifecycle
    /// commands, no progress source is configured or the marker store
    /// cannot be opened.
    pub fn orchestrator(&self) -> anyhow::Result<Orchestrator> {
        self.config
            .check_prerequisites()
            .context("checking prerequisites")?;
        let lifecycles = CommandLifecycle::set_from_config(&self.config).context("lifecycle commands")?;
        let clock = self.clock()?;
        let markers = self.markers()?;
        let orchestrator = Orchestrator::new(
            Arc::clone(&self.registry),
            markers,
            Arc::new(clock),
            lifecycles,
            self.config.orchestrator.clone(),
        )?;
        Ok(orchestrator)
    }
}

/// Run one invocation, writing reports to `out`
///
/// # Errors
/// Returns configuration errors, marker store errors and the first failed
/// target of a manual swap.
pub async fn run(invocation: Invocation, shutdown: watch::Receiver<bool>, out: &mut dyn Write) -> anyhow::Result<Exit> {
    let deployment = Deployment::load(&invocation.config)?;
    match invocation.action {
        Action::Swap { targets } => swap(&deployment, &targets, out).await,
        Action::Daemon => daemon(&deployment, shutdown).await,
        Action::Status { json } => status(&deployment, json, out).await,
        Action::Plan { json } => plan(&deployment, json, out),
        Action::Reset { targets, all } => reset(&deployment, &targets, all, out),
        Action::Simulate {
            seed,
            fail_rate,
            start_slot,
        } => {
            let config = SimulationConfig {
                seed,
                fail_rate,
                start_slot,
                failure_policy: deployment.config.orchestrator.failure_policy,
                ..SimulationConfig::default()
            };
            simulate(&deployment, config, out).await
        }
    }
}

/// Execute named targets now
///
/// # Errors
/// Fails on an unknown name or the first failing target.
pub async fn swap(deployment: &Deployment, targets: &[String], out: &mut dyn Write) -> anyhow::Result<Exit> {
    let orchestrator = deployment.orchestrator()?;
    let results = orchestrator.swap_now(targets).await.context("manual swap")?;
    for result in results {
        match result {
            ManualSwap::Skipped(id) => writeln!(out, "{id}: already complete, skipped")?,
            ManualSwap::Executed(report) => writeln!(
                out,
                "{}: {} in {:.1}s",
                report.target,
                describe(&report.marker_outcome()),
                report.elapsed.as_secs_f64()
            )?,
        }
    }
    Ok(Exit::Success)
}

/// Run the loop until done or interrupted
///
/// # Errors
/// Fails on setup errors, marker store errors or an execution failure
/// under the halt-on-failure policy.
pub async fn daemon(deployment: &Deployment, shutdown: watch::Receiver<bool>) -> anyhow::Result<Exit> {
    let mut orchestrator = deployment.orchestrator()?;
    tracing::info!(
        targets = deployment.registry.len(),
        policy = ?deployment.config.orchestrator.failure_policy,
        "starting swap loop"
    );
    let summary = orchestrator.run(shutdown).await.context("swap loop")?;

    for failed in summary.failures() {
        tracing::warn!(target = %failed.target, outcome = ?failed.outcome, "target recorded as failed");
    }
    tracing::info!(
        executed = summary.executed.len(),
        polls = summary.polls,
        finished = summary.finished,
        "swap loop stopped"
    );
    Ok(if summary.finished { Exit::Success } else { Exit::Interrupted })
}

/// Print the status report
///
/// Progress is read only when sources are configured; without them every
/// pending target shows an unknown ETA.
///
/// # Errors
/// Fails if the marker store cannot be read.
pub async fn status(deployment: &Deployment, json: bool, out: &mut dyn Write) -> anyhow::Result<Exit> {
    let markers = deployment.markers()?;
    let progress = if deployment.config.progress.sources.is_empty() {
        None
    } else {
        deployment.clock()?.sample().await
    };
    let report = StatusReport::build(
        &deployment.registry,
        markers.as_ref(),
        progress,
        deployment.config.network.seconds_per_slot,
    )
    .context("reading markers")?;

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    } else {
        write!(out, "{}", report.render_text())?;
    }
    Ok(Exit::Success)
}

/// One planned target
#[derive(Debug, Serialize)]
struct PlanRow<'a> {
    position: usize,
    id: &'a TargetId,
    kind: TargetKind,
    activation: &'a Activation,
    trigger_slot: Option<u64>,
    deadline_epoch: Option<u64>,
}

/// Print planned thresholds in registry order
///
/// # Errors
/// Fails only on output errors.
pub fn plan(deployment: &Deployment, json: bool, out: &mut dyn Write) -> anyhow::Result<Exit> {
    let spe = deployment.registry.slots_per_epoch();
    let rows: Vec<PlanRow<'_>> = deployment
        .registry
        .iter()
        .enumerate()
        .map(|(i, target)| PlanRow {
            position: i + 1,
            id: &target.id,
            kind: target.kind,
            activation: &target.activation,
            trigger_slot: target.activation.trigger_slot(spe),
            deadline_epoch: target.deadline_epoch,
        })
        .collect();

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
        return Ok(Exit::Success);
    }

    writeln!(out, "{:<3} {:<20} {:<16} {:<28} DEADLINE", "#", "TARGET", "KIND", "ACTIVATION")?;
    for row in &rows {
        let deadline = row
            .deadline_epoch
            .map_or_else(|| "-".to_string(), |d| format!("epoch {d}"));
        writeln!(
            out,
            "{:<3} {:<20} {:<16} {:<28} {deadline}",
            row.position,
            row.id.as_str(),
            row.kind.as_str(),
            row.activation.to_string(),
        )?;
    }
    Ok(Exit::Success)
}

/// Delete markers
///
/// # Errors
/// Fails on an unknown target or a marker store error.
pub fn reset(deployment: &Deployment, targets: &[String], all: bool, out: &mut dyn Write) -> anyhow::Result<Exit> {
    let markers = deployment.markers()?;
    if all {
        let removed = markers.reset_all().context("resetting markers")?;
        tracing::info!(removed, "reset all markers");
        writeln!(out, "removed {removed} marker(s)")?;
        return Ok(Exit::Success);
    }

    let resolved = deployment.registry.resolve(targets)?;
    for target in resolved {
        let removed = markers
            .reset(&target.id)
            .with_context(|| format!("resetting {}", target.id))?;
        if removed {
            tracing::info!(target = %target.id, "marker removed");
            writeln!(out, "{}: marker removed", target.id)?;
        } else {
            writeln!(out, "{}: no marker", target.id)?;
        }
    }
    Ok(Exit::Success)
}

/// Run the simulator over the configured targets
///
/// # Errors
/// Fails if the simulated loop halts on an injected failure.
pub async fn simulate(deployment: &Deployment, config: SimulationConfig, out: &mut dyn Write) -> anyhow::Result<Exit> {
    let report = run_simulation(Arc::clone(&deployment.registry), config)
        .await
        .context("simulation")?;
    write!(out, "{}", report.generate_text())?;
    Ok(if report.passed() { Exit::Success } else { Exit::Failure })
}

fn describe(outcome: &MarkerOutcome) -> String {
    match outcome {
        MarkerOutcome::Succeeded => "swapped".to_string(),
        MarkerOutcome::Degraded { reason } => format!("swapped, degraded ({reason})"),
        MarkerOutcome::Failed { reason } => format!("failed ({reason})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(Exit::Success.code(), 0);
        assert_eq!(Exit::Failure.code(), 1);
        assert_eq!(Exit::Interrupted.code(), 130);
    }

    #[test]
    fn outcome_descriptions() {
        assert_eq!(describe(&MarkerOutcome::Succeeded), "swapped");
        assert_eq!(
            describe(&MarkerOutcome::Degraded { reason: "slow".into() }),
            "swapped, degraded (slow)"
        );
    }
}
