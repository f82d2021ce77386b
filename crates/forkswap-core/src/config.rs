//! Orchestrator configuration
//!
//! Configuration is read once from a TOML document before anything runs.
//! Every section except `[forks]` and the `[[target]]` list has defaults.
//!
//! ```toml
//! [network]
//! slots_per_epoch = 32
//! seconds_per_slot = 6
//!
//! [forks]
//! electra = 4
//! fulu = 7
//!
//! [[target]]
//! id = "node1-el"
//! kind = "execution-layer"
//! version = "geth:v1.15.0"
//! schedule = "window"
//! window_start = "electra"
//! window_end = 6
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::planner::Fraction;
use crate::types::{TargetId, TargetKind, VersionRef};

/// Root configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapConfig {
    /// Network timing
    #[serde(default)]
    pub network: NetworkSettings,
    /// Fork name to activation epoch
    #[serde(default)]
    pub forks: IndexMap<String, u64>,
    /// Lead defaults for at-boundary targets
    #[serde(default)]
    pub boundary: BoundaryDefaults,
    /// Loop timings and failure policy
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    /// Redundant progress sources
    #[serde(default)]
    pub progress: ProgressSettings,
    /// Marker store location
    #[serde(default)]
    pub markers: MarkerSettings,
    /// Lifecycle command sets keyed by kebab-case target kind
    #[serde(default)]
    pub lifecycle: BTreeMap<String, CommandSet>,
    /// Artifacts that must exist before anything runs
    #[serde(default)]
    pub prerequisites: Vec<PathBuf>,
    /// Swap targets, in registry order
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetSpec>,
}

impl SwapConfig {
    /// Load and validate configuration from a file
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), targets = config.targets.len(), "loaded configuration");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    /// Returns `ConfigError` on syntax or validation failure.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check static invariants that do not need planning
    ///
    /// # Errors
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.slots_per_epoch == 0 {
            return Err(ConfigError::invalid("network.slots_per_epoch", "must be positive"));
        }
        if self.network.seconds_per_slot == 0 {
            return Err(ConfigError::invalid("network.seconds_per_slot", "must be positive"));
        }
        if self.orchestrator.health_attempts == 0 {
            return Err(ConfigError::invalid("orchestrator.health_attempts", "must be positive"));
        }
        for (kind, commands) in &self.lifecycle {
            if !TargetKind::ALL.iter().any(|k| k.as_str() == kind) {
                return Err(ConfigError::invalid(
                    format!("lifecycle.{kind}"),
                    "not a target kind",
                ));
            }
            if commands.stop.is_empty() || commands.start.is_empty() {
                return Err(ConfigError::invalid(
                    format!("lifecycle.{kind}"),
                    "stop and start commands are required",
                ));
            }
        }
        Ok(())
    }

    /// Verify every prerequisite artifact exists
    ///
    /// Covers the global list plus each target's own list.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingArtifact` for the first missing path.
    pub fn check_prerequisites(&self) -> Result<(), ConfigError> {
        let per_target = self.targets.iter().flat_map(|t| t.prerequisites.iter());
        for path in self.prerequisites.iter().chain(per_target) {
            if !path.exists() {
                return Err(ConfigError::MissingArtifact(path.clone()));
            }
        }
        Ok(())
    }

    /// Command set configured for a kind
    #[must_use]
    pub fn lifecycle_for(&self, kind: TargetKind) -> Option<&CommandSet> {
        self.lifecycle.get(kind.as_str())
    }

    /// Kinds that have at least one target
    #[must_use]
    pub fn kinds_in_use(&self) -> Vec<TargetKind> {
        let mut kinds: Vec<TargetKind> = self.targets.iter().map(|t| t.kind).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

/// Network timing
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Slots per epoch
    pub slots_per_epoch: u64,
    /// Wall-clock seconds per slot, for ETA estimates
    pub seconds_per_slot: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            slots_per_epoch: 32,
            seconds_per_slot: 12,
        }
    }
}

/// Lead defaults for at-boundary targets without an explicit lead
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryDefaults {
    /// Lead of the first target at a boundary
    pub default_lead_slots: u64,
    /// Decrement for each following target at the same boundary
    pub lead_step: u64,
}

impl Default for BoundaryDefaults {
    fn default() -> Self {
        Self {
            default_lead_slots: 20,
            lead_step: 5,
        }
    }
}

/// What the loop does when a target's execution fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Record the failure as a marker and keep going
    #[default]
    ContinueOnFailure,
    /// Leave no marker and stop the loop with the error
    HaltOnFailure,
}

/// Loop timings and failure policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Delay between polls when nothing was due
    pub poll_interval_secs: u64,
    /// Pause after an execution before re-polling
    pub settle_secs: u64,
    /// Delay before retrying when no source answered
    pub no_progress_retry_secs: u64,
    /// Finality lag that triggers the liveness warning
    pub finality_lag_warn_epochs: u64,
    /// Failure handling in the daemon loop
    pub failure_policy: FailurePolicy,
    /// Health probes before giving up
    pub health_attempts: u32,
    /// Delay between health probes
    pub health_delay_secs: u64,
    /// Peer count below which a healthy component still gets a warning
    pub min_peers: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 6,
            settle_secs: 10,
            no_progress_retry_secs: 6,
            finality_lag_warn_epochs: 3,
            failure_policy: FailurePolicy::ContinueOnFailure,
            health_attempts: 30,
            health_delay_secs: 2,
            min_peers: 1,
        }
    }
}

impl OrchestratorSettings {
    /// Settings with every delay set to zero
    ///
    /// Used by simulation, where progress is synthetic.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            poll_interval_secs: 0,
            settle_secs: 0,
            no_progress_retry_secs: 0,
            health_delay_secs: 0,
            ..Self::default()
        }
    }

    /// With failure policy
    #[inline]
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// With health retry budget
    #[inline]
    #[must_use]
    pub fn with_health(mut self, attempts: u32, delay_secs: u64) -> Self {
        self.health_attempts = attempts;
        self.health_delay_secs = delay_secs;
        self
    }

    /// Poll interval as a duration
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Settle interval as a duration
    #[inline]
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    /// No-progress retry delay as a duration
    #[inline]
    #[must_use]
    pub fn no_progress_retry(&self) -> Duration {
        Duration::from_secs(self.no_progress_retry_secs)
    }

    /// Health probe delay as a duration
    #[inline]
    #[must_use]
    pub fn health_delay(&self) -> Duration {
        Duration::from_secs(self.health_delay_secs)
    }
}

/// Redundant progress sources
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSettings {
    /// Beacon API base URLs, in preference order
    pub sources: Vec<String>,
    /// Per-source timeout
    pub timeout_ms: u64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            timeout_ms: 2_000,
        }
    }
}

impl ProgressSettings {
    /// Per-source timeout as a duration
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Marker store location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerSettings {
    /// Directory holding one marker document per target
    pub dir: PathBuf,
}

impl Default for MarkerSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("state/markers"),
        }
    }
}

/// Commands run for each lifecycle operation of one target kind
///
/// Each command is an argv vector. `{target}`, `{version}` and any key of
/// the target's `vars` are substituted before spawning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandSet {
    /// Stops the legacy component
    pub stop: Vec<String>,
    /// Reinitializes shared state; absent means no-op
    #[serde(default)]
    pub reinitialize: Option<Vec<String>>,
    /// Starts the new component
    pub start: Vec<String>,
    /// Readiness probe; absent means ready as soon as start returns
    #[serde(default)]
    pub health: Option<Vec<String>>,
    /// Upper bound on any single command
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Epoch given as a number or a fork name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EpochRef {
    /// Literal epoch
    Epoch(u64),
    /// Activation epoch of a named fork
    Fork(String),
}

impl EpochRef {
    /// Resolve against the fork table
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownFork` for unknown names.
    pub fn resolve(&self, forks: &IndexMap<String, u64>) -> Result<u64, ConfigError> {
        match self {
            Self::Epoch(epoch) => Ok(*epoch),
            Self::Fork(name) => forks
                .get(name)
                .copied()
                .ok_or_else(|| ConfigError::UnknownFork(name.clone())),
        }
    }
}

/// How a target's activation is derived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schedule", rename_all = "kebab-case")]
pub enum SchedulePolicy {
    /// Staggered inside an open window `[window_start, window_end)`
    Window {
        /// First epoch of the window
        window_start: EpochRef,
        /// First epoch after the window
        window_end: EpochRef,
        /// Explicit position inside the window
        #[serde(default)]
        fraction: Option<Fraction>,
    },
    /// Narrow slot range just before a fork boundary
    Boundary {
        /// Boundary epoch
        boundary: EpochRef,
        /// Startup-latency budget; defaults are assigned when absent
        #[serde(default)]
        lead_slots: Option<u64>,
    },
    /// Fixed epoch
    Epoch {
        /// Epoch at which the target is due
        epoch: EpochRef,
    },
    /// After another target completes
    After {
        /// Target to wait for
        after: TargetId,
    },
}

/// One `[[target]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Stable identifier
    pub id: TargetId,
    /// What gets replaced
    pub kind: TargetKind,
    /// Build to start
    pub version: VersionRef,
    /// Activation policy
    #[serde(flatten)]
    pub schedule: SchedulePolicy,
    /// Overrides the derived deadline
    #[serde(default)]
    pub deadline: Option<EpochRef>,
    /// Overrides the kind default
    #[serde(default)]
    pub reinitialize: Option<bool>,
    /// Pass-through lifecycle values
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// Artifacts this target needs
    #[serde(default)]
    pub prerequisites: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[network]
slots_per_epoch = 32
seconds_per_slot = 6

[forks]
electra = 4
fulu = 7

[orchestrator]
failure_policy = "halt-on-failure"

[progress]
sources = ["http://127.0.0.1:5052", "http://127.0.0.1:5053"]

[lifecycle.execution-layer]
stop = ["docker", "stop", "{container}"]
start = ["docker", "start", "{container}"]

[[target]]
id = "node1-el"
kind = "execution-layer"
version = "geth:v1.15.0"
schedule = "window"
window_start = "electra"
window_end = 6
fraction = "1/3"
vars = { container = "node1-geth" }

[[target]]
id = "node1-cl"
kind = "consensus-layer"
version = "lighthouse:v7"
schedule = "boundary"
boundary = "fulu"
lead_slots = 10

[[target]]
id = "refresh"
kind = "network-refresh"
version = "n/a"
schedule = "after"
after = "node1-cl"
"#;

    #[test]
    fn parses_full_document() {
        let config = SwapConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.network.seconds_per_slot, 6);
        assert_eq!(config.forks["fulu"], 7);
        assert_eq!(config.orchestrator.failure_policy, FailurePolicy::HaltOnFailure);
        assert_eq!(config.orchestrator.settle_secs, 10);
        assert_eq!(config.progress.sources.len(), 2);
        assert_eq!(config.targets.len(), 3);
        assert_eq!(
            config.targets[0].schedule,
            SchedulePolicy::Window {
                window_start: EpochRef::Fork("electra".into()),
                window_end: EpochRef::Epoch(6),
                fraction: Some("1/3".parse().unwrap()),
            }
        );
        assert_eq!(config.targets[0].vars["container"], "node1-geth");
        assert_eq!(
            config.targets[2].schedule,
            SchedulePolicy::After {
                after: TargetId::new("node1-cl").unwrap()
            }
        );
        assert_eq!(config.kinds_in_use().len(), 3);
        assert!(config.lifecycle_for(TargetKind::ExecutionLayer).is_some());
        assert!(config.lifecycle_for(TargetKind::ConsensusLayer).is_none());
    }

    #[test]
    fn rejects_zero_slots_per_epoch() {
        let err = SwapConfig::from_toml_str("[network]\nslots_per_epoch = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn rejects_unknown_lifecycle_kind() {
        let raw = "[lifecycle.validator]\nstop = [\"true\"]\nstart = [\"true\"]\n";
        assert!(matches!(
            SwapConfig::from_toml_str(raw),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn rejects_bad_target_id() {
        let raw = r#"
[[target]]
id = "../escape"
kind = "consensus-layer"
version = "x"
schedule = "epoch"
epoch = 3
"#;
        assert!(SwapConfig::from_toml_str(raw).is_err());
    }

    #[test]
    fn resolves_epoch_refs() {
        let mut forks = IndexMap::new();
        forks.insert("fulu".to_string(), 7);
        assert_eq!(EpochRef::Epoch(3).resolve(&forks).unwrap(), 3);
        assert_eq!(EpochRef::Fork("fulu".into()).resolve(&forks).unwrap(), 7);
        assert!(matches!(
            EpochRef::Fork("osaka".into()).resolve(&forks),
            Err(ConfigError::UnknownFork(_))
        ));
    }

    #[test]
    fn missing_prerequisite_is_reported() {
        let mut config = SwapConfig::from_toml_str("").unwrap();
        config.prerequisites.push(PathBuf::from("/definitely/not/here/genesis.json"));
        assert!(matches!(
            config.check_prerequisites(),
            Err(ConfigError::MissingArtifact(_))
        ));
    }
}
