//! Core types for the swap orchestrator
//!
//! Defines the fundamental vocabulary shared by every component:
//! - Target identifiers, kinds and version references
//! - Activation rules produced by the planner
//! - Progress samples read from the network

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Stable identifier of a swap target (e.g. `node1-el`)
///
/// Identifiers double as marker file names, so they are restricted to
/// ASCII alphanumerics plus `.`, `_` and `-`, and may not start with
/// punctuation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetId(String);

impl TargetId {
    /// Parse and validate a target identifier
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidTargetId` for empty or unsafe identifiers.
    pub fn new(raw: impl Into<String>) -> Result<Self, ConfigError> {
        let raw = raw.into();
        let mut chars = raw.chars();
        let valid_head = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
        let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if valid_head && valid_tail {
            Ok(Self(raw))
        } else {
            Err(ConfigError::InvalidTargetId(raw))
        }
    }

    /// Borrow the identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TargetId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TargetId> for String {
    fn from(value: TargetId) -> Self {
        value.0
    }
}

impl FromStr for TargetId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a swap target replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    /// Execution-layer client replacement
    ExecutionLayer,
    /// Consensus-layer client replacement
    ConsensusLayer,
    /// Intermediate build that bridges an on-disk schema migration
    MidStepMigration,
    /// Final peer/network refresh after the other swaps
    NetworkRefresh,
}

impl TargetKind {
    /// All kinds, in declaration order
    pub const ALL: [TargetKind; 4] = [
        TargetKind::ExecutionLayer,
        TargetKind::ConsensusLayer,
        TargetKind::MidStepMigration,
        TargetKind::NetworkRefresh,
    ];

    /// Whether the shared-state reinitialize step runs by default
    ///
    /// Execution clients re-apply the chain specification and migrations
    /// rewrite their database; consensus clients and refreshes do neither.
    #[inline]
    #[must_use]
    pub fn reinitializes_by_default(self) -> bool {
        matches!(self, Self::ExecutionLayer | Self::MidStepMigration)
    }

    /// Kebab-case name as used in configuration
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExecutionLayer => "execution-layer",
            Self::ConsensusLayer => "consensus-layer",
            Self::MidStepMigration => "mid-step-migration",
            Self::NetworkRefresh => "network-refresh",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to the build a target is swapped to
///
/// The orchestrator never looks inside; lifecycle providers interpret it
/// (usually as a container image tag).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionRef(pub String);

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rule deciding when a target becomes due
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "kebab-case")]
pub enum Activation {
    /// Due once `current_epoch >= epoch`
    EpochThreshold {
        /// First epoch at which the target is due
        epoch: u64,
    },
    /// Due once `current_slot >= boundary_slot - lead_slots`
    SlotLeadThreshold {
        /// First slot of the fork boundary epoch
        boundary_slot: u64,
        /// Startup-latency budget before the boundary
        lead_slots: u64,
    },
    /// Due once the referenced target carries a completion marker
    Predicate {
        /// Target that must complete first
        target_id: TargetId,
    },
}

impl Activation {
    /// Slot at which a slot-lead rule fires
    #[inline]
    #[must_use]
    pub fn trigger_slot(&self, slots_per_epoch: u64) -> Option<u64> {
        match self {
            Self::EpochThreshold { epoch } => Some(epoch.saturating_mul(slots_per_epoch)),
            Self::SlotLeadThreshold {
                boundary_slot,
                lead_slots,
            } => Some(boundary_slot.saturating_sub(*lead_slots)),
            Self::Predicate { .. } => None,
        }
    }

    /// Whether this is an at-boundary swap
    ///
    /// At-boundary swaps happen while finality is expected to be degraded,
    /// so the liveness gate is skipped for them.
    #[inline]
    #[must_use]
    pub fn is_at_boundary(&self) -> bool {
        matches!(self, Self::SlotLeadThreshold { .. })
    }

    /// Evaluate the progress part of the rule
    ///
    /// Predicate rules are never due on progress alone; the caller resolves
    /// them against the marker store.
    #[must_use]
    pub fn is_due_at(&self, progress: ProgressSample) -> bool {
        match self {
            Self::EpochThreshold { epoch } => progress.epoch >= *epoch,
            Self::SlotLeadThreshold {
                boundary_slot,
                lead_slots,
            } => progress.slot >= boundary_slot.saturating_sub(*lead_slots),
            Self::Predicate { .. } => false,
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EpochThreshold { epoch } => write!(f, "epoch >= {epoch}"),
            Self::SlotLeadThreshold {
                boundary_slot,
                lead_slots,
            } => write!(
                f,
                "slot >= {} ({boundary_slot} - {lead_slots})",
                boundary_slot.saturating_sub(*lead_slots)
            ),
            Self::Predicate { target_id } => write!(f, "after {target_id}"),
        }
    }
}

/// One stateful replacement unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapTarget {
    /// Stable identifier
    pub id: TargetId,
    /// What gets replaced
    pub kind: TargetKind,
    /// When it becomes due
    pub activation: Activation,
    /// Last acceptable epoch; pending beyond it is reported as overdue
    pub deadline_epoch: Option<u64>,
    /// Build to start
    pub version: VersionRef,
    /// Whether the reinitialize step runs
    pub reinitialize: bool,
    /// Pass-through values for the lifecycle provider
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl SwapTarget {
    /// Create a target with kind-derived defaults
    #[must_use]
    pub fn new(id: TargetId, kind: TargetKind, activation: Activation, version: VersionRef) -> Self {
        Self {
            id,
            kind,
            activation,
            deadline_epoch: None,
            version,
            reinitialize: kind.reinitializes_by_default(),
            vars: BTreeMap::new(),
        }
    }

    /// With deadline epoch
    #[inline]
    #[must_use]
    pub fn with_deadline(mut self, epoch: u64) -> Self {
        self.deadline_epoch = Some(epoch);
        self
    }

    /// With explicit reinitialize flag
    #[inline]
    #[must_use]
    pub fn with_reinitialize(mut self, reinitialize: bool) -> Self {
        self.reinitialize = reinitialize;
        self
    }

    /// With a pass-through variable
    #[inline]
    #[must_use]
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

/// Point-in-time reading of network progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgressSample {
    /// Current head slot
    pub slot: u64,
    /// `slot / slots_per_epoch`
    pub epoch: u64,
}

impl ProgressSample {
    /// Derive a sample from a slot
    ///
    /// `slots_per_epoch` of zero is rejected by configuration validation;
    /// it is treated as one here to keep the function total.
    #[inline]
    #[must_use]
    pub fn from_slot(slot: u64, slots_per_epoch: u64) -> Self {
        Self {
            slot,
            epoch: slot / slots_per_epoch.max(1),
        }
    }
}

impl fmt::Display for ProgressSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {} (epoch {})", self.slot, self.epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_id_rejects_path_like_values() {
        assert!(TargetId::new("node1-el").is_ok());
        assert!(TargetId::new("node_2.cl").is_ok());
        assert!(TargetId::new("").is_err());
        assert!(TargetId::new("../etc").is_err());
        assert!(TargetId::new("-node").is_err());
        assert!(TargetId::new("node 1").is_err());
    }

    #[test]
    fn progress_sample_derives_epoch() {
        let sample = ProgressSample::from_slot(223, 32);
        assert_eq!(sample.epoch, 6);
        assert_eq!(ProgressSample::from_slot(224, 32).epoch, 7);
    }

    #[test]
    fn slot_lead_threshold_fires_at_boundary_minus_lead() {
        let rule = Activation::SlotLeadThreshold {
            boundary_slot: 7 * 32,
            lead_slots: 10,
        };
        assert_eq!(rule.trigger_slot(32), Some(214));
        assert!(!rule.is_due_at(ProgressSample::from_slot(213, 32)));
        assert!(rule.is_due_at(ProgressSample::from_slot(214, 32)));
        assert!(rule.is_at_boundary());
    }

    #[test]
    fn epoch_threshold_uses_derived_epoch() {
        let rule = Activation::EpochThreshold { epoch: 5 };
        assert!(!rule.is_due_at(ProgressSample::from_slot(159, 32)));
        assert!(rule.is_due_at(ProgressSample::from_slot(160, 32)));
        assert!(!rule.is_at_boundary());
    }

    #[test]
    fn predicate_is_never_due_on_progress_alone() {
        let rule = Activation::Predicate {
            target_id: TargetId::new("node1-cl").unwrap(),
        };
        assert!(!rule.is_due_at(ProgressSample::from_slot(u64::MAX, 32)));
        assert_eq!(rule.trigger_slot(32), None);
    }

    #[test]
    fn kind_defaults_for_reinitialize() {
        assert!(TargetKind::ExecutionLayer.reinitializes_by_default());
        assert!(TargetKind::MidStepMigration.reinitializes_by_default());
        assert!(!TargetKind::ConsensusLayer.reinitializes_by_default());
        assert!(!TargetKind::NetworkRefresh.reinitializes_by_default());
    }
}
