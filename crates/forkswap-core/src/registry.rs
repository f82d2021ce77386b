//! Target Registry
//!
//! The fixed, total order over all swap targets. The order is a priority:
//! the loop scans it front to back and executes the first due target.
//!
//! Invariants established at build time:
//! - identifiers are unique
//! - every predicate target comes after the target it waits for
//! - at-boundary targets sharing a boundary appear in firing order, so
//!   redundant replicas are never scheduled ahead of each other

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::config::{SwapConfig, TargetSpec};
use crate::error::ConfigError;
use crate::planner::{self, ForkSchedule, ThresholdTable};
use crate::types::{Activation, SwapTarget, TargetId};

/// Ordered, deduplicated list of swap targets
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    targets: Vec<SwapTarget>,
    slots_per_epoch: u64,
}

impl TargetRegistry {
    /// Plan and build the registry from a configuration
    ///
    /// # Errors
    /// Returns `ConfigError` for planning or ordering violations.
    pub fn from_config(config: &SwapConfig) -> Result<Self, ConfigError> {
        let table = planner::plan(&ForkSchedule::from_config(config), &config.targets)?;
        Self::build(&config.targets, &table)
    }

    /// Build the registry from target specs and their planned thresholds
    ///
    /// # Errors
    /// - `ConfigError::DuplicateTarget` for repeated identifiers
    /// - `ConfigError::UnknownTarget` for predicates on unregistered targets
    /// - `ConfigError::DependencyOrder` for predicates listed too early
    pub fn build(specs: &[TargetSpec], table: &ThresholdTable) -> Result<Self, ConfigError> {
        let mut seen = HashSet::with_capacity(specs.len());
        let mut targets = Vec::with_capacity(specs.len());
        for spec in specs {
            if !seen.insert(&spec.id) {
                return Err(ConfigError::DuplicateTarget(spec.id.clone()));
            }
            let threshold = table
                .get(&spec.id)
                .ok_or_else(|| ConfigError::UnknownTarget(spec.id.to_string()))?;
            targets.push(SwapTarget {
                id: spec.id.clone(),
                kind: spec.kind,
                activation: threshold.activation.clone(),
                deadline_epoch: threshold.deadline_epoch,
                version: spec.version.clone(),
                reinitialize: spec
                    .reinitialize
                    .unwrap_or_else(|| spec.kind.reinitializes_by_default()),
                vars: spec.vars.clone(),
            });
        }
        Self::from_targets(targets, table.slots_per_epoch())
    }

    /// Order and validate already-planned targets
    ///
    /// # Errors
    /// Same as [`TargetRegistry::build`].
    pub fn from_targets(mut targets: Vec<SwapTarget>, slots_per_epoch: u64) -> Result<Self, ConfigError> {
        for (i, target) in targets.iter().enumerate() {
            if targets[..i].iter().any(|t| t.id == target.id) {
                return Err(ConfigError::DuplicateTarget(target.id.clone()));
            }
        }

        order_boundary_groups(&mut targets);

        for (i, target) in targets.iter().enumerate() {
            if let Activation::Predicate { target_id } = &target.activation {
                match targets.iter().position(|t| &t.id == target_id) {
                    None => return Err(ConfigError::UnknownTarget(target_id.to_string())),
                    Some(dep) if dep >= i => {
                        return Err(ConfigError::DependencyOrder {
                            target: target.id.clone(),
                            dependency: target_id.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(Self {
            targets,
            slots_per_epoch,
        })
    }

    /// Look up a target
    #[must_use]
    pub fn get(&self, id: &TargetId) -> Option<&SwapTarget> {
        self.targets.iter().find(|t| &t.id == id)
    }

    /// Resolve command-line names to targets, rejecting unknown ones
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownTarget` for the first unknown name.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<&SwapTarget>, ConfigError> {
        let mut resolved: Vec<&SwapTarget> = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let target = self
                .targets
                .iter()
                .find(|t| t.id.as_str() == name)
                .ok_or_else(|| ConfigError::UnknownTarget(name.to_string()))?;
            if !resolved.iter().any(|t| t.id == target.id) {
                resolved.push(target);
            }
        }
        Ok(resolved)
    }

    /// Iterate in priority order
    pub fn iter(&self) -> impl Iterator<Item = &SwapTarget> {
        self.targets.iter()
    }

    /// Identifiers in priority order
    #[must_use]
    pub fn ids(&self) -> Vec<&TargetId> {
        self.targets.iter().map(|t| &t.id).collect()
    }

    /// Slots per epoch the thresholds were planned with
    #[inline]
    #[must_use]
    pub fn slots_per_epoch(&self) -> u64 {
        self.slots_per_epoch
    }

    /// Number of targets
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Sort each group of same-boundary targets by firing slot, in place
///
/// Group members keep the registry positions the group already occupies;
/// only their assignment to those positions changes.
fn order_boundary_groups(targets: &mut [SwapTarget]) {
    let mut groups: IndexMap<u64, Vec<usize>> = IndexMap::new();
    for (i, target) in targets.iter().enumerate() {
        if let Activation::SlotLeadThreshold { boundary_slot, .. } = target.activation {
            groups.entry(boundary_slot).or_default().push(i);
        }
    }
    for positions in groups.values() {
        let mut members: Vec<SwapTarget> = positions.iter().map(|&i| targets[i].clone()).collect();
        members.sort_by_key(|t| t.activation.trigger_slot(1).unwrap_or(u64::MAX));
        for (&position, member) in positions.iter().zip(members) {
            targets[position] = member;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TargetKind, VersionRef};

    fn target(id: &str, activation: Activation) -> SwapTarget {
        SwapTarget::new(
            TargetId::new(id).unwrap(),
            TargetKind::ConsensusLayer,
            activation,
            VersionRef("v2".into()),
        )
    }

    fn at_boundary(lead: u64) -> Activation {
        Activation::SlotLeadThreshold {
            boundary_slot: 224,
            lead_slots: lead,
        }
    }

    fn after(id: &str) -> Activation {
        Activation::Predicate {
            target_id: TargetId::new(id).unwrap(),
        }
    }

    #[test]
    fn boundary_group_is_ordered_by_firing_slot() {
        let targets = vec![
            target("node3-cl", at_boundary(10)),
            target("node1-el", Activation::EpochThreshold { epoch: 4 }),
            target("node1-cl", at_boundary(20)),
            target("node2-cl", at_boundary(15)),
        ];
        let registry = TargetRegistry::from_targets(targets, 32).unwrap();
        let ids: Vec<&str> = registry.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["node1-cl", "node1-el", "node2-cl", "node3-cl"]);
    }

    #[test]
    fn predicate_must_follow_dependency() {
        let targets = vec![
            target("refresh", after("node1-cl")),
            target("node1-cl", at_boundary(10)),
        ];
        let err = TargetRegistry::from_targets(targets, 32).unwrap_err();
        assert!(matches!(err, ConfigError::DependencyOrder { .. }));
    }

    #[test]
    fn predicate_on_self_is_rejected() {
        let err = TargetRegistry::from_targets(vec![target("loop", after("loop"))], 32).unwrap_err();
        assert!(matches!(err, ConfigError::DependencyOrder { .. }));
    }

    #[test]
    fn predicate_on_unknown_target_is_rejected() {
        let err = TargetRegistry::from_targets(vec![target("refresh", after("ghost"))], 32).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTarget(_)));
    }

    #[test]
    fn duplicates_are_rejected() {
        let targets = vec![target("a", at_boundary(10)), target("a", at_boundary(5))];
        assert!(matches!(
            TargetRegistry::from_targets(targets, 32),
            Err(ConfigError::DuplicateTarget(_))
        ));
    }

    #[test]
    fn resolve_rejects_unknown_and_dedups() {
        let registry = TargetRegistry::from_targets(
            vec![target("a", at_boundary(10)), target("b", at_boundary(5))],
            32,
        )
        .unwrap();
        let resolved = registry.resolve(&["b", "a", "b"]).unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].id.as_str(), "b");
        assert!(matches!(registry.resolve(&["zzz"]), Err(ConfigError::UnknownTarget(_))));
    }
}
