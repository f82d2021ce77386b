//! Schedule Planner
//!
//! Turns fork epochs and per-target schedule policies into a threshold
//! table. Planning is pure: the same configuration always yields the same
//! table, and the table never changes during a run.
//!
//! # Policies
//!
//! - **Window**: targets sharing an open window `[start, end)` are spread
//!   over it. With `N` targets the i-th lands at fraction `(i+1)/(N+1)`,
//!   so two targets in `[4, 6)` land at epochs 4 and 5.
//! - **Boundary**: the target fires `lead_slots` before the first slot of
//!   the boundary epoch. Targets sharing a boundary get distinct leads,
//!   largest first.
//! - **Epoch**: fixed epoch threshold.
//! - **After**: waits for another target's marker.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::{BoundaryDefaults, SchedulePolicy, SwapConfig, TargetSpec};
use crate::error::{ConfigError, PlanError};
use crate::types::{Activation, TargetId};

/// Position inside a window, as `numerator/denominator` in `[0, 1)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fraction {
    /// Numerator
    pub num: u64,
    /// Denominator
    pub den: u64,
}

impl Fraction {
    /// Create a fraction without range checks
    #[inline]
    #[must_use]
    pub const fn new(num: u64, den: u64) -> Self {
        Self { num, den }
    }

    /// Whether the fraction lies in `[0, 1)`
    #[inline]
    #[must_use]
    pub fn is_proper(self) -> bool {
        self.den > 0 && self.num < self.den
    }

    /// `floor(span * self)` in integer arithmetic
    #[inline]
    #[must_use]
    pub fn scale(self, span: u64) -> u64 {
        if self.den == 0 {
            return 0;
        }
        let scaled = u128::from(span) * u128::from(self.num) / u128::from(self.den);
        u64::try_from(scaled).unwrap_or(u64::MAX)
    }
}

impl FromStr for Fraction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (num, den) = s
            .split_once('/')
            .ok_or_else(|| format!("expected n/d, got {s:?}"))?;
        let num = num.trim().parse().map_err(|e| format!("numerator: {e}"))?;
        let den = den.trim().parse().map_err(|e| format!("denominator: {e}"))?;
        Ok(Self { num, den })
    }
}

impl TryFrom<String> for Fraction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fraction> for String {
    fn from(value: Fraction) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Planned activation of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    /// Activation rule
    pub activation: Activation,
    /// Last acceptable epoch
    pub deadline_epoch: Option<u64>,
}

/// Immutable output of one planning pass, in configuration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdTable {
    slots_per_epoch: u64,
    entries: IndexMap<TargetId, Threshold>,
}

impl ThresholdTable {
    /// Threshold of a target
    #[inline]
    #[must_use]
    pub fn get(&self, id: &TargetId) -> Option<&Threshold> {
        self.entries.get(id)
    }

    /// Slots per epoch the table was planned with
    #[inline]
    #[must_use]
    pub fn slots_per_epoch(&self) -> u64 {
        self.slots_per_epoch
    }

    /// Iterate in configuration order
    pub fn iter(&self) -> impl Iterator<Item = (&TargetId, &Threshold)> {
        self.entries.iter()
    }

    /// Number of planned targets
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Inputs to the planner that are not per-target
#[derive(Debug, Clone)]
pub struct ForkSchedule {
    /// Fork name to activation epoch
    pub forks: IndexMap<String, u64>,
    /// Slots per epoch
    pub slots_per_epoch: u64,
    /// Lead defaults for boundary targets
    pub boundary: BoundaryDefaults,
}

impl ForkSchedule {
    /// Extract the fork schedule from a configuration
    #[must_use]
    pub fn from_config(config: &SwapConfig) -> Self {
        Self {
            forks: config.forks.clone(),
            slots_per_epoch: config.network.slots_per_epoch,
            boundary: config.boundary,
        }
    }

    /// Resolve a fork name or literal epoch
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownFork` for unknown names.
    pub fn epoch(&self, reference: &crate::config::EpochRef) -> Result<u64, ConfigError> {
        reference.resolve(&self.forks)
    }
}

/// Spread `count` targets over `[start, end)` at fractions `(i+1)/(count+1)`
///
/// The result is non-decreasing and every value lies in `[start, end)`.
/// An empty window yields `start` for every target.
#[must_use]
pub fn stagger_window(start: u64, end: u64, count: usize) -> Vec<u64> {
    stagger(start, end, &vec![None; count])
}

fn stagger(start: u64, end: u64, fractions: &[Option<Fraction>]) -> Vec<u64> {
    let span = end.saturating_sub(start);
    let slices = fractions.len() as u64 + 1;
    let mut previous = start;
    fractions
        .iter()
        .enumerate()
        .map(|(i, fraction)| {
            let fraction = fraction.unwrap_or(Fraction::new(i as u64 + 1, slices));
            let mut epoch = start.saturating_add(fraction.scale(span));
            if epoch < start {
                epoch = start;
            }
            if span > 0 && epoch >= end {
                epoch = end - 1;
            }
            // A target never precedes the one before it in the same window.
            epoch = epoch.max(previous);
            previous = epoch;
            epoch
        })
        .collect()
}

/// Compute the threshold table for a set of targets
///
/// # Errors
/// Returns `ConfigError` for unknown forks and `PlanError` (wrapped) for
/// empty windows, improper fractions and clashing boundary leads.
pub fn plan(schedule: &ForkSchedule, targets: &[TargetSpec]) -> Result<ThresholdTable, ConfigError> {
    if schedule.slots_per_epoch == 0 {
        return Err(PlanError::ZeroSlotsPerEpoch.into());
    }

    let mut planned: IndexMap<TargetId, Option<Threshold>> =
        targets.iter().map(|t| (t.id.clone(), None)).collect();

    // Window targets grouped by their resolved window, in configuration order.
    let mut windows: IndexMap<(u64, u64), Vec<&TargetSpec>> = IndexMap::new();
    // Boundary targets grouped by boundary epoch.
    let mut boundaries: IndexMap<u64, Vec<(&TargetSpec, Option<u64>)>> = IndexMap::new();

    for target in targets {
        match &target.schedule {
            SchedulePolicy::Window {
                window_start,
                window_end,
                fraction,
            } => {
                let start = schedule.epoch(window_start)?;
                let end = schedule.epoch(window_end)?;
                if end <= start {
                    return Err(PlanError::EmptyWindow {
                        target: target.id.clone(),
                        start,
                        end,
                    }
                    .into());
                }
                if let Some(f) = fraction {
                    if !f.is_proper() {
                        return Err(PlanError::InvalidFraction {
                            target: target.id.clone(),
                            fraction: f.to_string(),
                        }
                        .into());
                    }
                }
                windows.entry((start, end)).or_default().push(target);
            }
            SchedulePolicy::Boundary {
                boundary,
                lead_slots,
            } => {
                let epoch = schedule.epoch(boundary)?;
                boundaries.entry(epoch).or_default().push((target, *lead_slots));
            }
            SchedulePolicy::Epoch { epoch } => {
                let epoch = schedule.epoch(epoch)?;
                planned.insert(
                    target.id.clone(),
                    Some(Threshold {
                        activation: Activation::EpochThreshold { epoch },
                        deadline_epoch: None,
                    }),
                );
            }
            SchedulePolicy::After { after } => {
                planned.insert(
                    target.id.clone(),
                    Some(Threshold {
                        activation: Activation::Predicate {
                            target_id: after.clone(),
                        },
                        deadline_epoch: None,
                    }),
                );
            }
        }
    }

    for ((start, end), members) in &windows {
        let fractions: Vec<Option<Fraction>> = members
            .iter()
            .map(|t| match &t.schedule {
                SchedulePolicy::Window { fraction, .. } => *fraction,
                _ => None,
            })
            .collect();
        for (target, epoch) in members.iter().zip(stagger(*start, *end, &fractions)) {
            planned.insert(
                target.id.clone(),
                Some(Threshold {
                    activation: Activation::EpochThreshold { epoch },
                    deadline_epoch: Some(end - 1),
                }),
            );
        }
    }

    for (boundary, members) in &boundaries {
        let boundary_slot = boundary.saturating_mul(schedule.slots_per_epoch);
        let mut assigned: Vec<(&TargetId, u64)> = Vec::with_capacity(members.len());
        for (i, (target, explicit)) in members.iter().enumerate() {
            let lead_slots = explicit.unwrap_or_else(|| {
                schedule
                    .boundary
                    .default_lead_slots
                    .saturating_sub(schedule.boundary.lead_step.saturating_mul(i as u64))
            });
            if lead_slots == 0 {
                return Err(PlanError::ZeroLead {
                    target: target.id.clone(),
                }
                .into());
            }
            if let Some((first, _)) = assigned.iter().find(|(_, lead)| *lead == lead_slots) {
                return Err(PlanError::DuplicateLead {
                    first: (*first).clone(),
                    second: target.id.clone(),
                    boundary: *boundary,
                    lead_slots,
                }
                .into());
            }
            assigned.push((&target.id, lead_slots));
            planned.insert(
                target.id.clone(),
                Some(Threshold {
                    activation: Activation::SlotLeadThreshold {
                        boundary_slot,
                        lead_slots,
                    },
                    deadline_epoch: Some(boundary.saturating_sub(1)),
                }),
            );
        }
    }

    let mut entries = IndexMap::with_capacity(planned.len());
    for target in targets {
        let Some(Some(mut threshold)) = planned.swap_remove(&target.id) else {
            // Duplicate ids collapse into one entry; the registry reports them.
            continue;
        };
        if let Some(deadline) = &target.deadline {
            threshold.deadline_epoch = Some(schedule.epoch(deadline)?);
        }
        tracing::debug!(target = %target.id, activation = %threshold.activation, "planned target");
        entries.insert(target.id.clone(), threshold);
    }

    Ok(ThresholdTable {
        slots_per_epoch: schedule.slots_per_epoch,
        entries,
    })
}
