//! Status Reporter
//!
//! Read-only view joining the registry, the marker store and (optionally)
//! current progress into one row per target.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::MarkerError;
use crate::markers::{MarkerOutcome, MarkerStore};
use crate::registry::TargetRegistry;
use crate::types::{Activation, ProgressSample, TargetId, TargetKind};

/// Expected time until a pending target fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Eta {
    /// Threshold already reached; fires on the next loop iteration
    Due,
    /// Remaining slots and their wall-clock estimate
    In {
        /// Slots until the threshold
        slots: u64,
        /// `slots × seconds_per_slot`
        seconds: u64,
    },
    /// Waits for another target's marker
    After {
        /// Referenced target
        target_id: TargetId,
    },
    /// No progress available
    Unknown,
}

impl std::fmt::Display for Eta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Due => f.write_str("due"),
            Self::In { slots, seconds } => write!(f, "{slots} slots, ~{}", human_duration(*seconds)),
            Self::After { target_id } => write!(f, "after {target_id}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Reported state of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum TargetState {
    /// Marker present
    Done {
        /// Marker timestamp
        completed_at: DateTime<Utc>,
        /// How it finished
        outcome: MarkerOutcome,
    },
    /// Pending past its deadline epoch
    Overdue {
        /// Missed deadline
        deadline_epoch: u64,
    },
    /// Pending
    Pending {
        /// Expected time until firing
        eta: Eta,
    },
}

/// One row of the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRow {
    /// Target identifier
    pub id: TargetId,
    /// Target kind
    pub kind: TargetKind,
    /// Activation rule, human-readable
    pub activation: String,
    /// Last acceptable epoch
    pub deadline_epoch: Option<u64>,
    /// Current state
    #[serde(flatten)]
    pub state: TargetState,
}

/// Status of every target, in registry order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Progress used for the report, if any source answered
    pub progress: Option<ProgressSample>,
    /// One row per target
    pub rows: Vec<StatusRow>,
}

impl StatusReport {
    /// Build a report
    ///
    /// # Errors
    /// Returns `MarkerError` if the marker store cannot be read.
    pub fn build(
        registry: &TargetRegistry,
        markers: &dyn MarkerStore,
        progress: Option<ProgressSample>,
        seconds_per_slot: u64,
    ) -> Result<Self, MarkerError> {
        let spe = registry.slots_per_epoch();
        let mut rows = Vec::with_capacity(registry.len());
        for target in registry.iter() {
            let state = if let Some(record) = markers.record(&target.id)? {
                TargetState::Done {
                    completed_at: record.completed_at,
                    outcome: record.outcome,
                }
            } else if let Some(deadline) = target
                .deadline_epoch
                .filter(|d| progress.is_some_and(|p| p.epoch > *d))
            {
                TargetState::Overdue {
                    deadline_epoch: deadline,
                }
            } else {
                let eta = match (&target.activation, progress) {
                    (Activation::Predicate { target_id }, _) => {
                        if markers.is_complete(target_id)? {
                            Eta::Due
                        } else {
                            Eta::After {
                                target_id: target_id.clone(),
                            }
                        }
                    }
                    (_, None) => Eta::Unknown,
                    (rule, Some(p)) => match rule.trigger_slot(spe) {
                        Some(slot) if slot > p.slot => {
                            let slots = slot - p.slot;
                            Eta::In {
                                slots,
                                seconds: slots.saturating_mul(seconds_per_slot),
                            }
                        }
                        _ => Eta::Due,
                    },
                };
                TargetState::Pending { eta }
            };
            rows.push(StatusRow {
                id: target.id.clone(),
                kind: target.kind,
                activation: target.activation.to_string(),
                deadline_epoch: target.deadline_epoch,
                state,
            });
        }
        Ok(Self { progress, rows })
    }

    /// Number of targets with a marker
    #[must_use]
    pub fn completed(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| matches!(r.state, TargetState::Done { .. }))
            .count()
    }

    /// Render as an aligned text table
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        match self.progress {
            Some(p) => {
                let _ = writeln!(out, "progress: {p}");
            }
            None => out.push_str("progress: unavailable\n"),
        }
        let _ = writeln!(out, "complete: {}/{}\n", self.completed(), self.rows.len());

        let id_width = self.rows.iter().map(|r| r.id.as_str().len()).max().unwrap_or(0).max(6);
        let _ = writeln!(out, "{:<id_width$}  {:<18}  {:<28}  STATE", "TARGET", "KIND", "ACTIVATION");
        for row in &self.rows {
            let state = match &row.state {
                TargetState::Done { completed_at, outcome } => match outcome {
                    MarkerOutcome::Succeeded => format!("DONE {}", completed_at.format("%Y-%m-%d %H:%M:%S")),
                    MarkerOutcome::Degraded { reason } => {
                        format!("DONE (degraded: {reason}) {}", completed_at.format("%Y-%m-%d %H:%M:%S"))
                    }
                    MarkerOutcome::Failed { reason } => {
                        format!("FAILED ({reason}) {}", completed_at.format("%Y-%m-%d %H:%M:%S"))
                    }
                },
                TargetState::Overdue { deadline_epoch } => format!("OVERDUE (deadline epoch {deadline_epoch})"),
                TargetState::Pending { eta } => format!("pending({eta})"),
            };
            let _ = writeln!(
                out,
                "{:<id_width$}  {:<18}  {:<28}  {state}",
                row.id.as_str(),
                row.kind.as_str(),
                row.activation
            );
        }
        out
    }
}

fn human_duration(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{h}h{m:02}m")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}
