//! Error types for the swap orchestrator
//!
//! Errors are split by the component that raises them:
//! - Configuration and planning failures (fatal before anything runs)
//! - Marker store I/O
//! - Progress source unavailability
//! - Lifecycle and execution failures
//! - Orchestrator loop failures

use std::path::PathBuf;

use crate::types::TargetId;

/// Configuration error, detected before any target executes
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("cannot read config {path}: {source}")]
    Read {
        /// Offending path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for the schema
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Target identifier is empty or unsafe as a file name
    #[error("invalid target id {0:?}")]
    InvalidTargetId(String),

    /// Target named on the command line or in a dependency is not registered
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// Two targets share an identifier
    #[error("duplicate target: {0}")]
    DuplicateTarget(TargetId),

    /// Fork name not present in the fork table
    #[error("unknown fork: {0}")]
    UnknownFork(String),

    /// Value out of range or inconsistent
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field path
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Predicate target listed before, or depending on, itself
    #[error("target {target} depends on {dependency}, which must be registered before it")]
    DependencyOrder {
        /// Dependent target
        target: TargetId,
        /// Target it waits for
        dependency: TargetId,
    },

    /// No lifecycle provider configured for a kind that has targets
    #[error("no lifecycle provider for kind {0}")]
    MissingLifecycle(crate::types::TargetKind),

    /// Prerequisite artifact missing on disk
    #[error("missing prerequisite artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// Schedule planning failed
    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),
}

impl ConfigError {
    /// Shorthand for `InvalidValue`
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Schedule planning errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Window end does not lie after its start
    #[error("target {target}: window [{start}, {end}) is empty")]
    EmptyWindow {
        /// Target owning the window
        target: TargetId,
        /// Window start epoch
        start: u64,
        /// Window end epoch
        end: u64,
    },

    /// Fraction outside `[0, 1)` or with a zero denominator
    #[error("target {target}: fraction {fraction} must lie in [0, 1)")]
    InvalidFraction {
        /// Target owning the fraction
        target: TargetId,
        /// Raw fraction
        fraction: String,
    },

    /// Two at-boundary targets would fire in the same slot
    #[error("targets {first} and {second} share boundary epoch {boundary} with lead {lead_slots}")]
    DuplicateLead {
        /// Earlier target
        first: TargetId,
        /// Later target
        second: TargetId,
        /// Shared boundary epoch
        boundary: u64,
        /// Shared lead
        lead_slots: u64,
    },

    /// Lead of zero slots leaves no startup budget
    #[error("target {target}: lead_slots must be positive")]
    ZeroLead {
        /// Offending target
        target: TargetId,
    },

    /// Slots per epoch is zero
    #[error("slots_per_epoch must be positive")]
    ZeroSlotsPerEpoch,
}

/// Marker store errors
#[derive(Debug, thiserror::Error)]
pub enum MarkerError {
    /// Filesystem error at a path
    #[error("marker I/O at {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Marker document is not valid JSON
    #[error("corrupt marker {path}: {source}")]
    Corrupt {
        /// Offending path
        path: PathBuf,
        /// Decode error
        #[source]
        source: serde_json::Error,
    },
}

/// Progress source errors
///
/// Any of these makes the source count as unavailable for the current poll.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Source did not answer within its timeout
    #[error("{source_name}: timed out after {timeout_ms}ms")]
    Timeout {
        /// Source name
        source_name: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// Transport failure or non-success status
    #[error("{source_name}: unreachable: {reason}")]
    Unreachable {
        /// Source name
        source_name: String,
        /// Transport detail
        reason: String,
    },

    /// Response body did not have the expected shape
    #[error("{source_name}: malformed response: {reason}")]
    Malformed {
        /// Source name
        source_name: String,
        /// Decode detail
        reason: String,
    },
}

/// Failure of a single lifecycle operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed: {message}")]
pub struct LifecycleError {
    /// Operation that failed (`stop`, `reinitialize`, `start`, `health`)
    pub operation: &'static str,
    /// Provider-supplied detail
    pub message: String,
}

impl LifecycleError {
    /// Create a lifecycle error
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Execution failure of one target
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// Stopping the legacy component failed
    #[error("target {target}: {source}")]
    Stop {
        /// Target
        target: TargetId,
        /// Provider error
        #[source]
        source: LifecycleError,
    },

    /// Reinitializing shared state failed
    #[error("target {target}: {source}")]
    Reinitialize {
        /// Target
        target: TargetId,
        /// Provider error
        #[source]
        source: LifecycleError,
    },

    /// Starting the new component failed
    #[error("target {target}: {source}")]
    Start {
        /// Target
        target: TargetId,
        /// Provider error
        #[source]
        source: LifecycleError,
    },

    /// No provider registered for the target kind
    #[error("target {target}: no lifecycle provider for {kind}")]
    NoProvider {
        /// Target
        target: TargetId,
        /// Kind without provider
        kind: crate::types::TargetKind,
    },
}

impl ExecutionError {
    /// Target the failure belongs to
    #[must_use]
    pub fn target(&self) -> &TargetId {
        match self {
            Self::Stop { target, .. }
            | Self::Reinitialize { target, .. }
            | Self::Start { target, .. }
            | Self::NoProvider { target, .. } => target,
        }
    }

    /// Failure detail without the target prefix, as recorded on a marker
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Stop { source, .. } | Self::Reinitialize { source, .. } | Self::Start { source, .. } => {
                source.to_string()
            }
            Self::NoProvider { kind, .. } => format!("no lifecycle provider for {kind}"),
        }
    }
}

/// Orchestrator loop errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Execution failed under the halt-on-failure policy or a manual swap
    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),

    /// Marker store failed; the loop cannot know what has run
    #[error("marker store failed: {0}")]
    Marker(#[from] MarkerError),

    /// Invalid request (unknown target)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Internal state machine violation
    #[error("illegal loop transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// State before
        from: crate::orchestrator::LoopState,
        /// Requested state
        to: crate::orchestrator::LoopState,
    },
}

impl OrchestratorError {
    /// Check if error stems from configuration
    #[inline]
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Check if retrying the same operation could succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution(_) | Self::Marker(MarkerError::Io { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_failure() -> ExecutionError {
        ExecutionError::Start {
            target: TargetId::new("node1-el").unwrap(),
            source: LifecycleError::new("start", "image not found"),
        }
    }

    #[test]
    fn execution_error_names_the_step_once() {
        let err = start_failure();
        assert_eq!(err.to_string(), "target node1-el: start failed: image not found");
        assert_eq!(err.reason(), "start failed: image not found");
    }

    #[test]
    fn orchestrator_error_classifiers() {
        let err = OrchestratorError::from(start_failure());
        assert!(err.is_retryable());
        assert!(!err.is_config());
        assert!(OrchestratorError::from(ConfigError::UnknownTarget("x".into())).is_config());
    }
}
