//! forkswap core
//!
//! Fork-schedule driven swap orchestration for multi-node testnets:
//! 1. **Planning**: fork schedule + target policies → activation thresholds
//! 2. **Execution**: a polling loop that fires each due target exactly once
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use forkswap_core::prelude::*;
//!
//! let config = SwapConfig::load(Path::new("forkswap.toml"))?;
//! let registry = Arc::new(TargetRegistry::from_config(&config)?);
//! let markers = Arc::new(FileMarkerStore::open(&config.markers.dir)?);
//!
//! let mut orchestrator =
//!     Orchestrator::new(registry, markers, clock, lifecycles, config.orchestrator.clone())?;
//! let summary = orchestrator.run(shutdown_rx).await?;
//! ```

// Data model and configuration
pub mod config;
pub mod error;
pub mod types;

// Planning
pub mod planner;
pub mod registry;

// Collaborator interfaces
pub mod lifecycle;
pub mod markers;
pub mod progress;

// Loop and reporting
pub mod orchestrator;
pub mod status;

// Simulation harness
pub mod simulation;

// Re-exports
pub use error::*;
pub use types::*;

/// Commonly used types
pub mod prelude {
    pub use crate::config::{CommandSet, FailurePolicy, OrchestratorSettings, SwapConfig, TargetSpec};
    pub use crate::error::{
        ConfigError, ExecutionError, LifecycleError, MarkerError, OrchestratorError, PlanError, SourceError,
    };
    pub use crate::lifecycle::{HealthStatus, LifecycleProvider, LifecycleSet};
    pub use crate::markers::{FileMarkerStore, InMemoryMarkerStore, MarkerOutcome, MarkerRecord, MarkerStore};
    pub use crate::orchestrator::{ExecutionReport, LoopState, ManualSwap, Orchestrator, RunSummary};
    pub use crate::planner::{plan, ForkSchedule, ThresholdTable};
    pub use crate::progress::{ProgressClock, ProgressSource, RedundantClock};
    pub use crate::registry::TargetRegistry;
    pub use crate::status::StatusReport;
    pub use crate::types::{Activation, ProgressSample, SwapTarget, TargetId, TargetKind, VersionRef};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
