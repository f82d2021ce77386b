//! forkswap backend
//!
//! Production implementations of the orchestrator's collaborator traits:
//! - [`beacon::BeaconSource`]: `ProgressSource` over the beacon-node REST API
//! - [`command::CommandLifecycle`]: `LifecycleProvider` running configured commands

pub mod beacon;
pub mod command;

pub use beacon::{sources_from_urls, BeaconSource};
pub use command::CommandLifecycle;
