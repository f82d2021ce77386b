//! Testing utilities for the forkswap workspace
//!
//! Shared fixtures, scripted progress and recording lifecycle doubles.

#![allow(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use forkswap_core::config::{OrchestratorSettings, SwapConfig};
use forkswap_core::error::{LifecycleError, SourceError};
use forkswap_core::lifecycle::{HealthStatus, LifecycleProvider, LifecycleSet};
use forkswap_core::markers::{FileMarkerStore, MarkerStore};
use forkswap_core::orchestrator::Orchestrator;
use forkswap_core::progress::{ProgressClock, ProgressSource};
use forkswap_core::registry::TargetRegistry;
use forkswap_core::types::{Activation, SwapTarget, TargetId, TargetKind, VersionRef};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Two nodes, one window, one boundary pair and a dependent refresh
pub const SAMPLE_CONFIG: &str = r#"
[network]
slots_per_epoch = 32
seconds_per_slot = 12

[forks]
electra = 4
fulu = 7

[orchestrator]
poll_interval_secs = 6
settle_secs = 10
health_attempts = 3
health_delay_secs = 1

[lifecycle.execution-layer]
stop = ["true"]
start = ["true"]

[lifecycle.consensus-layer]
stop = ["true"]
start = ["true"]

[lifecycle.network-refresh]
stop = ["true"]
start = ["true"]

[[target]]
id = "node1-el"
kind = "execution-layer"
version = "geth:v1.15.0"
schedule = "window"
window_start = "electra"
window_end = 6

[[target]]
id = "node2-el"
kind = "execution-layer"
version = "geth:v1.15.0"
schedule = "window"
window_start = "electra"
window_end = 6

[[target]]
id = "node1-cl"
kind = "consensus-layer"
version = "lighthouse:v7"
schedule = "boundary"
boundary = "fulu"

[[target]]
id = "node2-cl"
kind = "consensus-layer"
version = "lighthouse:v7"
schedule = "boundary"
boundary = "fulu"

[[target]]
id = "refresh"
kind = "network-refresh"
version = "peers"
schedule = "after"
after = "node2-cl"
"#;

pub fn sample_config() -> SwapConfig {
    SwapConfig::from_toml_str(SAMPLE_CONFIG).unwrap()
}

pub fn target_id(raw: &str) -> TargetId {
    TargetId::new(raw).unwrap()
}

pub fn epoch_target(id: &str, kind: TargetKind, epoch: u64) -> SwapTarget {
    SwapTarget::new(
        target_id(id),
        kind,
        Activation::EpochThreshold { epoch },
        VersionRef(format!("{id}:new")),
    )
}

pub fn boundary_target(id: &str, kind: TargetKind, boundary_slot: u64, lead_slots: u64) -> SwapTarget {
    SwapTarget::new(
        target_id(id),
        kind,
        Activation::SlotLeadThreshold {
            boundary_slot,
            lead_slots,
        },
        VersionRef(format!("{id}:new")),
    )
}

pub fn after_target(id: &str, kind: TargetKind, dependency: &str) -> SwapTarget {
    SwapTarget::new(
        target_id(id),
        kind,
        Activation::Predicate {
            target_id: target_id(dependency),
        },
        VersionRef(format!("{id}:new")),
    )
}

pub fn registry(targets: Vec<SwapTarget>) -> Arc<TargetRegistry> {
    Arc::new(TargetRegistry::from_targets(targets, 32).unwrap())
}

pub fn temp_marker_store() -> (TempDir, Arc<FileMarkerStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = FileMarkerStore::open(dir.path().join("markers")).unwrap();
    (dir, Arc::new(store))
}

/// Settings with one-second timings so paused-time tests advance quickly
pub fn fast_settings() -> OrchestratorSettings {
    let mut settings = OrchestratorSettings::immediate().with_health(2, 1);
    settings.poll_interval_secs = 1;
    settings.settle_secs = 1;
    settings.no_progress_retry_secs = 1;
    settings
}

pub fn orchestrator(
    registry: Arc<TargetRegistry>,
    markers: Arc<dyn MarkerStore>,
    clock: Arc<dyn ProgressClock>,
    lifecycle: Arc<RecordingLifecycle>,
    settings: OrchestratorSettings,
) -> Orchestrator {
    Orchestrator::new(registry, markers, clock, LifecycleSet::uniform(lifecycle), settings).unwrap()
}

/// Clock replaying a script of head slots
///
/// Each poll consumes one entry; the last entry repeats forever. `None`
/// entries simulate every source being down.
#[derive(Debug)]
pub struct ScriptedClock {
    script: Mutex<VecDeque<Option<u64>>>,
    last: Mutex<Option<u64>>,
    finalized: Mutex<Option<u64>>,
    polls: AtomicU64,
}

impl ScriptedClock {
    pub fn new(script: impl IntoIterator<Item = Option<u64>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            finalized: Mutex::new(Some(0)),
            polls: AtomicU64::new(0),
        }
    }

    /// Clock stepping through the given slots
    pub fn slots(slots: impl IntoIterator<Item = u64>) -> Self {
        Self::new(slots.into_iter().map(Some))
    }

    pub fn with_finalized(self, epoch: Option<u64>) -> Self {
        *self.finalized.lock() = epoch;
        self
    }

    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProgressClock for ScriptedClock {
    async fn current_slot(&self) -> Option<u64> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();
        let mut last = self.last.lock();
        if let Some(next) = script.pop_front() {
            *last = next;
        }
        *last
    }

    async fn finalized_epoch(&self) -> Option<u64> {
        *self.finalized.lock()
    }

    fn slots_per_epoch(&self) -> u64 {
        32
    }
}

/// Behaviour of a [`FlakySource`]
#[derive(Debug, Clone, Copy)]
pub enum SourceBehaviour {
    Answer(u64),
    Fail,
    Hang,
}

/// Progress source with fixed behaviour, counting its queries
#[derive(Debug)]
pub struct FlakySource {
    name: String,
    behaviour: SourceBehaviour,
    queries: AtomicU64,
}

impl FlakySource {
    pub fn new(name: &str, behaviour: SourceBehaviour) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behaviour,
            queries: AtomicU64::new(0),
        })
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    async fn answer(&self, scale: u64) -> Result<u64, SourceError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            SourceBehaviour::Answer(slot) => Ok(slot / scale),
            SourceBehaviour::Fail => Err(SourceError::Unreachable {
                source_name: self.name.clone(),
                reason: "connection refused".into(),
            }),
            SourceBehaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(0)
            }
        }
    }
}

#[async_trait::async_trait]
impl ProgressSource for FlakySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn head_slot(&self) -> Result<u64, SourceError> {
        self.answer(1).await
    }

    async fn finalized_epoch(&self) -> Result<u64, SourceError> {
        self.answer(32).await
    }
}

/// One lifecycle call as seen by [`RecordingLifecycle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: &'static str,
    pub target: String,
}

/// Lifecycle double recording every call, with per-target failure injection
#[derive(Debug, Default)]
pub struct RecordingLifecycle {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<(String, &'static str), String>>,
    not_ready: Mutex<HashMap<String, u32>>,
    peers: Mutex<Option<u32>>,
    start_delay: Mutex<Duration>,
}

impl RecordingLifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `operation` fail for `target`
    pub fn fail(&self, target: &str, operation: &'static str) {
        self.failures
            .lock()
            .insert((target.to_string(), operation), format!("{operation} refused"));
    }

    /// Report not-ready for the first `probes` health checks of `target`
    pub fn not_ready_for(&self, target: &str, probes: u32) {
        self.not_ready.lock().insert(target.to_string(), probes);
    }

    pub fn set_peers(&self, peers: Option<u32>) {
        *self.peers.lock() = peers;
    }

    /// Make every `start` take `delay`
    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock() = delay;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, target: &str) -> Vec<&'static str> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.target == target)
            .map(|c| c.operation)
            .collect()
    }

    /// Targets in the order their `start` was called
    pub fn started(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation == "start")
            .map(|c| c.target.clone())
            .collect()
    }

    fn record(&self, operation: &'static str, target: &SwapTarget) -> Result<(), LifecycleError> {
        self.calls.lock().push(Call {
            operation,
            target: target.id.to_string(),
        });
        match self.failures.lock().get(&(target.id.to_string(), operation)) {
            Some(message) => Err(LifecycleError::new(operation, message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl LifecycleProvider for RecordingLifecycle {
    async fn stop(&self, target: &SwapTarget) -> Result<(), LifecycleError> {
        self.record("stop", target)
    }

    async fn reinitialize(&self, target: &SwapTarget) -> Result<(), LifecycleError> {
        self.record("reinitialize", target)
    }

    async fn start(&self, target: &SwapTarget, _version: &VersionRef) -> Result<(), LifecycleError> {
        let delay = *self.start_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.record("start", target)
    }

    async fn health_check(&self, target: &SwapTarget) -> Result<HealthStatus, LifecycleError> {
        self.record("health", target)?;
        let mut not_ready = self.not_ready.lock();
        if let Some(remaining) = not_ready.get_mut(target.id.as_str()) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(HealthStatus::NotReady);
            }
        }
        Ok(HealthStatus::Ready {
            peers: *self.peers.lock(),
        })
    }
}
