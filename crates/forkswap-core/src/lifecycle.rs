//! Component Lifecycle Provider
//!
//! The orchestrator knows nothing about how a component is stopped or
//! started. It calls four operations per target and only looks at whether
//! they succeeded; health probes may also report a peer count.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::LifecycleError;
use crate::types::{SwapTarget, TargetKind, VersionRef};

/// Result of one readiness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Component is serving; peer count if the provider knows it
    Ready {
        /// Connected peers
        peers: Option<u32>,
    },
    /// Component is not serving yet
    NotReady,
}

/// Stop/reinitialize/start/health operations for one kind of component
#[async_trait::async_trait]
pub trait LifecycleProvider: Send + Sync {
    /// Stop the legacy component
    async fn stop(&self, target: &SwapTarget) -> Result<(), LifecycleError>;

    /// Reinitialize shared state (chain spec, database migration, ...)
    async fn reinitialize(&self, target: &SwapTarget) -> Result<(), LifecycleError>;

    /// Start the new component at `version`
    async fn start(&self, target: &SwapTarget, version: &VersionRef) -> Result<(), LifecycleError>;

    /// One readiness probe
    async fn health_check(&self, target: &SwapTarget) -> Result<HealthStatus, LifecycleError>;
}

/// Lifecycle providers keyed by target kind
#[derive(Clone, Default)]
pub struct LifecycleSet {
    providers: BTreeMap<TargetKind, Arc<dyn LifecycleProvider>>,
}

impl std::fmt::Debug for LifecycleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleSet")
            .field("kinds", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LifecycleSet {
    /// Create an empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use one provider for every kind
    #[must_use]
    pub fn uniform(provider: Arc<dyn LifecycleProvider>) -> Self {
        let mut set = Self::new();
        for kind in TargetKind::ALL {
            set.register(kind, Arc::clone(&provider));
        }
        set
    }

    /// Register the provider for a kind, replacing any previous one
    pub fn register(&mut self, kind: TargetKind, provider: Arc<dyn LifecycleProvider>) {
        self.providers.insert(kind, provider);
    }

    /// With provider for a kind
    #[must_use]
    pub fn with(mut self, kind: TargetKind, provider: Arc<dyn LifecycleProvider>) -> Self {
        self.register(kind, provider);
        self
    }

    /// Provider for a kind
    #[must_use]
    pub fn get(&self, kind: TargetKind) -> Option<&Arc<dyn LifecycleProvider>> {
        self.providers.get(&kind)
    }

    /// Check if a kind has a provider
    #[inline]
    #[must_use]
    pub fn contains(&self, kind: TargetKind) -> bool {
        self.providers.contains_key(&kind)
    }
}
