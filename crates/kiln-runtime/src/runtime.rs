//! Kiln Root Object
//!
//! Ties config, the state registry, and the coordinator together behind an
//! explicit init/teardown surface. Embedders construct a `Kiln`, admit the
//! addons they want running, start them, and call `shutdown` when done;
//! nothing happens from a constructor or a destructor.

use std::sync::Arc;

use kiln_api::{
    AddonIdentity, AddonRecord, AddonStatus, LifecycleListener, MutableAddonRepository, Result,
    RuntimeInfo,
};

use crate::config::KilnConfig;
use crate::coordinator::{LifecycleCoordinator, ListenerHandle, StartHandle};
use crate::registry::{AddonEntry, AddonStateManager};

/// The runtime. Cheap to clone via the inner `Arc`s; all methods take
/// `&self`.
pub struct Kiln {
    config: KilnConfig,
    info: RuntimeInfo,
    state: Arc<AddonStateManager>,
    coordinator: Arc<LifecycleCoordinator>,
}

impl Kiln {
    pub fn new(config: KilnConfig) -> Self {
        let info = RuntimeInfo::new(config.runtime_name.clone(), env!("CARGO_PKG_VERSION"));
        let state = Arc::new(AddonStateManager::new());
        let coordinator = LifecycleCoordinator::new(info.clone(), &config, Arc::clone(&state));
        Self {
            config,
            info,
            state,
            coordinator,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(KilnConfig::default())
    }

    pub fn config(&self) -> &KilnConfig {
        &self.config
    }

    pub fn info(&self) -> &RuntimeInfo {
        &self.info
    }

    pub fn state(&self) -> &Arc<AddonStateManager> {
        &self.state
    }

    pub fn coordinator(&self) -> &Arc<LifecycleCoordinator> {
        &self.coordinator
    }

    /// Admit one addon into the run, creating its isolation boundary. The
    /// returned entry gives access to the boundary so the embedder can
    /// register capabilities before starting.
    pub fn admit(&self, record: AddonRecord) -> Result<Arc<AddonEntry>> {
        self.coordinator.admit(record)
    }

    /// Admit every enabled addon in a repository that isn't yet known.
    pub async fn admit_enabled(&self, repository: &dyn MutableAddonRepository) -> Result<()> {
        self.coordinator.admit_enabled(repository).await
    }

    /// Schedule one addon's start attempt.
    pub fn start(&self, identity: &AddonIdentity) -> Result<StartHandle> {
        self.coordinator.schedule_start(identity)
    }

    /// Schedule every admitted, unstarted addon concurrently and wait for
    /// all attempts to settle. Failures are contained per addon.
    pub async fn start_all(&self) -> Vec<(AddonIdentity, AddonStatus)> {
        for identity in self.state.identities() {
            if self.state.status(&identity) == Some(AddonStatus::Unstarted) {
                if let Err(error) = self.coordinator.schedule_start(&identity) {
                    tracing::warn!(addon = %identity, error = %error, "not scheduling addon");
                }
            }
        }
        self.coordinator.await_all_started().await
    }

    /// Request one addon's stop without waiting for it.
    pub fn request_stop(&self, identity: &AddonIdentity) -> Result<()> {
        self.coordinator.request_stop(identity)
    }

    /// Stop everything in reverse dependency order and wait, bounded by the
    /// configured shutdown timeout per layer.
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }

    pub fn register_listener(&self, listener: Arc<dyn LifecycleListener>) -> ListenerHandle {
        self.coordinator.register_listener(listener)
    }
}

impl std::fmt::Debug for Kiln {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kiln")
            .field("info", &self.info)
            .field("state", &self.state)
            .finish()
    }
}
