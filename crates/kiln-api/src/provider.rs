//! Lifecycle Provider
//!
//! The capability an addon may implement to customize start/stop behavior
//! for addons that depend on it. A container-implementation addon registers
//! one `LifecycleProvider` in its own isolation boundary at load time; the
//! worker of each dependent addon detects it and drives it through the
//! lifecycle.

use async_trait::async_trait;

use crate::{AddonIdentity, DependencyServices, ProviderFault, ServiceRegistry};

/// Information about the hosting runtime, passed to `initialize`.
#[derive(Debug, Clone)]
pub struct RuntimeInfo {
    pub name: String,
    pub version: String,
}

impl RuntimeInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for RuntimeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// SPI controlling addon lifecycles.
///
/// Invocations arrive through a boundary adapter: the concrete instance
/// lives in the providing addon's isolation boundary, and every call runs
/// with the active-boundary context switched to that boundary. None of the
/// methods return a control-flow value except `service_registry`; all may
/// fault.
#[async_trait]
pub trait LifecycleProvider: Send + Sync {
    /// Initialize the provider with the artifacts required for startup.
    async fn initialize(
        &self,
        runtime: &RuntimeInfo,
        dependencies: &DependencyServices,
        self_id: &AddonIdentity,
    ) -> Result<(), ProviderFault>;

    /// Start the given addon.
    async fn start(&self, addon: &AddonIdentity) -> Result<(), ProviderFault>;

    /// Stop the given addon. Runs even when start did not fully complete,
    /// to release partially-acquired resources.
    async fn stop(&self, addon: &AddonIdentity) -> Result<(), ProviderFault>;

    /// The service registry the addon exposes once started.
    async fn service_registry(
        &self,
        addon: &AddonIdentity,
    ) -> Result<ServiceRegistry, ProviderFault>;

    /// Post-startup tasks, run after every non-optional dependency of the
    /// addon is started.
    async fn post_startup(&self, addon: &AddonIdentity) -> Result<(), ProviderFault>;
}
