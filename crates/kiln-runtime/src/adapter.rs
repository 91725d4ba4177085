//! Lifecycle Provider Adaptation
//!
//! A lifecycle provider's concrete instance lives inside the boundary of
//! the addon that contributed it. The orchestrator must be able to invoke
//! it from its own boundary without compile-time knowledge of the concrete
//! type. [`AdaptedProvider`] is the explicit per-capability adapter: every
//! call forwards through the target boundary's execution primitive, so the
//! active-boundary context is temporarily the provider's own, and faults
//! come back in the caller's taxonomy. The crossing is transparent to the
//! caller except for timing and possible adaptation faults.

use std::sync::Arc;

use kiln_api::{
    AddonIdentity, DependencyServices, Error, LifecycleProvider, Result, RuntimeInfo,
    ServiceRegistry,
};

use crate::boundary::{BoundaryHandle, Capability};

/// The capability a container-implementation addon registers in its own
/// boundary at load time.
pub const LIFECYCLE_PROVIDER: Capability<dyn LifecycleProvider> =
    Capability::new("kiln.lifecycle-provider");

/// Caller-side proxy for a provider living in another boundary.
pub struct AdaptedProvider {
    provided_by: AddonIdentity,
    target: BoundaryHandle,
    inner: Arc<dyn LifecycleProvider>,
}

impl AdaptedProvider {
    pub(crate) fn new(
        provided_by: AddonIdentity,
        target: BoundaryHandle,
        inner: Arc<dyn LifecycleProvider>,
    ) -> Self {
        Self {
            provided_by,
            target,
            inner,
        }
    }

    /// Identity of the dependency addon that contributed the provider.
    pub fn provided_by(&self) -> &AddonIdentity {
        &self.provided_by
    }

    pub async fn initialize(
        &self,
        runtime: &RuntimeInfo,
        dependencies: &DependencyServices,
        self_id: &AddonIdentity,
    ) -> Result<()> {
        self.target
            .enter(self.inner.initialize(runtime, dependencies, self_id))
            .await?
            .map_err(Error::Provider)
    }

    pub async fn start(&self, addon: &AddonIdentity) -> Result<()> {
        self.target
            .enter(self.inner.start(addon))
            .await?
            .map_err(Error::Provider)
    }

    pub async fn stop(&self, addon: &AddonIdentity) -> Result<()> {
        self.target
            .enter(self.inner.stop(addon))
            .await?
            .map_err(Error::Provider)
    }

    pub async fn service_registry(&self, addon: &AddonIdentity) -> Result<ServiceRegistry> {
        self.target
            .enter(self.inner.service_registry(addon))
            .await?
            .map_err(Error::Provider)
    }

    pub async fn post_startup(&self, addon: &AddonIdentity) -> Result<()> {
        self.target
            .enter(self.inner.post_startup(addon))
            .await?
            .map_err(Error::Provider)
    }
}

impl std::fmt::Debug for AdaptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptedProvider")
            .field("provided_by", &self.provided_by)
            .field("target", &self.target.name())
            .finish()
    }
}
