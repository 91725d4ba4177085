//! In-Memory Addon Catalog
//!
//! Reference implementation of the mutable repository contract, suitable
//! for embedders that assemble their addon set programmatically and for
//! tests. Mutations follow the strict idempotence rule: `true` only when
//! the catalog state actually changed.

use dashmap::DashMap;

use async_trait::async_trait;
use kiln_api::{
    AddonArtifact, AddonDependencyEdge, AddonIdentity, AddonRecord, MutableAddonRepository, Result,
};

struct CatalogEntry {
    edges: Vec<AddonDependencyEdge>,
    artifacts: Vec<AddonArtifact>,
    enabled: bool,
}

/// Process-local catalog keyed by addon identity.
#[derive(Default)]
pub struct InMemoryAddonCatalog {
    entries: DashMap<AddonIdentity, CatalogEntry>,
}

impl InMemoryAddonCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_deployed(&self, identity: &AddonIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn is_enabled(&self, identity: &AddonIdentity) -> bool {
        self.entries
            .get(identity)
            .map(|entry| entry.enabled)
            .unwrap_or(false)
    }

    pub fn artifacts_of(&self, identity: &AddonIdentity) -> Vec<AddonArtifact> {
        self.entries
            .get(identity)
            .map(|entry| entry.artifacts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MutableAddonRepository for InMemoryAddonCatalog {
    /// Deploying an identity already present replaces nothing and reports
    /// no change; an addon must be undeployed before it can be redeployed.
    async fn deploy(
        &self,
        identity: AddonIdentity,
        edges: Vec<AddonDependencyEdge>,
        artifacts: Vec<AddonArtifact>,
    ) -> Result<bool> {
        if self.entries.contains_key(&identity) {
            return Ok(false);
        }
        tracing::debug!(addon = %identity, edges = edges.len(), "deploying addon");
        self.entries.insert(
            identity,
            CatalogEntry {
                edges,
                artifacts,
                enabled: true,
            },
        );
        Ok(true)
    }

    async fn enable(&self, identity: &AddonIdentity) -> Result<bool> {
        let Some(mut entry) = self.entries.get_mut(identity) else {
            return Ok(false);
        };
        if entry.enabled {
            return Ok(false);
        }
        entry.enabled = true;
        Ok(true)
    }

    async fn disable(&self, identity: &AddonIdentity) -> Result<bool> {
        let Some(mut entry) = self.entries.get_mut(identity) else {
            return Ok(false);
        };
        if !entry.enabled {
            return Ok(false);
        }
        entry.enabled = false;
        Ok(true)
    }

    async fn undeploy(&self, identity: &AddonIdentity) -> Result<bool> {
        Ok(self.entries.remove(identity).is_some())
    }

    async fn list_enabled(&self) -> Result<Vec<AddonRecord>> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.enabled)
            .map(|entry| AddonRecord::new(entry.key().clone(), entry.edges.clone()))
            .collect())
    }
}

impl std::fmt::Debug for InMemoryAddonCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryAddonCatalog")
            .field("deployed", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> AddonIdentity {
        AddonIdentity::new(name, "1.0.0")
    }

    #[tokio::test]
    async fn test_deploy_is_idempotent() {
        let catalog = InMemoryAddonCatalog::new();
        let id = identity("core");

        assert!(catalog.deploy(id.clone(), Vec::new(), Vec::new()).await.unwrap());
        assert!(!catalog.deploy(id.clone(), Vec::new(), Vec::new()).await.unwrap());
        assert_eq!(catalog.len(), 1);
        assert!(catalog.is_enabled(&id));
    }

    #[tokio::test]
    async fn test_enable_disable_report_actual_change() {
        let catalog = InMemoryAddonCatalog::new();
        let id = identity("core");
        catalog.deploy(id.clone(), Vec::new(), Vec::new()).await.unwrap();

        // deployed addons start enabled
        assert!(!catalog.enable(&id).await.unwrap());
        assert!(catalog.disable(&id).await.unwrap());
        assert!(!catalog.disable(&id).await.unwrap());
        assert!(catalog.enable(&id).await.unwrap());

        // unknown identities are a no-op, not an error
        assert!(!catalog.enable(&identity("ghost")).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_enabled_filters_disabled() {
        let catalog = InMemoryAddonCatalog::new();
        let a = identity("a");
        let b = identity("b");
        catalog.deploy(a.clone(), Vec::new(), Vec::new()).await.unwrap();
        catalog.deploy(b.clone(), Vec::new(), Vec::new()).await.unwrap();
        catalog.disable(&b).await.unwrap();

        let enabled = catalog.list_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].identity, a);
    }

    #[tokio::test]
    async fn test_undeploy_removes_record() {
        let catalog = InMemoryAddonCatalog::new();
        let id = identity("core");
        catalog.deploy(id.clone(), Vec::new(), Vec::new()).await.unwrap();

        assert!(catalog.undeploy(&id).await.unwrap());
        assert!(!catalog.undeploy(&id).await.unwrap());
        assert!(!catalog.is_deployed(&id));
    }
}
