//! Mutable Repository Contract
//!
//! The addon catalog the coordinator orchestrates. The persisted layout is
//! an external collaborator's concern; the runtime only needs the four
//! mutation operations plus enumeration of the enabled set. Every mutation
//! is idempotent on no-op: repeated calls with no underlying state change
//! return `false` rather than failing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{AddonDependencyEdge, AddonIdentity, Result};

/// Opaque artifact reference stored alongside a deployed addon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonArtifact {
    pub name: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AddonArtifact {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// One catalog entry: an addon identity plus its declared dependency edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonRecord {
    pub identity: AddonIdentity,
    #[serde(default)]
    pub edges: Vec<AddonDependencyEdge>,
}

impl AddonRecord {
    pub fn new(identity: AddonIdentity, edges: Vec<AddonDependencyEdge>) -> Self {
        Self { identity, edges }
    }
}

/// Mutable addon catalog consumed by the lifecycle coordinator.
#[async_trait]
pub trait MutableAddonRepository: Send + Sync {
    /// Deploy an addon with its dependency edges and artifacts. Returns
    /// whether the catalog state actually changed.
    async fn deploy(
        &self,
        identity: AddonIdentity,
        edges: Vec<AddonDependencyEdge>,
        artifacts: Vec<AddonArtifact>,
    ) -> Result<bool>;

    /// Mark an addon enabled for scheduling.
    async fn enable(&self, identity: &AddonIdentity) -> Result<bool>;

    /// Mark an addon disabled. The coordinator treats this as a forced stop
    /// plus exclusion from future scheduling.
    async fn disable(&self, identity: &AddonIdentity) -> Result<bool>;

    /// Remove an addon from the catalog. Requires a prior successful stop.
    async fn undeploy(&self, identity: &AddonIdentity) -> Result<bool>;

    /// Enumerate the currently enabled addons and their dependency edges.
    async fn list_enabled(&self) -> Result<Vec<AddonRecord>>;
}
