//! Addon Identity
//!
//! An addon is identified by its (name, version) pair. Identities are the
//! keys for dependency edges, registry lookups, and worker slots.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Immutable (name, version) pair identifying one addon.
///
/// Equality and hashing are by value. The coordinate form is `name,version`,
/// e.g. `org.example.ui,2.1.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddonIdentity {
    name: String,
    version: String,
}

impl AddonIdentity {
    /// Create an identity from a name and version.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse an identity from its `name,version` coordinate form.
    pub fn from_coordinates(coordinates: &str) -> Result<Self> {
        match coordinates.split_once(',') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                Ok(Self::new(name, version))
            }
            _ => Err(Error::Config(format!(
                "invalid addon coordinates '{coordinates}', expected 'name,version'"
            ))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Render the `name,version` coordinate form.
    pub fn to_coordinates(&self) -> String {
        format!("{},{}", self.name, self.version)
    }
}

impl std::fmt::Display for AddonIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.name, self.version)
    }
}

/// A directed dependency edge between two addons.
///
/// Optional edges do not gate the dependent's readiness wait. Cycles are a
/// configuration error rejected by the external resolver; the runtime never
/// checks for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonDependencyEdge {
    /// The addon that declares the dependency.
    pub dependent: AddonIdentity,
    /// The addon being depended on.
    pub dependency: AddonIdentity,
    /// Whether the dependent may start without this dependency.
    #[serde(default)]
    pub optional: bool,
}

impl AddonDependencyEdge {
    /// Create a required (non-optional) edge.
    pub fn required(dependent: AddonIdentity, dependency: AddonIdentity) -> Self {
        Self {
            dependent,
            dependency,
            optional: false,
        }
    }

    /// Create an optional edge.
    pub fn optional(dependent: AddonIdentity, dependency: AddonIdentity) -> Self {
        Self {
            dependent,
            dependency,
            optional: true,
        }
    }
}
