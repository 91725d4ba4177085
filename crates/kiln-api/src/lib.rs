//! Kiln API
//!
//! Public contract types for the Kiln addon runtime: addon identities and
//! dependency edges, the addon status state machine, the error taxonomy, the
//! `LifecycleProvider` capability implemented by container addons, the
//! exposed-service registry, the mutable repository contract, and the
//! lifecycle listener surface.
//!
//! The orchestration engine itself lives in `kiln-runtime`; this crate is
//! what addon authors and repository implementations compile against.

mod error;
mod event;
mod identity;
mod provider;
mod repository;
mod services;
mod status;

pub use error::{Error, ProviderFault, Result};
pub use event::{LifecycleListener, PreShutdown};
pub use identity::{AddonDependencyEdge, AddonIdentity};
pub use provider::{LifecycleProvider, RuntimeInfo};
pub use repository::{AddonArtifact, AddonRecord, MutableAddonRepository};
pub use services::{DependencyServices, ServiceRegistry};
pub use status::AddonStatus;
