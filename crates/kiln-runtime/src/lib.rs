//! Kiln Runtime
//!
//! The addon lifecycle orchestration engine: loads, starts, stops, and
//! isolates independently-versioned addons inside a single long-lived
//! process. Each addon runs inside its own isolation boundary with its own
//! capability registry, exposed-service surface, and failure domain.
//!
//! # Architecture
//!
//! - [`boundary`]: per-addon isolation boundaries and the
//!   execute-in-boundary primitive.
//! - [`adapter`]: the adaptation protocol that lets a lifecycle provider
//!   loaded in one boundary be invoked safely from another.
//! - [`registry`]: the process-wide state registry tracking each addon's
//!   status, boundary handle, and exposed services.
//! - [`worker`]: the per-addon worker driving one start attempt and one stop
//!   attempt, containing failures to its own addon.
//! - [`coordinator`]: schedules workers concurrently, enforces
//!   one-worker-per-identity, and fans out shutdown.
//! - [`catalog`]: an in-memory reference implementation of the mutable
//!   repository contract.
//! - [`runtime`]: the `Kiln` root object tying config, registry, and
//!   coordinator together with explicit init/teardown.

pub mod adapter;
pub mod boundary;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod registry;
pub mod runtime;
pub mod telemetry;
pub mod worker;

// Re-export the contract crate so embedders need a single dependency.
pub use kiln_api as api;

pub use adapter::LIFECYCLE_PROVIDER;
pub use boundary::{BoundaryHandle, BoundaryId, Capability, IsolationBoundary, active_boundary};
pub use catalog::InMemoryAddonCatalog;
pub use config::KilnConfig;
pub use coordinator::{LifecycleCoordinator, ListenerHandle, StartHandle};
pub use kiln_api::{
    AddonArtifact, AddonDependencyEdge, AddonIdentity, AddonRecord, AddonStatus,
    DependencyServices, Error, LifecycleListener, LifecycleProvider, MutableAddonRepository,
    PreShutdown, ProviderFault, Result, RuntimeInfo, ServiceRegistry,
};
pub use registry::{AddonEntry, AddonStateManager};
pub use runtime::Kiln;
