//! Isolation Boundary
//!
//! Every addon gets an isolated namespace for its own capabilities,
//! separate from other addons except along declared dependency edges. The
//! runtime needs exactly two things from a boundary: "execute this future
//! with the active-boundary context set to B" and "look up a named
//! capability visible inside B".
//!
//! Capability discovery is an explicit registry lookup keyed by
//! (boundary, capability descriptor); whatever loads an addon populates its
//! boundary's registry at load time. There is no implicit scanning.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use uuid::Uuid;

use kiln_api::{Error, Result};

tokio::task_local! {
    static ACTIVE_BOUNDARY: BoundaryId;
}

/// The boundary whose context the current task is executing in, if any.
pub fn active_boundary() -> Option<BoundaryId> {
    ACTIVE_BOUNDARY.try_with(|id| *id).ok()
}

/// Opaque identifier for one isolation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundaryId(Uuid);

impl BoundaryId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for BoundaryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed descriptor for a capability that boundaries can expose.
///
/// Declared as a const and used as the lookup key, e.g. the lifecycle
/// provider capability in [`crate::adapter::LIFECYCLE_PROVIDER`].
pub struct Capability<T: ?Sized> {
    name: &'static str,
    _marker: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized> Capability<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Shared handle to an isolation boundary.
pub type BoundaryHandle = Arc<IsolationBoundary>;

/// One addon's isolated namespace.
///
/// Holds the capability registry populated when the addon is loaded, and a
/// closed flag set on undeploy: entering a closed boundary fails with a
/// boundary-adaptation error.
pub struct IsolationBoundary {
    id: BoundaryId,
    name: String,
    capabilities: DashMap<&'static str, Vec<Box<dyn Any + Send + Sync>>>,
    closed: AtomicBool,
}

impl IsolationBoundary {
    /// Create a boundary named after the addon it hosts.
    pub fn new(name: impl Into<String>) -> BoundaryHandle {
        Arc::new(Self {
            id: BoundaryId::new(),
            name: name.into(),
            capabilities: DashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> BoundaryId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a capability implementation inside this boundary.
    pub fn register<T>(&self, capability: &Capability<T>, implementation: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.capabilities
            .entry(capability.name)
            .or_default()
            .push(Box::new(implementation));
    }

    /// All implementations of a capability visible inside this boundary.
    pub fn implementations<T>(&self, capability: &Capability<T>) -> Vec<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        match self.capabilities.get(capability.name) {
            Some(entry) => entry
                .iter()
                .filter_map(|erased| erased.downcast_ref::<Arc<T>>().cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Mark the boundary torn down. Subsequent `enter` calls fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run a future with the active-boundary context set to this boundary.
    ///
    /// The previous context is restored when the future completes; nesting
    /// is allowed (a call adapted into another boundary runs scoped to that
    /// boundary, then falls back out).
    pub async fn enter<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        if self.is_closed() {
            return Err(Error::BoundaryAdaptation {
                boundary: self.name.clone(),
                reason: "boundary is closed".to_string(),
            });
        }
        Ok(ACTIVE_BOUNDARY.scope(self.id, fut).await)
    }
}

impl std::fmt::Debug for IsolationBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationBoundary")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
