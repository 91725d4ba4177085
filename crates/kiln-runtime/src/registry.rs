//! Addon State Registry
//!
//! Process-wide map from addon identity to its current status, its
//! isolation-boundary handle, and its exposed service registry. The status
//! of each entry lives in a watch channel: writes by the owning worker (and
//! the coordinator, for terminal bookkeeping) are release-visible to every
//! subscribed reader, and the receiver doubles as the start-attempt
//! completion future — there is no separate signal to keep in sync.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::watch;

use kiln_api::{
    AddonDependencyEdge, AddonIdentity, AddonStatus, DependencyServices, Error, Result,
    ServiceRegistry,
};

use crate::boundary::BoundaryHandle;

// ─────────────────────────────────────────────────────────────────────────────
// Addon Entry
// ─────────────────────────────────────────────────────────────────────────────

/// One admitted addon: identity, boundary, status channel, services, edges.
///
/// Created when the coordinator admits the addon into the run; destroyed or
/// replaced only on undeploy or redeploy.
pub struct AddonEntry {
    identity: AddonIdentity,
    boundary: BoundaryHandle,
    edges: Vec<AddonDependencyEdge>,
    status_tx: watch::Sender<AddonStatus>,
    services: RwLock<Option<ServiceRegistry>>,
    excluded: AtomicBool,
}

impl AddonEntry {
    fn new(
        identity: AddonIdentity,
        edges: Vec<AddonDependencyEdge>,
        boundary: BoundaryHandle,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(AddonStatus::Unstarted);
        Arc::new(Self {
            identity,
            boundary,
            edges,
            status_tx,
            services: RwLock::new(None),
            excluded: AtomicBool::new(false),
        })
    }

    pub fn identity(&self) -> &AddonIdentity {
        &self.identity
    }

    pub fn boundary(&self) -> &BoundaryHandle {
        &self.boundary
    }

    /// Direct dependency edges declared by this addon.
    pub fn dependencies(&self) -> &[AddonDependencyEdge] {
        &self.edges
    }

    pub fn status(&self) -> AddonStatus {
        *self.status_tx.borrow()
    }

    /// Subscribe to status changes.
    pub fn watch(&self) -> watch::Receiver<AddonStatus> {
        self.status_tx.subscribe()
    }

    /// Exposed services, once the addon's provider has published them.
    pub fn services(&self) -> Option<ServiceRegistry> {
        self.services.read().clone()
    }

    /// Apply a status transition, refusing anything non-monotonic.
    pub(crate) fn transition(&self, to: AddonStatus) -> Result<()> {
        let mut result = Ok(());
        self.status_tx.send_if_modified(|current| {
            if current.can_transition(to) {
                *current = to;
                true
            } else {
                result = Err(Error::InvalidTransition {
                    addon: self.identity.clone(),
                    from: *current,
                    to,
                });
                false
            }
        });
        result
    }

    /// Atomic Unstarted → Starting check-and-set. Returns whether this
    /// caller won the transition; only the winner may spawn a worker.
    pub(crate) fn begin_start(&self) -> bool {
        self.status_tx.send_if_modified(|current| {
            if *current == AddonStatus::Unstarted {
                *current = AddonStatus::Starting;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn publish_services(&self, registry: ServiceRegistry) {
        *self.services.write() = Some(registry);
    }

    pub(crate) fn set_excluded(&self) {
        self.excluded.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_excluded(&self) {
        self.excluded.store(false, Ordering::SeqCst);
    }

    /// Disabled addons stay registered but are excluded from scheduling.
    pub fn is_excluded(&self) -> bool {
        self.excluded.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for AddonEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonEntry")
            .field("identity", &self.identity)
            .field("status", &self.status())
            .field("boundary", &self.boundary.name())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State Manager
// ─────────────────────────────────────────────────────────────────────────────

/// The process-wide state registry. The only mutable state shared across
/// workers; each entry's status is written by its own worker plus the
/// coordinator, and read by any number of other workers.
#[derive(Default)]
pub struct AddonStateManager {
    entries: DashMap<AddonIdentity, Arc<AddonEntry>>,
}

impl AddonStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an addon's identity and dependency edges into the run.
    pub fn admit(
        &self,
        identity: AddonIdentity,
        edges: Vec<AddonDependencyEdge>,
        boundary: BoundaryHandle,
    ) -> Result<Arc<AddonEntry>> {
        if self.entries.contains_key(&identity) {
            return Err(Error::Config(format!(
                "addon [{identity}] is already admitted; undeploy it first"
            )));
        }
        let entry = AddonEntry::new(identity.clone(), edges, boundary);
        self.entries.insert(identity, Arc::clone(&entry));
        Ok(entry)
    }

    pub fn get(&self, identity: &AddonIdentity) -> Option<Arc<AddonEntry>> {
        self.entries.get(identity).map(|e| Arc::clone(&e))
    }

    /// Like [`get`](Self::get), failing for unknown identities.
    pub fn entry(&self, identity: &AddonIdentity) -> Result<Arc<AddonEntry>> {
        self.get(identity)
            .ok_or_else(|| Error::UnknownAddon(identity.clone()))
    }

    pub fn status(&self, identity: &AddonIdentity) -> Option<AddonStatus> {
        self.get(identity).map(|entry| entry.status())
    }

    pub fn boundary_of(&self, identity: &AddonIdentity) -> Option<BoundaryHandle> {
        self.get(identity).map(|entry| Arc::clone(entry.boundary()))
    }

    pub fn identities(&self) -> Vec<AddonIdentity> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub(crate) fn remove(&self, identity: &AddonIdentity) -> Option<Arc<AddonEntry>> {
        self.entries.remove(identity).map(|(_, entry)| entry)
    }

    /// Snapshot of the service registries of an addon's direct dependencies
    /// that are currently started. Dependents never observe services ahead
    /// of the owning addon's Started status.
    pub fn dependency_services(&self, entry: &AddonEntry) -> DependencyServices {
        let mut snapshot = HashMap::new();
        for edge in entry.dependencies() {
            if let Some(dependency) = self.get(&edge.dependency) {
                if dependency.status().is_started() {
                    snapshot.insert(
                        edge.dependency.clone(),
                        dependency.services().unwrap_or_default(),
                    );
                }
            }
        }
        DependencyServices::new(snapshot)
    }

    /// Dependency-readiness wait: resolve once `dependency` is Started, or
    /// with a failure once it can no longer start. Unbounded when `timeout`
    /// is None, matching the source behavior; a bounded wait surfaces
    /// [`Error::DependencyWaitTimeout`] instead of hanging on a dependency
    /// that will never start.
    pub async fn wait_until_started(
        &self,
        waiter: &AddonIdentity,
        dependency: &AddonIdentity,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let entry = self.entry(dependency)?;
        let mut rx = entry.watch();

        let wait = async {
            loop {
                let status = *rx.borrow_and_update();
                match status {
                    AddonStatus::Started => return Ok(()),
                    AddonStatus::Stopping | AddonStatus::Stopped | AddonStatus::Failed => {
                        return Err(Error::DependencyFailed {
                            addon: waiter.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                    AddonStatus::Unstarted | AddonStatus::Starting => {}
                }
                if rx.changed().await.is_err() {
                    // entry was removed from the run
                    return Err(Error::DependencyFailed {
                        addon: waiter.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        };

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => Err(Error::DependencyWaitTimeout {
                    addon: waiter.clone(),
                    dependency: dependency.clone(),
                }),
            },
            None => wait.await,
        }
    }
}

impl std::fmt::Debug for AddonStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonStateManager")
            .field("addons", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;
    use crate::boundary::IsolationBoundary;

    fn admit(manager: &AddonStateManager, name: &str) -> Arc<AddonEntry> {
        let identity = AddonIdentity::new(name, "1.0.0");
        manager
            .admit(
                identity.clone(),
                Vec::new(),
                IsolationBoundary::new(identity.to_coordinates()),
            )
            .unwrap()
    }

    #[test]
    fn test_admit_refuses_duplicates() {
        let manager = AddonStateManager::new();
        admit(&manager, "core");
        let identity = AddonIdentity::new("core", "1.0.0");
        let result = manager.admit(
            identity.clone(),
            Vec::new(),
            IsolationBoundary::new("core,1.0.0"),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_transition_enforces_monotonicity() {
        let manager = AddonStateManager::new();
        let entry = admit(&manager, "core");

        assert!(entry.begin_start());
        assert!(!entry.begin_start());
        entry.transition(AddonStatus::Started).unwrap();

        let err = entry.transition(AddonStatus::Started).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        entry.transition(AddonStatus::Stopping).unwrap();
        entry.transition(AddonStatus::Stopped).unwrap();
    }

    #[tokio::test]
    async fn test_wait_resolves_on_started() {
        let manager = Arc::new(AddonStateManager::new());
        let entry = admit(&manager, "dep");
        let waiter = AddonIdentity::new("app", "1.0.0");

        let manager2 = Arc::clone(&manager);
        let waiter2 = waiter.clone();
        let dependency = entry.identity().clone();
        let wait = tokio::spawn(async move {
            manager2
                .wait_until_started(&waiter2, &dependency, None)
                .await
        });

        entry.begin_start();
        entry.transition(AddonStatus::Started).unwrap();

        tokio_test::assert_ok!(wait.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_fails_when_dependency_fails() {
        let manager = AddonStateManager::new();
        let entry = admit(&manager, "dep");
        let waiter = AddonIdentity::new("app", "1.0.0");

        entry.begin_start();
        entry.transition(AddonStatus::Failed).unwrap();

        let result = manager
            .wait_until_started(&waiter, entry.identity(), None)
            .await;
        assert!(matches!(result, Err(Error::DependencyFailed { .. })));
    }

    #[tokio::test]
    async fn test_bounded_wait_times_out() {
        let manager = AddonStateManager::new();
        let entry = admit(&manager, "dep");
        let waiter = AddonIdentity::new("app", "1.0.0");

        let result = manager
            .wait_until_started(&waiter, entry.identity(), Some(Duration::from_millis(20)))
            .await;
        assert!(matches!(result, Err(Error::DependencyWaitTimeout { .. })));
    }

    #[test]
    fn test_dependency_services_only_for_started() {
        let manager = AddonStateManager::new();
        let dep = admit(&manager, "dep");
        let identity = AddonIdentity::new("app", "1.0.0");
        let app = manager
            .admit(
                identity.clone(),
                vec![AddonDependencyEdge::required(
                    identity.clone(),
                    dep.identity().clone(),
                )],
                IsolationBoundary::new("app,1.0.0"),
            )
            .unwrap();

        assert!(manager.dependency_services(&app).is_empty());

        dep.begin_start();
        dep.transition(AddonStatus::Started).unwrap();
        let services = manager.dependency_services(&app);
        assert!(services.registry_of(dep.identity()).is_some());
    }
}
