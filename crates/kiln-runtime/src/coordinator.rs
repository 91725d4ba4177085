//! Lifecycle Coordinator
//!
//! Creates and schedules addon workers, tracks their outstanding tasks, and
//! owns the final status transitions (Started / Failed / Stopped), serialized
//! per addon identity through the entry's status channel. Every worker runs
//! concurrently with every other worker: ordering between dependents and
//! dependencies is enforced entirely by the in-worker readiness wait, never
//! by scheduling order, so independent subtrees start in parallel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use kiln_api::{
    AddonIdentity, AddonRecord, AddonStatus, Error, LifecycleListener, MutableAddonRepository,
    PreShutdown, Result, RuntimeInfo,
};

use crate::boundary::IsolationBoundary;
use crate::config::KilnConfig;
use crate::registry::{AddonEntry, AddonStateManager};
use crate::worker::AddonWorker;

// ─────────────────────────────────────────────────────────────────────────────
// Handles
// ─────────────────────────────────────────────────────────────────────────────

/// Completion handle for one start attempt. Resolves once the attempt is
/// settled (Started, Failed, or Stopped by a concurrent shutdown).
#[derive(Debug)]
pub struct StartHandle {
    identity: AddonIdentity,
    rx: watch::Receiver<AddonStatus>,
}

impl StartHandle {
    fn new(entry: &AddonEntry) -> Self {
        Self {
            identity: entry.identity().clone(),
            rx: entry.watch(),
        }
    }

    pub fn identity(&self) -> &AddonIdentity {
        &self.identity
    }

    pub fn status(&self) -> AddonStatus {
        *self.rx.borrow()
    }

    /// Block until the start attempt settles; returns the settled status.
    pub async fn wait(mut self) -> AddonStatus {
        loop {
            let status = *self.rx.borrow_and_update();
            if status.start_settled() {
                return status;
            }
            if self.rx.changed().await.is_err() {
                // entry removed from the run mid-attempt
                return *self.rx.borrow();
            }
        }
    }
}

/// Deregistration handle for a lifecycle listener.
pub struct ListenerHandle {
    id: u64,
    listeners: std::sync::Weak<Mutex<Vec<(u64, Arc<dyn LifecycleListener>)>>>,
}

impl ListenerHandle {
    /// Remove the listener; later events are not delivered.
    pub fn remove(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────────────────────────

struct WorkerSlot {
    worker: Arc<AddonWorker>,
    start_task: Mutex<Option<JoinHandle<()>>>,
    stop_task: Mutex<Option<JoinHandle<()>>>,
}

/// Schedules workers, records their completions, and fans out shutdown.
pub struct LifecycleCoordinator {
    runtime: RuntimeInfo,
    state: Arc<AddonStateManager>,
    dependency_wait_timeout: Option<Duration>,
    shutdown_timeout: Duration,
    slots: DashMap<AddonIdentity, Arc<WorkerSlot>>,
    /// Final failure descriptions per addon, so a failure is never silently
    /// swallowed even when nobody holds the start handle.
    failures: DashMap<AddonIdentity, String>,
    listeners: Arc<Mutex<Vec<(u64, Arc<dyn LifecycleListener>)>>>,
    next_listener_id: AtomicU64,
}

impl LifecycleCoordinator {
    pub fn new(
        runtime: RuntimeInfo,
        config: &KilnConfig,
        state: Arc<AddonStateManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            state,
            dependency_wait_timeout: config.dependency_wait_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            slots: DashMap::new(),
            failures: DashMap::new(),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> &Arc<AddonStateManager> {
        &self.state
    }

    /// Recorded failure description for an addon, if its last attempt failed.
    pub fn failure_of(&self, identity: &AddonIdentity) -> Option<String> {
        self.failures.get(identity).map(|entry| entry.value().clone())
    }

    /// Render an error with its full source chain, so a wrapped cause (a
    /// dependency timeout, a provider fault) stays visible in the record.
    fn describe_failure(error: &Error) -> String {
        use std::error::Error as _;
        let mut text = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            text.push_str(": ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        text
    }

    // ── admission ────────────────────────────────────────────────────────────

    /// Admit one addon into the run, creating its isolation boundary.
    pub fn admit(&self, record: AddonRecord) -> Result<Arc<AddonEntry>> {
        let boundary = IsolationBoundary::new(record.identity.to_coordinates());
        self.state.admit(record.identity, record.edges, boundary)
    }

    /// Enumerate the repository and admit every enabled addon not yet known.
    pub async fn admit_enabled(&self, repository: &dyn MutableAddonRepository) -> Result<()> {
        for record in repository.list_enabled().await? {
            if self.state.get(&record.identity).is_none() {
                self.admit(record)?;
            }
        }
        Ok(())
    }

    // ── start ────────────────────────────────────────────────────────────────

    /// Schedule a start attempt. Returns immediately with a completion
    /// handle. An identity that is already Starting or Started yields the
    /// existing attempt's handle; a settled identity requires a redeploy.
    pub fn schedule_start(self: &Arc<Self>, identity: &AddonIdentity) -> Result<StartHandle> {
        let entry = self.state.entry(identity)?;
        if entry.is_excluded() {
            return Err(Error::Config(format!("addon [{identity}] is disabled")));
        }

        if !entry.begin_start() {
            return match entry.status() {
                AddonStatus::Starting | AddonStatus::Started => Ok(StartHandle::new(&entry)),
                _ => Err(Error::AlreadyScheduled(identity.clone())),
            };
        }
        self.notify_status(identity, AddonStatus::Starting);

        let worker = AddonWorker::new(
            self.runtime.clone(),
            Arc::clone(&self.state),
            Arc::clone(&entry),
            self.dependency_wait_timeout,
        );
        let slot = Arc::new(WorkerSlot {
            worker: Arc::clone(&worker),
            start_task: Mutex::new(None),
            stop_task: Mutex::new(None),
        });
        self.slots.insert(identity.clone(), Arc::clone(&slot));

        let coordinator = Arc::clone(self);
        let id = identity.clone();
        let task = tokio::spawn(async move {
            let result = worker.run_start().await;
            coordinator.finish_start(&id, &worker, result);
        });
        *slot.start_task.lock() = Some(task);

        Ok(StartHandle::new(&entry))
    }

    /// Record a worker's start completion. Single writer of the final
    /// Started/Failed transition for this identity.
    fn finish_start(
        self: &Arc<Self>,
        identity: &AddonIdentity,
        worker: &Arc<AddonWorker>,
        result: Result<()>,
    ) {
        let Some(entry) = self.state.get(identity) else {
            return;
        };
        match result {
            Ok(()) => {
                if entry.transition(AddonStatus::Started).is_ok() {
                    self.notify_status(identity, AddonStatus::Started);
                } else if worker.stop_requested() {
                    // the stop task may have run before the provider slot was
                    // filled; a second pass releases whatever start acquired
                    // (the slot is drained on stop, so at most one of the two
                    // passes reaches the provider)
                    tracing::debug!(addon = %identity, "start completed during stop request");
                    let coordinator = Arc::clone(self);
                    let worker = Arc::clone(worker);
                    let id = identity.clone();
                    tokio::spawn(async move {
                        let result = worker.run_stop().await;
                        coordinator.finish_stop(&id, result);
                    });
                }
            }
            Err(error) => {
                if worker.stop_requested() {
                    tracing::debug!(
                        addon = %identity,
                        error = %error,
                        "start aborted by concurrent stop request"
                    );
                    return;
                }
                self.failures
                    .insert(identity.clone(), Self::describe_failure(&error));
                if entry.transition(AddonStatus::Failed).is_ok() {
                    self.notify_status(identity, AddonStatus::Failed);
                }
            }
        }
    }

    /// Block until every scheduled addon settles its start attempt; returns
    /// the settled statuses. Failures never cancel sibling attempts.
    pub async fn await_all_started(&self) -> Vec<(AddonIdentity, AddonStatus)> {
        let handles: Vec<StartHandle> = self
            .slots
            .iter()
            .filter_map(|slot| self.state.get(slot.key()).map(|entry| StartHandle::new(&entry)))
            .collect();

        join_all(handles.into_iter().map(|handle| async move {
            let identity = handle.identity().clone();
            let status = handle.wait().await;
            (identity, status)
        }))
        .await
    }

    // ── stop ─────────────────────────────────────────────────────────────────

    /// Hand off a stop request; blocks only long enough to flag the worker
    /// and spawn the stop task, not for stop to finish.
    pub fn request_stop(self: &Arc<Self>, identity: &AddonIdentity) -> Result<()> {
        let entry = self.state.entry(identity)?;
        let Some(slot) = self.slots.get(identity).map(|s| Arc::clone(&s)) else {
            // never scheduled; nothing to stop
            return Ok(());
        };

        // flag before any transition, so a start-time failure caused by this
        // stop is not mis-reported as unexpected
        slot.worker.request_stop();

        if entry.transition(AddonStatus::Stopping).is_err() {
            tracing::debug!(addon = %identity, status = %entry.status(), "stop request is a no-op");
            return Ok(());
        }
        self.notify_status(identity, AddonStatus::Stopping);

        let coordinator = Arc::clone(self);
        let worker = Arc::clone(&slot.worker);
        let id = identity.clone();
        let task = tokio::spawn(async move {
            let result = worker.run_stop().await;
            coordinator.finish_stop(&id, result);
        });
        *slot.stop_task.lock() = Some(task);
        Ok(())
    }

    /// Record a worker's stop completion. Single writer of the final
    /// Stopped/Failed transition for this identity.
    fn finish_stop(&self, identity: &AddonIdentity, result: Result<()>) {
        let Some(entry) = self.state.get(identity) else {
            return;
        };
        match result {
            Ok(()) => {
                if entry.transition(AddonStatus::Stopped).is_ok() {
                    self.notify_status(identity, AddonStatus::Stopped);
                }
            }
            Err(error) => {
                self.failures
                    .insert(identity.clone(), Self::describe_failure(&error));
                if entry.transition(AddonStatus::Failed).is_ok() {
                    self.notify_status(identity, AddonStatus::Failed);
                }
            }
        }
    }

    /// Block until every scheduled addon reaches a terminal status.
    pub async fn await_all_stopped(&self) {
        let entries: Vec<Arc<AddonEntry>> = self
            .slots
            .iter()
            .filter_map(|slot| self.state.get(slot.key()))
            .collect();

        join_all(entries.iter().map(|entry| Self::await_terminal(entry))).await;
    }

    async fn await_terminal(entry: &AddonEntry) {
        let mut rx = entry.watch();
        loop {
            if rx.borrow_and_update().is_terminal() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Notify pre-shutdown listeners, then stop all active addons in
    /// best-effort reverse dependency order: layers of addons that no other
    /// active addon depends on are stopped and awaited before the addons
    /// they depend on.
    pub async fn shutdown(self: &Arc<Self>) {
        tracing::info!(runtime = %self.runtime, "shutting down all addons");
        let event = PreShutdown::new(self.runtime.clone());
        for listener in self.snapshot_listeners() {
            listener.pre_shutdown(&event);
        }

        loop {
            let active = self.active_addons();
            if active.is_empty() {
                break;
            }

            let mut layer: Vec<AddonIdentity> = active
                .iter()
                .filter(|candidate| {
                    !active.iter().any(|other| {
                        self.state
                            .get(other)
                            .map(|entry| {
                                entry
                                    .dependencies()
                                    .iter()
                                    .any(|edge| edge.dependency == **candidate)
                            })
                            .unwrap_or(false)
                    })
                })
                .cloned()
                .collect();
            if layer.is_empty() {
                // cycles are rejected upstream; fall back rather than spin
                layer = active;
            }

            for identity in &layer {
                if let Err(error) = self.request_stop(identity) {
                    tracing::warn!(addon = %identity, error = %error, "stop request failed");
                }
            }

            let waits = layer.iter().filter_map(|identity| self.state.get(identity));
            let settled = tokio::time::timeout(
                self.shutdown_timeout,
                join_all(waits.map(|entry| async move { Self::await_terminal(&entry).await })),
            )
            .await;
            if settled.is_err() {
                tracing::warn!(
                    addons = ?layer.iter().map(|id| id.to_coordinates()).collect::<Vec<_>>(),
                    "addons did not stop within the shutdown timeout"
                );
                break;
            }
        }
    }

    fn active_addons(&self) -> Vec<AddonIdentity> {
        self.state
            .identities()
            .into_iter()
            .filter(|identity| {
                matches!(
                    self.state.status(identity),
                    Some(AddonStatus::Starting | AddonStatus::Started | AddonStatus::Stopping)
                )
            })
            .collect()
    }

    // ── repository integration ───────────────────────────────────────────────

    /// Re-enable an addon in the catalog and clear its exclusion.
    pub async fn enable(
        &self,
        repository: &dyn MutableAddonRepository,
        identity: &AddonIdentity,
    ) -> Result<bool> {
        let changed = repository.enable(identity).await?;
        if let Some(entry) = self.state.get(identity) {
            entry.clear_excluded();
        }
        Ok(changed)
    }

    /// Disable an addon: catalog disable, forced stop, and exclusion from
    /// future scheduling.
    pub async fn disable(
        self: &Arc<Self>,
        repository: &dyn MutableAddonRepository,
        identity: &AddonIdentity,
    ) -> Result<bool> {
        let changed = repository.disable(identity).await?;
        if let Some(entry) = self.state.get(identity) {
            entry.set_excluded();
            self.request_stop(identity)?;
        }
        Ok(changed)
    }

    /// Undeploy an addon. Requires the lifecycle instance to be settled
    /// (never started, stopped, or failed); closes its boundary and removes
    /// it from the run, then removes the catalog record.
    pub async fn undeploy(
        &self,
        repository: &dyn MutableAddonRepository,
        identity: &AddonIdentity,
    ) -> Result<bool> {
        if let Some(entry) = self.state.get(identity) {
            match entry.status() {
                AddonStatus::Unstarted | AddonStatus::Stopped | AddonStatus::Failed => {}
                _ => return Err(Error::NotStopped(identity.clone())),
            }
            entry.boundary().close();
            self.state.remove(identity);
            self.slots.remove(identity);
            self.failures.remove(identity);
        }
        repository.undeploy(identity).await
    }

    // ── listeners ────────────────────────────────────────────────────────────

    /// Register a lifecycle listener; the handle deregisters it.
    pub fn register_listener(&self, listener: Arc<dyn LifecycleListener>) -> ListenerHandle {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, listener));
        ListenerHandle {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    fn snapshot_listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        self.listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn notify_status(&self, identity: &AddonIdentity, status: AddonStatus) {
        for listener in self.snapshot_listeners() {
            listener.status_changed(identity, status);
        }
    }
}

impl std::fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("runtime", &self.runtime)
            .field("scheduled", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> Arc<LifecycleCoordinator> {
        LifecycleCoordinator::new(
            RuntimeInfo::new("kiln", "0.1.0"),
            &KilnConfig::default(),
            Arc::new(AddonStateManager::new()),
        )
    }

    fn record(name: &str) -> AddonRecord {
        AddonRecord::new(AddonIdentity::new(name, "1.0.0"), Vec::new())
    }

    #[tokio::test]
    async fn test_unknown_addon_cannot_be_scheduled() {
        let coordinator = coordinator();
        let ghost = AddonIdentity::new("ghost", "1.0.0");
        assert!(matches!(
            coordinator.schedule_start(&ghost),
            Err(Error::UnknownAddon(_))
        ));
        assert!(matches!(
            coordinator.request_stop(&ghost),
            Err(Error::UnknownAddon(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_before_schedule_is_a_noop() {
        let coordinator = coordinator();
        coordinator.admit(record("a")).unwrap();

        let identity = AddonIdentity::new("a", "1.0.0");
        coordinator.request_stop(&identity).unwrap();
        assert_eq!(
            coordinator.state().status(&identity),
            Some(AddonStatus::Unstarted)
        );
    }

    #[tokio::test]
    async fn test_removed_listener_gets_no_events() {
        struct Counting(std::sync::atomic::AtomicU64);
        impl LifecycleListener for Counting {
            fn status_changed(&self, _addon: &AddonIdentity, _status: AddonStatus) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let coordinator = coordinator();
        coordinator.admit(record("a")).unwrap();

        let counting = Arc::new(Counting(AtomicU64::new(0)));
        let listener: Arc<dyn LifecycleListener> = Arc::clone(&counting) as Arc<dyn LifecycleListener>;
        let handle = coordinator.register_listener(listener);
        handle.remove();

        let identity = AddonIdentity::new("a", "1.0.0");
        coordinator
            .schedule_start(&identity)
            .unwrap()
            .wait()
            .await;
        assert_eq!(counting.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_schedule_during_stop_names_the_stop() {
        let coordinator = coordinator();
        coordinator.admit(record("a")).unwrap();

        let identity = AddonIdentity::new("a", "1.0.0");
        let entry = coordinator.state().entry(&identity).unwrap();
        assert!(entry.begin_start());
        entry.transition(AddonStatus::Stopping).unwrap();

        let err = coordinator.schedule_start(&identity).unwrap_err();
        assert!(matches!(err, Error::AlreadyScheduled(_)));
        assert!(err.to_string().contains("stopping"));
    }

    #[tokio::test]
    async fn test_dangling_dependency_edge_is_skipped() {
        let coordinator = coordinator();
        let a = AddonIdentity::new("a", "1.0.0");
        let b = AddonIdentity::new("b", "1.0.0");
        // `a` requires `b`, which is never admitted or started
        coordinator
            .admit(AddonRecord::new(
                a.clone(),
                vec![kiln_api::AddonDependencyEdge::required(a.clone(), b)],
            ))
            .unwrap();

        // a dangling edge is skipped at the readiness wait, so this start
        // succeeds; failures are exercised end to end in tests/lifecycle.rs
        let status = coordinator.schedule_start(&a).unwrap().wait().await;
        assert_eq!(status, AddonStatus::Started);
        assert!(coordinator.failure_of(&a).is_none());
    }
}
