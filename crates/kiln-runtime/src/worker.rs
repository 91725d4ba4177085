//! Addon Worker
//!
//! One worker exists per addon-start attempt. It drives the full start
//! sequence (provider detection → initialize → start → publish services →
//! dependency-readiness wait → post-startup) and, on a later request, the
//! stop sequence. Failures are contained to this addon alone: a failed
//! worker never unwinds or cancels sibling addons.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use kiln_api::{
    AddonIdentity, Error, LifecycleProvider, Result, RuntimeInfo, ServiceRegistry,
};

use crate::adapter::{AdaptedProvider, LIFECYCLE_PROVIDER};
use crate::registry::{AddonEntry, AddonStateManager};

/// Drives one addon through a single start attempt and one stop attempt.
pub(crate) struct AddonWorker {
    runtime: RuntimeInfo,
    state: Arc<AddonStateManager>,
    entry: Arc<AddonEntry>,
    dependency_wait_timeout: Option<Duration>,
    /// Set before a start-time failure is reported, so failures caused by an
    /// intentional concurrent shutdown are not mis-reported.
    stop_requested: AtomicBool,
    /// The provider detected during start, kept so stop can run regardless
    /// of how far start got.
    provider: Mutex<Option<Arc<AdaptedProvider>>>,
}

impl AddonWorker {
    pub(crate) fn new(
        runtime: RuntimeInfo,
        state: Arc<AddonStateManager>,
        entry: Arc<AddonEntry>,
        dependency_wait_timeout: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            state,
            entry,
            dependency_wait_timeout,
            stop_requested: AtomicBool::new(false),
            provider: Mutex::new(None),
        })
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Scan direct dependencies for lifecycle-provider implementations.
    ///
    /// Zero matches means a no-op lifecycle. Exactly one dependency
    /// contributing exactly one implementation is the active provider.
    /// Anything else is a configuration error fatal to this start attempt.
    fn detect_provider(&self) -> Result<Option<Arc<AdaptedProvider>>> {
        let identity = self.entry.identity();
        let mut candidates: Vec<(AddonIdentity, Arc<dyn LifecycleProvider>)> = Vec::new();

        for edge in self.entry.dependencies() {
            // only dependencies loaded into the current run are scanned
            let Some(dependency) = self.state.get(&edge.dependency) else {
                continue;
            };
            let mut implementations = dependency.boundary().implementations(&LIFECYCLE_PROVIDER);
            match implementations.len() {
                0 => {}
                1 => {
                    if let Some(implementation) = implementations.pop() {
                        candidates.push((edge.dependency.clone(), implementation));
                    }
                }
                found => {
                    tracing::warn!(
                        addon = %identity,
                        dependency = %edge.dependency,
                        found,
                        "dependency exposes more than one lifecycle provider"
                    );
                    return Err(Error::AmbiguousProvider {
                        addon: identity.clone(),
                        offenders: vec![edge.dependency.clone()],
                    });
                }
            }
        }

        if candidates.len() > 1 {
            return Err(Error::AmbiguousProvider {
                addon: identity.clone(),
                offenders: candidates.into_iter().map(|(id, _)| id).collect(),
            });
        }

        match candidates.pop() {
            None => Ok(None),
            Some((provided_by, implementation)) => {
                let target = self
                    .state
                    .boundary_of(&provided_by)
                    .ok_or_else(|| Error::UnknownAddon(provided_by.clone()))?;
                Ok(Some(Arc::new(AdaptedProvider::new(
                    provided_by,
                    target,
                    implementation,
                ))))
            }
        }
    }

    /// The start sequence. The caller (coordinator task) owns the final
    /// status transition; this method owns the work and the failure wrap.
    pub(crate) async fn run_start(&self) -> Result<()> {
        let identity = self.entry.identity().clone();
        tracing::info!(
            addon = %identity,
            boundary = %self.entry.boundary().name(),
            "> starting addon"
        );
        let begun = Instant::now();

        match self.start_sequence(&identity).await {
            Ok(()) => {
                tracing::info!(
                    addon = %identity,
                    elapsed_ms = begun.elapsed().as_millis() as u64,
                    ">> started addon"
                );
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    addon = %identity,
                    boundary = %self.entry.boundary().name(),
                    error = %error,
                    "failed to start addon"
                );
                match error {
                    // ambiguity keeps its own name in the taxonomy
                    ambiguous @ Error::AmbiguousProvider { .. } => Err(ambiguous),
                    other => Err(Error::Start {
                        addon: identity,
                        source: Box::new(other),
                    }),
                }
            }
        }
    }

    async fn start_sequence(&self, identity: &AddonIdentity) -> Result<()> {
        let Some(provider) = self.detect_provider()? else {
            // no custom startup behavior; straight to started
            self.entry.publish_services(ServiceRegistry::new());
            return Ok(());
        };

        *self.provider.lock() = Some(Arc::clone(&provider));
        tracing::debug!(
            addon = %identity,
            provider = %provider.provided_by(),
            "lifecycle provider detected"
        );

        let dependencies = self.state.dependency_services(&self.entry);
        let sequence = async {
            provider
                .initialize(&self.runtime, &dependencies, identity)
                .await?;
            provider.start(identity).await?;

            let services = provider.service_registry(identity).await?;
            self.entry.publish_services(services);

            for edge in self.entry.dependencies() {
                if edge.optional || self.state.get(&edge.dependency).is_none() {
                    continue;
                }
                self.state
                    .wait_until_started(identity, &edge.dependency, self.dependency_wait_timeout)
                    .await?;
            }

            provider.post_startup(identity).await
        };
        self.entry.boundary().enter(sequence).await?
    }

    /// The stop sequence. Runs regardless of whether start fully completed,
    /// to release partially-acquired resources. Runtime-kind provider faults
    /// are re-raised unwrapped; any other failure is wrapped, naming the
    /// addon.
    pub(crate) async fn run_stop(&self) -> Result<()> {
        self.request_stop();
        let identity = self.entry.identity().clone();
        tracing::info!(
            addon = %identity,
            boundary = %self.entry.boundary().name(),
            "< stopping addon"
        );
        let begun = Instant::now();

        // drain the slot: whichever stop pass takes the provider releases it
        let provider = self.provider.lock().take();
        if let Some(provider) = provider {
            let result = match self.entry.boundary().enter(provider.stop(&identity)).await {
                Ok(inner) => inner,
                Err(adaptation) => Err(adaptation),
            };
            if let Err(error) = result {
                tracing::error!(
                    addon = %identity,
                    error = %error,
                    "failed to shut down addon"
                );
                return match error {
                    Error::Provider(fault) if fault.is_runtime() => Err(Error::Provider(fault)),
                    other => Err(Error::Shutdown {
                        addon: identity,
                        source: Box::new(other),
                    }),
                };
            }
        }

        tracing::info!(
            addon = %identity,
            elapsed_ms = begun.elapsed().as_millis() as u64,
            "<< stopped addon"
        );
        Ok(())
    }
}

impl std::fmt::Debug for AddonWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonWorker")
            .field("addon", self.entry.identity())
            .field("stop_requested", &self.stop_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::IsolationBoundary;
    use async_trait::async_trait;
    use kiln_api::{AddonDependencyEdge, DependencyServices, ProviderFault};
    use parking_lot::Mutex as PlMutex;

    struct ScriptedProvider {
        calls: Arc<PlMutex<Vec<&'static str>>>,
        stop_fault: PlMutex<Option<ProviderFault>>,
    }

    impl ScriptedProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Arc::new(PlMutex::new(Vec::new())),
                stop_fault: PlMutex::new(None),
            })
        }
    }

    #[async_trait]
    impl LifecycleProvider for ScriptedProvider {
        async fn initialize(
            &self,
            _runtime: &RuntimeInfo,
            _dependencies: &DependencyServices,
            _self_id: &AddonIdentity,
        ) -> std::result::Result<(), ProviderFault> {
            self.calls.lock().push("initialize");
            Ok(())
        }

        async fn start(&self, _addon: &AddonIdentity) -> std::result::Result<(), ProviderFault> {
            self.calls.lock().push("start");
            Ok(())
        }

        async fn stop(&self, _addon: &AddonIdentity) -> std::result::Result<(), ProviderFault> {
            self.calls.lock().push("stop");
            match self.stop_fault.lock().take() {
                Some(fault) => Err(fault),
                None => Ok(()),
            }
        }

        async fn service_registry(
            &self,
            _addon: &AddonIdentity,
        ) -> std::result::Result<ServiceRegistry, ProviderFault> {
            self.calls.lock().push("service_registry");
            Ok(ServiceRegistry::new())
        }

        async fn post_startup(
            &self,
            _addon: &AddonIdentity,
        ) -> std::result::Result<(), ProviderFault> {
            self.calls.lock().push("post_startup");
            Ok(())
        }
    }

    struct Fixture {
        state: Arc<AddonStateManager>,
        provider: Arc<ScriptedProvider>,
        container: AddonIdentity,
        app: AddonIdentity,
    }

    /// `container` exposes the provider; `app` depends on it.
    fn fixture() -> Fixture {
        let state = Arc::new(AddonStateManager::new());
        let container = AddonIdentity::new("container", "1.0.0");
        let app = AddonIdentity::new("app", "1.0.0");

        let container_boundary = IsolationBoundary::new(container.to_coordinates());
        let provider = ScriptedProvider::new();
        let implementation: Arc<dyn LifecycleProvider> = Arc::clone(&provider) as Arc<dyn LifecycleProvider>;
        container_boundary.register(&LIFECYCLE_PROVIDER, implementation);

        state
            .admit(container.clone(), Vec::new(), container_boundary)
            .unwrap();
        state
            .admit(
                app.clone(),
                vec![AddonDependencyEdge::required(
                    app.clone(),
                    container.clone(),
                )],
                IsolationBoundary::new(app.to_coordinates()),
            )
            .unwrap();

        Fixture {
            state,
            provider,
            container,
            app,
        }
    }

    fn worker_for(fixture: &Fixture, identity: &AddonIdentity) -> Arc<AddonWorker> {
        let entry = fixture.state.entry(identity).unwrap();
        AddonWorker::new(
            RuntimeInfo::new("kiln", "0.1.0"),
            Arc::clone(&fixture.state),
            entry,
            Some(Duration::from_millis(200)),
        )
    }

    fn mark_started(state: &AddonStateManager, identity: &AddonIdentity) {
        let entry = state.entry(identity).unwrap();
        entry.begin_start();
        entry.transition(kiln_api::AddonStatus::Started).unwrap();
    }

    #[tokio::test]
    async fn test_no_provider_means_noop_lifecycle() {
        let fixture = fixture();
        let worker = worker_for(&fixture, &fixture.container);

        worker.run_start().await.unwrap();
        assert!(fixture.provider.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_provider_call_order() {
        let fixture = fixture();
        mark_started(&fixture.state, &fixture.container);

        let worker = worker_for(&fixture, &fixture.app);
        worker.run_start().await.unwrap();

        assert_eq!(
            *fixture.provider.calls.lock(),
            vec!["initialize", "start", "service_registry", "post_startup"]
        );
    }

    #[tokio::test]
    async fn test_ambiguous_when_one_dependency_has_two_providers() {
        let fixture = fixture();
        // second implementation in the same dependency boundary
        let extra: Arc<dyn LifecycleProvider> = ScriptedProvider::new();
        fixture
            .state
            .boundary_of(&fixture.container)
            .unwrap()
            .register(&LIFECYCLE_PROVIDER, extra);
        mark_started(&fixture.state, &fixture.container);

        let worker = worker_for(&fixture, &fixture.app);
        let err = worker.run_start().await.unwrap_err();
        assert!(matches!(err, Error::AmbiguousProvider { .. }));
    }

    #[tokio::test]
    async fn test_runtime_stop_fault_propagates_unwrapped() {
        let fixture = fixture();
        mark_started(&fixture.state, &fixture.container);

        let worker = worker_for(&fixture, &fixture.app);
        worker.run_start().await.unwrap();

        *fixture.provider.stop_fault.lock() =
            Some(ProviderFault::Runtime("release failed".to_string()));
        let err = worker.run_stop().await.unwrap_err();
        match err {
            Error::Provider(fault) => assert!(fault.is_runtime()),
            other => panic!("expected unwrapped runtime fault, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_other_stop_fault_is_wrapped() {
        let fixture = fixture();
        mark_started(&fixture.state, &fixture.container);

        let worker = worker_for(&fixture, &fixture.app);
        worker.run_start().await.unwrap();

        *fixture.provider.stop_fault.lock() =
            Some(ProviderFault::Other(anyhow::anyhow!("descriptor leak")));
        let err = worker.run_stop().await.unwrap_err();
        match err {
            Error::Shutdown { addon, .. } => assert_eq!(addon, fixture.app),
            other => panic!("expected wrapped shutdown error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_repeated_stop_releases_the_provider_once() {
        let fixture = fixture();
        mark_started(&fixture.state, &fixture.container);

        let worker = worker_for(&fixture, &fixture.app);
        worker.run_start().await.unwrap();

        worker.run_stop().await.unwrap();
        worker.run_stop().await.unwrap();

        let stops = fixture
            .provider
            .calls
            .lock()
            .iter()
            .filter(|call| **call == "stop")
            .count();
        assert_eq!(stops, 1);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_a_noop() {
        let fixture = fixture();
        let worker = worker_for(&fixture, &fixture.app);

        // stop before any start attempt: nothing was detected, nothing runs
        worker.run_stop().await.unwrap();
        assert!(fixture.provider.calls.lock().is_empty());
        assert!(worker.stop_requested());
    }
}
