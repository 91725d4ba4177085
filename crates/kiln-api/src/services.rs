//! Service Registry
//!
//! The exposed-service surface an addon publishes once its provider's
//! `start` completes. Values are type-erased; lookups are typed. Registries
//! are cheap to clone (shared interior) so snapshots can be handed across
//! boundaries without copying the service map.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::AddonIdentity;

/// Named, type-erased services exposed by one addon.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under a name, replacing any previous value.
    pub fn register<T: Any + Send + Sync>(&self, name: impl Into<String>, service: Arc<T>) {
        self.inner.write().insert(name.into(), service);
    }

    /// Look up a service by name and concrete type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let guard = self.inner.read();
        let erased = guard.get(name)?.clone();
        erased.downcast::<T>().ok()
    }

    /// Names of all registered services.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}

/// Read-only snapshot of the service registries of an addon's direct,
/// currently-started dependencies, handed to `LifecycleProvider::initialize`.
#[derive(Debug, Clone, Default)]
pub struct DependencyServices {
    entries: HashMap<AddonIdentity, ServiceRegistry>,
}

impl DependencyServices {
    pub fn new(entries: HashMap<AddonIdentity, ServiceRegistry>) -> Self {
        Self { entries }
    }

    /// The service registry exposed by one dependency, if it was started.
    pub fn registry_of(&self, dependency: &AddonIdentity) -> Option<&ServiceRegistry> {
        self.entries.get(dependency)
    }

    /// Look up a named service across all started dependencies.
    pub fn service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.entries.values().find_map(|registry| registry.get(name))
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &AddonIdentity> {
        self.entries.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_lookup() {
        let registry = ServiceRegistry::new();
        registry.register("greeter", Arc::new("hello".to_string()));

        let found: Option<Arc<String>> = registry.get("greeter");
        assert_eq!(found.as_deref().map(String::as_str), Some("hello"));

        // Wrong type yields None, not a panic
        let wrong: Option<Arc<u64>> = registry.get("greeter");
        assert!(wrong.is_none());
    }

    #[test]
    fn test_clone_shares_interior() {
        let registry = ServiceRegistry::new();
        let alias = registry.clone();
        registry.register("counter", Arc::new(7u32));
        assert_eq!(alias.get::<u32>("counter").as_deref(), Some(&7));
    }

    #[test]
    fn test_dependency_services_search() {
        let core = ServiceRegistry::new();
        core.register("config", Arc::new(42u32));

        let deps = DependencyServices::new(HashMap::from([(
            AddonIdentity::new("core", "1.0.0"),
            core,
        )]));

        assert_eq!(deps.service::<u32>("config").as_deref(), Some(&42));
        assert!(deps.service::<u32>("missing").is_none());
    }
}
