//! Lifecycle events and listeners
//!
//! A plain observer surface external to the runtime's own correctness.
//! Registration lives in `kiln-runtime` and returns a handle whose
//! `remove()` deregisters.

use crate::{AddonIdentity, AddonStatus, RuntimeInfo};

/// Notification fired before the runtime begins stopping addons.
#[derive(Debug, Clone)]
pub struct PreShutdown {
    pub runtime: RuntimeInfo,
}

impl PreShutdown {
    pub fn new(runtime: RuntimeInfo) -> Self {
        Self { runtime }
    }
}

/// Observer for coordinator-level lifecycle events.
pub trait LifecycleListener: Send + Sync {
    /// Called once, before shutdown fans out stop requests.
    fn pre_shutdown(&self, _event: &PreShutdown) {}

    /// Called whenever an addon's status changes.
    fn status_changed(&self, _addon: &AddonIdentity, _status: AddonStatus) {}
}
