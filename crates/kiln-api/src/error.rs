//! Error taxonomy
//!
//! Failures are contained at addon granularity: one addon's error never
//! cancels a sibling's lifecycle. The coordinator is the final point where a
//! per-addon failure is recorded and reported; it is never silently
//! swallowed.

use crate::{AddonIdentity, AddonStatus};

/// Result type alias for kiln operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the lifecycle runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// More than one lifecycle-provider candidate was found among an addon's
    /// direct dependencies. Fatal to that start attempt only.
    #[error(
        "multiple lifecycle providers found for addon [{addon}]; remove all but one of: {}",
        offenders.iter().map(|id| id.to_coordinates()).collect::<Vec<_>>().join(", ")
    )]
    AmbiguousProvider {
        addon: AddonIdentity,
        offenders: Vec<AddonIdentity>,
    },

    /// The start sequence (initialize/start/postStartup) failed.
    #[error("failed to start addon [{addon}]")]
    Start {
        addon: AddonIdentity,
        #[source]
        source: Box<Error>,
    },

    /// A non-runtime provider fault was raised during stop.
    #[error("failed to shut down addon [{addon}]")]
    Shutdown {
        addon: AddonIdentity,
        #[source]
        source: Box<Error>,
    },

    /// A provider fault carried through unwrapped.
    #[error(transparent)]
    Provider(#[from] ProviderFault),

    /// Marshaling or invocation failed while crossing an isolation boundary.
    #[error("boundary adaptation failed in [{boundary}]: {reason}")]
    BoundaryAdaptation { boundary: String, reason: String },

    /// A non-optional dependency reached a terminal status without starting.
    #[error("addon [{addon}] requires [{dependency}], which failed to start")]
    DependencyFailed {
        addon: AddonIdentity,
        dependency: AddonIdentity,
    },

    /// The bounded dependency-readiness wait expired.
    #[error("addon [{addon}] timed out waiting for dependency [{dependency}] to start")]
    DependencyWaitTimeout {
        addon: AddonIdentity,
        dependency: AddonIdentity,
    },

    /// The registry refused a status write that would break monotonicity.
    #[error("illegal status transition {from} -> {to} for addon [{addon}]")]
    InvalidTransition {
        addon: AddonIdentity,
        from: AddonStatus,
        to: AddonStatus,
    },

    /// A start was scheduled for an identity whose lifecycle instance is
    /// stopping or already settled; a redeploy is required to run it again.
    #[error("addon [{0}] is stopping or already ran its lifecycle; redeploy to start it again")]
    AlreadyScheduled(AddonIdentity),

    /// The identity is not admitted to the current run.
    #[error("unknown addon [{0}]")]
    UnknownAddon(AddonIdentity),

    /// Undeploy was requested before a successful stop.
    #[error("addon [{0}] must be stopped before it can be undeployed")]
    NotStopped(AddonIdentity),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Faults raised by `LifecycleProvider` implementations.
///
/// Runtime-kind faults raised during stop propagate unwrapped to the
/// coordinator; any other kind is wrapped into [`Error::Shutdown`] naming the
/// addon.
#[derive(Debug, thiserror::Error)]
pub enum ProviderFault {
    /// A runtime-kind fault.
    #[error("runtime fault: {0}")]
    Runtime(String),

    /// An I/O fault while acquiring or releasing resources.
    #[error("io fault: {0}")]
    Io(#[from] std::io::Error),

    /// Any other fault kind.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProviderFault {
    pub fn is_runtime(&self) -> bool {
        matches!(self, ProviderFault::Runtime(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_provider_names_offenders() {
        let err = Error::AmbiguousProvider {
            addon: AddonIdentity::new("app", "1.0.0"),
            offenders: vec![
                AddonIdentity::new("container-a", "1.0.0"),
                AddonIdentity::new("container-b", "1.0.0"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("container-a,1.0.0"));
        assert!(msg.contains("container-b,1.0.0"));
    }

    #[test]
    fn test_fault_kinds() {
        assert!(ProviderFault::Runtime("boom".into()).is_runtime());
        assert!(!ProviderFault::Other(anyhow::anyhow!("boom")).is_runtime());
    }
}
