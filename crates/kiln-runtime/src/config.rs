//! Runtime Configuration
//!
//! Layered configuration: compiled defaults, then an optional TOML file,
//! then `KILN_`-prefixed environment variables. Every field has a default
//! so an empty config is a valid one.

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use kiln_api::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KilnConfig {
    /// Display name of the runtime, reported to providers and listeners.
    #[serde(default = "default_runtime_name")]
    pub runtime_name: String,
    /// Bound on the dependency-readiness wait inside a start attempt.
    /// `None` waits without limit.
    #[serde(default)]
    pub dependency_wait_timeout_secs: Option<u64>,
    /// Per-layer bound on shutdown; stragglers are abandoned with a warning.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_runtime_name() -> String {
    "kiln".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_log_filter() -> String {
    "info,kiln_runtime=debug".to_string()
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            runtime_name: default_runtime_name(),
            dependency_wait_timeout_secs: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            log_filter: default_log_filter(),
        }
    }
}

impl KilnConfig {
    /// Load from `kiln.toml` in the working directory plus environment.
    pub fn load() -> Result<Self> {
        Self::load_from("kiln.toml")
    }

    /// Load from an explicit TOML path plus environment. A missing file is
    /// not an error; the defaults and environment still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Figment::from(Serialized::defaults(KilnConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("KILN_"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    pub fn dependency_wait_timeout(&self) -> Option<Duration> {
        self.dependency_wait_timeout_secs.map(Duration::from_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
