//! Tracing Setup
//!
//! One-shot subscriber installation for embedders that don't bring their
//! own. `RUST_LOG` wins over the configured filter when set.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use kiln_api::{Error, Result};

use crate::config::KilnConfig;

/// Install the global tracing subscriber. Fails if one is already set.
pub fn init(config: &KilnConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_filter.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| Error::Config(format!("tracing subscriber: {e}")))
}
