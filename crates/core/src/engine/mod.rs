pub mod aggregator;
pub mod invoker;
pub mod preferences;

use std::time::Duration;

use crate::config::EngineConfig;

pub use aggregator::QuoteEngine;
pub use invoker::{InvocationError, ProviderCall, ProviderInvoker};
pub use preferences::{eligible_providers, select_providers};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    /// Used for providers whose record carries no (or a zero) timeout.
    pub default_timeout: Duration,
    /// Deadline for one whole aggregation, raised to the longest effective
    /// provider timeout among the providers a call selects.
    pub global_timeout: Duration,
    pub max_concurrency: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            default_timeout: Duration::from_millis(config.default_timeout_ms),
            global_timeout: Duration::from_millis(config.global_timeout_ms),
            max_concurrency: config.max_concurrency.max(1),
        }
    }
}
