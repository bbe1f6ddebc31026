//! Utilities for testing `reportwire` hooks and finalization.
//!
//! [`MockServer`] stands in for the reporting backend and records what the
//! reporter sent. [`quick_config`] builds a configuration with every wait set
//! to zero so tests never sleep.

pub mod logging;
pub mod mock;

pub use logging::{LoggerHandle, logger};
pub use mock::{MockBackend, MockDirectApi, MockServer, Op, Request};
use reportwire::{Reporter, config::ReporterConfig};

/// Configuration for a fictitious backend with zero retry and finalize delays.
#[must_use]
pub fn quick_config() -> ReporterConfig {
    let mut config = ReporterConfig::new("https://reports.example.test", "shop", "token");
    config.retry.delay_seconds = 0.0;
    config.finalize.settle_delay_seconds = 0.0;
    config.finalize.post_flush_delay_seconds = 0.0;
    config
}

/// Reporter delivering into `server`, configured by `config`.
///
/// # Panics
///
/// Panics if `config` does not validate.
#[must_use]
pub fn reporter_for(server: &MockServer, config: &ReporterConfig) -> Reporter {
    let settings = config.validate().expect("test configuration must validate");
    Reporter::with_backend(&settings, server.backend(), server.direct_api())
}
