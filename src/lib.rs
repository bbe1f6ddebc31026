#![doc(html_root_url = "https://docs.rs/reportwire/latest")]
//! Public API for the `reportwire` library.
//!
//! This crate mirrors a test run (run, suite, case, step) onto a remote
//! reporting backend. Hooks call into [`Reporter`], which drives the
//! [`lifecycle::LifecycleCoordinator`]; requests travel through a retrying
//! [`delivery::DeliveryClient`] and a background queue, and
//! [`finalize::FinalizationGuard`] makes sure the run is closed exactly once
//! when the process ends.

pub mod backend;
pub mod config;
pub mod delivery;
pub mod error;
pub mod finalize;
pub mod identity;
pub mod lifecycle;
pub mod metrics;
pub mod model;
pub mod reporter;
pub mod retry;
pub mod slot;

pub use config::{ConfigError, ReporterConfig, Settings};
pub use error::{BackendError, ReportError, ReportResult};
pub use finalize::{FinalizationGuard, FinalizationReport};
pub use lifecycle::{FinishOutcome, ItemHandle, LifecycleCoordinator};
pub use metrics::{DELIVERY_FAILURES, FALLBACKS_TOTAL, ITEMS_ACTIVE, REQUESTS_TOTAL};
pub use reporter::Reporter;
