//! Test world for reporting lifecycle and finalization scenarios.
//!
//! [`ReportWorld`] owns a [`MockServer`], a coordinator delivering into it and
//! the finalization guard closing it.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use cucumber::World;
use reportwire::{
    FinalizationGuard,
    FinalizationReport,
    FinishOutcome,
    LifecycleCoordinator,
    ReportError,
    delivery::DeliveryClient,
    lifecycle::LifecycleOptions,
    retry::RetryPolicy,
};
use reportwire_testing::MockServer;

#[derive(Default, World)]
pub struct ReportWorld {
    pub server: MockServer,
    coordinator: Option<Arc<Mutex<LifecycleCoordinator>>>,
    guard: Option<FinalizationGuard>,
    pub reports: Vec<FinalizationReport>,
    pub last_error: Option<ReportError>,
    pub last_outcome: Option<FinishOutcome>,
}

impl fmt::Debug for ReportWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportWorld")
            .field("reports", &self.reports)
            .field("last_error", &self.last_error)
            .field("last_outcome", &self.last_outcome)
            .finish_non_exhaustive()
    }
}

impl ReportWorld {
    /// Build a coordinator and guard that retry `max_attempts` times without
    /// sleeping.
    pub fn connect(&mut self, max_attempts: u32) {
        let retry = RetryPolicy {
            max_attempts,
            delay: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let delivery = DeliveryClient::new(self.server.backend(), retry);
        let coordinator = Arc::new(Mutex::new(LifecycleCoordinator::new(
            LifecycleOptions::default(),
            delivery,
        )));
        let guard = FinalizationGuard::new(Arc::clone(&coordinator), self.server.direct_api())
            .delays(Duration::ZERO, Duration::ZERO);
        self.coordinator = Some(coordinator);
        self.guard = Some(guard);
    }

    /// Lock the coordinator built by [`ReportWorld::connect`].
    ///
    /// # Panics
    ///
    /// Panics if no reporter was connected.
    pub fn coordinator(&self) -> MutexGuard<'_, LifecycleCoordinator> {
        self.coordinator
            .as_ref()
            .expect("connect a reporter first")
            .lock()
            .expect("coordinator lock")
    }

    /// Record the outcome of a lifecycle call.
    pub fn record<T>(&mut self, result: Result<T, ReportError>) -> Option<T> {
        match result {
            Ok(value) => {
                self.last_error = None;
                Some(value)
            }
            Err(err) => {
                self.last_error = Some(err);
                None
            }
        }
    }

    /// Run the finalization sequence and keep its report.
    ///
    /// # Panics
    ///
    /// Panics if no reporter was connected.
    pub fn finalize(&mut self) {
        let report = self
            .guard
            .as_ref()
            .expect("connect a reporter first")
            .finalize(None);
        self.reports.push(report);
    }
}
