//! Retrying adapter around the backend client.
//!
//! [`DeliveryClient`] is what the lifecycle layer talks to. Start and finish
//! calls go through the configured [`RetryPolicy`]; logs and attachments are
//! sent once. A returned identifier only means the backend client accepted
//! the request, not that it reached the network.

use std::sync::Arc;

use log::warn;

use crate::{
    backend::{FlushOutcome, ReportBackend},
    error::{BackendError, ReportError, ReportResult},
    model::{FinishRequest, ItemId, LogRequest, StartItemRequest, StartRunRequest},
    retry::{Exhausted, RetryPolicy},
};

/// Backend client shared by the coordinator and the finalization guard.
#[derive(Clone)]
pub struct DeliveryClient {
    backend: Arc<dyn ReportBackend>,
    retry: RetryPolicy,
}

impl DeliveryClient {
    /// Wrap `backend`, retrying start and finish calls with `retry`.
    #[must_use]
    pub fn new(backend: Arc<dyn ReportBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry: retry.normalized(),
        }
    }

    /// Retry policy applied to start and finish calls.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy { self.retry }

    fn retried<T>(
        &self,
        operation: &'static str,
        call: impl FnMut() -> Result<T, BackendError>,
    ) -> ReportResult<T> {
        self.retry
            .run(operation, call)
            .map_err(|Exhausted { attempts, error }| {
                warn!("{operation} failed after {attempts} attempt(s): {error}");
                ReportError::Connectivity {
                    operation,
                    attempts,
                    source: error,
                }
            })
    }

    /// Start the run.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Connectivity`] once the retry budget is spent.
    pub fn start_run(&self, request: &StartRunRequest) -> ReportResult<ItemId> {
        self.retried("start run", || self.backend.start_run(request))
    }

    /// Finish the run.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Connectivity`] once the retry budget is spent.
    pub fn finish_run(&self, run: &ItemId, request: &FinishRequest) -> ReportResult<()> {
        self.retried("finish run", || self.backend.finish_run(run, request))
    }

    /// Start a suite, case or step item.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Connectivity`] once the retry budget is spent.
    pub fn start_item(&self, request: &StartItemRequest) -> ReportResult<ItemId> {
        self.retried("start item", || self.backend.start_item(request))
    }

    /// Finish a suite, case or step item.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Connectivity`] once the retry budget is spent.
    pub fn finish_item(&self, item: &ItemId, request: &FinishRequest) -> ReportResult<()> {
        self.retried("finish item", || self.backend.finish_item(item, request))
    }

    /// Send a log entry or attachment. Not retried.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Connectivity`] if the backend refused it.
    pub fn log(&self, request: &LogRequest) -> ReportResult<()> {
        self.backend.log(request).map_err(|source| {
            warn!("log entry dropped: {source}");
            ReportError::Connectivity {
                operation: "log",
                attempts: 1,
                source,
            }
        })
    }

    /// Run identifier the backend client believes is current.
    #[must_use]
    pub fn reported_run_id(&self) -> Option<ItemId> { self.backend.reported_run_id() }

    /// Best-effort liveness check of the backend client.
    #[must_use]
    pub fn is_healthy(&self) -> bool { self.backend.is_healthy() }

    /// Flush the backend queue. Reserved for finalization.
    pub(crate) fn terminate(&self) -> Result<FlushOutcome, BackendError> {
        self.backend.terminate()
    }
}
