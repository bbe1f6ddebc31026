//! Seams between the reporter and the reporting backend.
//!
//! - [`ReportBackend`] is the backend client SDK surface the
//!   [`crate::delivery::DeliveryClient`] adapts. Its delivery queue is opaque:
//!   returning an identifier says nothing about network delivery.
//! - [`DirectApi`] finishes a run with one synchronous request that bypasses
//!   any queue. Only finalization uses it.
//! - [`Transport`] is the async wire used by [`QueuedBackend`]'s worker.

use async_trait::async_trait;

use crate::{
    error::BackendError,
    model::{FinishRequest, ItemId, LogRequest, StartItemRequest, StartRunRequest},
};

pub mod http;
pub mod queue;
mod tls;

pub use http::HttpApi;
pub use queue::{FlushReport, QueueConfigError, QueuedBackend, QueuedBackendBuilder};

/// What a queue flush could confirm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Every queued request was delivered.
    Confirmed,
    /// The flush finished but delivery of some requests is unknown or failed.
    Unconfirmed,
}

/// Backend client SDK surface.
///
/// Implementations own their delivery queue and must be safe to share between
/// the hook thread and the finalization path.
pub trait ReportBackend: Send + Sync {
    /// Request a new run.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the request could not be accepted.
    fn start_run(&self, request: &StartRunRequest) -> Result<ItemId, BackendError>;

    /// Request that `run` be finished.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the request could not be accepted.
    fn finish_run(&self, run: &ItemId, request: &FinishRequest) -> Result<(), BackendError>;

    /// Request a new suite, case or step item.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the request could not be accepted.
    fn start_item(&self, request: &StartItemRequest) -> Result<ItemId, BackendError>;

    /// Request that `item` be finished.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the request could not be accepted.
    fn finish_item(&self, item: &ItemId, request: &FinishRequest) -> Result<(), BackendError>;

    /// Send a log entry or attachment.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the request could not be accepted.
    fn log(&self, request: &LogRequest) -> Result<(), BackendError>;

    /// Run identifier according to the client's own bookkeeping.
    fn reported_run_id(&self) -> Option<ItemId> { None }

    /// Flush the delivery queue and stop accepting work. Blocks.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the flush could not complete.
    fn terminate(&self) -> Result<FlushOutcome, BackendError>;

    /// Best-effort liveness check; not a delivery guarantee.
    fn is_healthy(&self) -> bool;
}

/// Synchronous, queue-free access to the run finish endpoint.
pub trait DirectApi: Send + Sync {
    /// Finish `run` immediately.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the backend did not acknowledge.
    fn finish_run(&self, run: &ItemId, request: &FinishRequest) -> Result<(), BackendError>;
}

/// Wire used by the queue worker to deliver requests.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver a start-run request.
    async fn start_run(&self, request: &StartRunRequest) -> Result<(), BackendError>;

    /// Deliver a finish-run request.
    async fn finish_run(&self, run: &ItemId, request: &FinishRequest) -> Result<(), BackendError>;

    /// Deliver a start-item request.
    async fn start_item(&self, request: &StartItemRequest) -> Result<(), BackendError>;

    /// Deliver a finish-item request.
    async fn finish_item(&self, item: &ItemId, request: &FinishRequest)
    -> Result<(), BackendError>;

    /// Deliver a batch of log entries in one request.
    async fn send_logs(&self, batch: &[LogRequest]) -> Result<(), BackendError>;
}
