//! Background delivery queue used by [`QueuedBackend`].
//!
//! Start and finish calls generate their identifiers locally and enqueue the
//! request, so the foreground never waits on the network. A dedicated worker
//! thread drains the queue in batches of up to `batch_size` operations,
//! delivers them through a [`Transport`] in FIFO order, and reports totals
//! once the queue is closed by [`ReportBackend::terminate`]. An optional rate
//! limiter caps throughput at [`MAX_QUEUE_RATE`] requests per second.

use std::{
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc as std_mpsc,
    },
    time::Duration,
};

use static_assertions::const_assert;
use tokio::sync::mpsc;
use tracing::{debug, warn};

mod builder;
mod errors;
mod worker;

pub use builder::QueuedBackendBuilder;
pub use errors::QueueConfigError;

use super::{FlushOutcome, ReportBackend, Transport};
use crate::{
    error::BackendError,
    model::{FinishRequest, ItemId, LogRequest, StartItemRequest, StartRunRequest},
};

// Default number of operations drained per worker wake-up.
const DEFAULT_BATCH_SIZE: usize = 20;
/// Highest supported rate for [`QueuedBackendBuilder::rate`].
pub const MAX_QUEUE_RATE: usize = crate::config::MAX_QUEUE_RATE;

const_assert!(DEFAULT_BATCH_SIZE > 0);

/// A request waiting in the delivery queue.
#[derive(Clone, Debug)]
pub(crate) enum Operation {
    StartRun(StartRunRequest),
    FinishRun(ItemId, FinishRequest),
    StartItem(StartItemRequest),
    FinishItem(ItemId, FinishRequest),
    Log(LogRequest),
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::StartRun(_) => "start run",
            Operation::FinishRun(..) => "finish run",
            Operation::StartItem(_) => "start item",
            Operation::FinishItem(..) => "finish item",
            Operation::Log(_) => "log",
        }
    }
}

/// Totals reported by the worker when the queue closes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Operations the transport acknowledged.
    pub delivered: usize,
    /// Operations that failed after their retry budget.
    pub failed: usize,
    /// Set when the worker could not run at all.
    pub aborted: bool,
}

impl FlushReport {
    /// Whether every queued operation was delivered.
    #[must_use]
    pub fn is_complete(&self) -> bool { self.failed == 0 && !self.aborted }
}

/// Counters shared between the backend handle and its worker.
#[derive(Debug)]
pub(crate) struct WorkerState {
    pub(crate) healthy: AtomicBool,
    pub(crate) running: AtomicBool,
    pub(crate) delivered: AtomicUsize,
    pub(crate) failed: AtomicUsize,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            running: AtomicBool::new(true),
            delivered: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }
}

/// [`ReportBackend`] that delivers through a background queue.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use reportwire::{
///     backend::{HttpApi, QueuedBackend, ReportBackend},
///     config::ReporterConfig,
/// };
///
/// let settings = ReporterConfig::new("https://reports.example.test", "shop", "token")
///     .validate()
///     .expect("valid config");
/// let api = HttpApi::new(&settings).expect("http client");
/// let backend = QueuedBackend::builder(Arc::new(api))
///     .batch_size(50)
///     .spawn()
///     .expect("spawn delivery worker");
/// assert!(backend.is_healthy());
/// ```
pub struct QueuedBackend {
    tx: Mutex<Option<mpsc::UnboundedSender<Operation>>>,
    done_rx: Mutex<Option<std_mpsc::Receiver<FlushReport>>>,
    state: Arc<WorkerState>,
    run_id: Mutex<Option<ItemId>>,
    flush_timeout: Duration,
}

impl QueuedBackend {
    /// Start building a queue that delivers through `transport`.
    #[must_use]
    pub fn builder(transport: Arc<dyn Transport>) -> QueuedBackendBuilder {
        QueuedBackendBuilder::new(transport)
    }

    /// Number of operations acknowledged so far.
    #[must_use]
    pub fn delivered(&self) -> usize { self.state.delivered.load(Ordering::Relaxed) }

    /// Number of operations that failed so far.
    #[must_use]
    pub fn failed(&self) -> usize { self.state.failed.load(Ordering::Relaxed) }

    fn enqueue(&self, operation: Operation) -> Result<(), BackendError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(BackendError::Closed);
        };
        let name = operation.name();
        tx.send(operation).map_err(|_| BackendError::Closed)?;
        debug!(operation = name, "request queued");
        Ok(())
    }
}

impl ReportBackend for QueuedBackend {
    fn start_run(&self, request: &StartRunRequest) -> Result<ItemId, BackendError> {
        let id = request.uuid.clone().unwrap_or_else(ItemId::generate);
        let request = StartRunRequest {
            uuid: Some(id.clone()),
            ..request.clone()
        };
        self.enqueue(Operation::StartRun(request))?;
        *self.run_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
        Ok(id)
    }

    fn finish_run(&self, run: &ItemId, request: &FinishRequest) -> Result<(), BackendError> {
        self.enqueue(Operation::FinishRun(run.clone(), request.clone()))
    }

    fn start_item(&self, request: &StartItemRequest) -> Result<ItemId, BackendError> {
        let id = request.uuid.clone().unwrap_or_else(ItemId::generate);
        let request = StartItemRequest {
            uuid: Some(id.clone()),
            ..request.clone()
        };
        self.enqueue(Operation::StartItem(request))?;
        Ok(id)
    }

    fn finish_item(&self, item: &ItemId, request: &FinishRequest) -> Result<(), BackendError> {
        self.enqueue(Operation::FinishItem(item.clone(), request.clone()))
    }

    fn log(&self, request: &LogRequest) -> Result<(), BackendError> {
        self.enqueue(Operation::Log(request.clone()))
    }

    fn reported_run_id(&self) -> Option<ItemId> {
        self.run_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn terminate(&self) -> Result<FlushOutcome, BackendError> {
        // Dropping the only sender closes the queue; the worker drains what is
        // left and then reports.
        let sender = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if sender.is_none() {
            return Err(BackendError::Closed);
        }
        drop(sender);

        let Some(done_rx) = self
            .done_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Err(BackendError::Closed);
        };
        match done_rx.recv_timeout(self.flush_timeout) {
            Ok(report) if report.is_complete() => {
                debug!(delivered = report.delivered, "delivery queue flushed");
                Ok(FlushOutcome::Confirmed)
            }
            Ok(report) => {
                warn!(
                    delivered = report.delivered,
                    failed = report.failed,
                    aborted = report.aborted,
                    "delivery queue flushed with failures"
                );
                Ok(FlushOutcome::Unconfirmed)
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                Err(BackendError::FlushTimeout(self.flush_timeout))
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Ok(FlushOutcome::Unconfirmed),
        }
    }

    fn is_healthy(&self) -> bool {
        let open = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed());
        open && self.state.healthy.load(Ordering::Relaxed)
            && self.state.running.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests;
