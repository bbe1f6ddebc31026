//! Builder for configuring and spawning a [`QueuedBackend`].

use std::{
    sync::{Arc, Mutex, atomic::Ordering, mpsc as std_mpsc},
    thread,
    time::Duration,
};

use log::error;
use tokio::sync::mpsc;

use super::{
    DEFAULT_BATCH_SIZE,
    FlushReport,
    MAX_QUEUE_RATE,
    QueueConfigError,
    QueuedBackend,
    WorkerState,
    worker::Worker,
};
use crate::{backend::Transport, config::Settings, retry::RetryPolicy};

/// Builder for [`QueuedBackend`].
///
/// Defaults: batches of [`DEFAULT_BATCH_SIZE`] operations, no rate limit, the
/// default [`RetryPolicy`], and a 30 second flush timeout.
///
/// # Examples
///
/// ```rust,no_run
/// use std::{sync::Arc, time::Duration};
///
/// use reportwire::{
///     backend::{HttpApi, QueuedBackend},
///     config::ReporterConfig,
///     retry::RetryPolicy,
/// };
///
/// let settings = ReporterConfig::new("https://reports.example.test", "shop", "token")
///     .validate()
///     .expect("valid config");
/// let backend = QueuedBackend::builder(Arc::new(HttpApi::new(&settings).expect("client")))
///     .batch_size(10)
///     .rate(Some(50)) // pass None to disable rate limiting
///     .retry(RetryPolicy::once())
///     .flush_timeout(Duration::from_secs(5))
///     .spawn()
///     .expect("spawn delivery worker");
/// # drop(backend);
/// ```
pub struct QueuedBackendBuilder {
    transport: Arc<dyn Transport>,
    batch_size: usize,
    rate: Option<usize>,
    retry: RetryPolicy,
    flush_timeout: Duration,
}

impl QueuedBackendBuilder {
    pub(super) fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            batch_size: DEFAULT_BATCH_SIZE,
            rate: None,
            retry: RetryPolicy::default(),
            flush_timeout: Duration::from_secs(30),
        }
    }

    /// Apply the queue, retry, and flush options from validated settings.
    #[must_use]
    pub fn settings(self, settings: &Settings) -> Self {
        self.batch_size(settings.batch_size)
            .rate(settings.rate)
            .retry(settings.retry)
            .flush_timeout(settings.flush_timeout)
    }

    /// Set the maximum number of operations drained per wake-up.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the request rate limit in requests per second.
    ///
    /// Passing `None` disables rate limiting.
    #[must_use]
    pub fn rate(mut self, rate: Option<usize>) -> Self {
        self.rate = rate;
        self
    }

    /// Set the retry policy applied to every delivery.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set how long [`crate::backend::ReportBackend::terminate`] waits.
    #[must_use]
    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Spawn the worker thread and return the backend handle.
    ///
    /// # Errors
    ///
    /// Returns [`QueueConfigError::InvalidRate`] if the rate is zero or above
    /// [`MAX_QUEUE_RATE`], [`QueueConfigError::InvalidBatchSize`] if the batch
    /// size is zero, and [`QueueConfigError::Spawn`] if the thread could not
    /// be created.
    pub fn spawn(self) -> Result<QueuedBackend, QueueConfigError> {
        if let Some(rate) = self.rate
            && (rate == 0 || rate > MAX_QUEUE_RATE)
        {
            return Err(QueueConfigError::InvalidRate(rate));
        }
        if self.batch_size == 0 {
            return Err(QueueConfigError::InvalidBatchSize);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = std_mpsc::channel();
        let state = Arc::new(WorkerState::default());
        let worker = Worker {
            rx,
            transport: self.transport,
            retry: self.retry,
            batch_size: self.batch_size,
            rate: self.rate,
            state: Arc::clone(&state),
        };

        let worker_state = Arc::clone(&state);
        thread::Builder::new()
            .name("reportwire-delivery".into())
            .spawn(move || {
                let report = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(worker.run()),
                    Err(err) => {
                        error!("delivery worker could not start its runtime: {err}");
                        worker_state.healthy.store(false, Ordering::Relaxed);
                        FlushReport {
                            aborted: true,
                            ..FlushReport::default()
                        }
                    }
                };
                worker_state.running.store(false, Ordering::Relaxed);
                // The handle may already have given up waiting.
                let _ = done_tx.send(report);
            })?;

        Ok(QueuedBackend {
            tx: Mutex::new(Some(tx)),
            done_rx: Mutex::new(Some(done_rx)),
            state,
            run_id: Mutex::new(None),
            flush_timeout: self.flush_timeout,
        })
    }
}
