//! Worker draining the delivery queue.

use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use leaky_bucket::RateLimiter;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{FlushReport, Operation, WorkerState};
use crate::{backend::Transport, error::BackendError, model::LogRequest, retry::RetryPolicy};

pub(super) struct Worker {
    pub(super) rx: mpsc::UnboundedReceiver<Operation>,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) retry: RetryPolicy,
    pub(super) batch_size: usize,
    pub(super) rate: Option<usize>,
    pub(super) state: Arc<WorkerState>,
}

/// Consecutive operations delivered by one transport call.
enum Delivery {
    Single(Operation),
    Logs(Vec<LogRequest>),
}

impl Delivery {
    fn len(&self) -> usize {
        match self {
            Delivery::Single(_) => 1,
            Delivery::Logs(batch) => batch.len(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Delivery::Single(operation) => operation.name(),
            Delivery::Logs(_) => "log batch",
        }
    }
}

/// Group a drained batch, merging runs of log entries while keeping order.
fn group(batch: impl IntoIterator<Item = Operation>) -> Vec<Delivery> {
    let mut grouped: Vec<Delivery> = Vec::new();
    for operation in batch {
        match operation {
            Operation::Log(entry) => {
                if let Some(Delivery::Logs(logs)) = grouped.last_mut() {
                    logs.push(entry);
                } else {
                    grouped.push(Delivery::Logs(vec![entry]));
                }
            }
            other => grouped.push(Delivery::Single(other)),
        }
    }
    grouped
}

impl Worker {
    /// Drain the queue until every sender is gone, then report totals.
    pub(super) async fn run(mut self) -> FlushReport {
        let limiter = self.rate.map(|rate| {
            RateLimiter::builder()
                .initial(rate)
                .refill(rate)
                .interval(Duration::from_secs(1))
                .max(rate)
                .build()
        });
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut report = FlushReport::default();

        loop {
            let received = self.rx.recv_many(&mut batch, self.batch_size).await;
            if received == 0 {
                break;
            }
            debug!(received, "delivering batch");
            for delivery in group(batch.drain(..)) {
                if let Some(limiter) = &limiter {
                    limiter.acquire(1).await;
                }
                let count = delivery.len();
                let name = delivery.name();
                match self.deliver(&delivery).await {
                    Ok(()) => {
                        report.delivered += count;
                        self.state.delivered.fetch_add(count, Ordering::Relaxed);
                        crate::metrics::inc_requests(name);
                    }
                    Err(error) => {
                        report.failed += count;
                        self.state.failed.fetch_add(count, Ordering::Relaxed);
                        self.state.healthy.store(false, Ordering::Relaxed);
                        crate::metrics::inc_delivery_failures();
                        warn!(operation = name, count, %error, "delivery failed; dropping");
                    }
                }
            }
        }
        report
    }

    async fn deliver(&self, delivery: &Delivery) -> Result<(), BackendError> {
        let transport = &self.transport;
        let result = match delivery {
            Delivery::Logs(batch) => {
                self.retry
                    .run_async("log batch", || transport.send_logs(batch))
                    .await
            }
            Delivery::Single(Operation::StartRun(request)) => {
                self.retry
                    .run_async("start run", || transport.start_run(request))
                    .await
            }
            Delivery::Single(Operation::FinishRun(run, request)) => {
                self.retry
                    .run_async("finish run", || transport.finish_run(run, request))
                    .await
            }
            Delivery::Single(Operation::StartItem(request)) => {
                self.retry
                    .run_async("start item", || transport.start_item(request))
                    .await
            }
            Delivery::Single(Operation::FinishItem(item, request)) => {
                self.retry
                    .run_async("finish item", || transport.finish_item(item, request))
                    .await
            }
            Delivery::Single(Operation::Log(entry)) => {
                let entry = std::slice::from_ref(entry);
                self.retry
                    .run_async("log", || transport.send_logs(entry))
                    .await
            }
        };
        result.map_err(|exhausted| exhausted.error)
    }
}
