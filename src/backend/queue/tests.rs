//! Tests for the background delivery queue.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rstest::{fixture, rstest};

use super::*;
use crate::{
    backend::{FlushOutcome, ReportBackend, Transport},
    model::{ItemKind, LogLevel},
    retry::RetryPolicy,
};

/// Transport recording deliveries, optionally failing every request.
#[derive(Default)]
struct RecordingTransport {
    seen: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingTransport {
    fn record(&self, entry: String) -> Result<(), BackendError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        if self.fail {
            Err(BackendError::Transport("connection refused".into()))
        } else {
            Ok(())
        }
    }

    fn seen(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn start_run(&self, request: &StartRunRequest) -> Result<(), BackendError> {
        self.record(format!("start run {}", request.name))
    }

    async fn finish_run(&self, run: &ItemId, _request: &FinishRequest) -> Result<(), BackendError> {
        self.record(format!("finish run {run}"))
    }

    async fn start_item(&self, request: &StartItemRequest) -> Result<(), BackendError> {
        self.record(format!("start item {}", request.name))
    }

    async fn finish_item(
        &self,
        item: &ItemId,
        _request: &FinishRequest,
    ) -> Result<(), BackendError> {
        self.record(format!("finish item {item}"))
    }

    async fn send_logs(&self, batch: &[LogRequest]) -> Result<(), BackendError> {
        self.record(format!("logs {}", batch.len()))
    }
}

#[fixture]
fn transport() -> Arc<RecordingTransport> { Arc::new(RecordingTransport::default()) }

fn spawn(transport: Arc<RecordingTransport>) -> QueuedBackend {
    QueuedBackend::builder(transport)
        .retry(RetryPolicy::once())
        .flush_timeout(Duration::from_secs(5))
        .spawn()
        .expect("spawn delivery worker")
}

fn run_request() -> StartRunRequest {
    StartRunRequest {
        uuid: None,
        name: "nightly".into(),
        description: None,
        attributes: Vec::new(),
        start_time: Utc::now(),
    }
}

fn item_request(run: &ItemId, name: &str) -> StartItemRequest {
    StartItemRequest {
        uuid: None,
        launch_uuid: run.clone(),
        parent: None,
        name: name.into(),
        kind: ItemKind::Suite,
        description: None,
        attributes: Vec::new(),
        test_case_id: None,
        has_stats: true,
        start_time: Utc::now(),
    }
}

fn log_request(run: &ItemId) -> LogRequest {
    LogRequest {
        launch_uuid: run.clone(),
        item: None,
        level: LogLevel::Info,
        message: "hello".into(),
        attachment: None,
        time: Utc::now(),
    }
}

#[rstest]
fn start_calls_return_ids_before_delivery(transport: Arc<RecordingTransport>) {
    let backend = spawn(Arc::clone(&transport));

    let run = backend.start_run(&run_request()).expect("queue run");
    let suite = backend
        .start_item(&item_request(&run, "Checkout"))
        .expect("queue suite");

    assert_ne!(run, suite);
    assert_eq!(backend.reported_run_id(), Some(run));
    assert_eq!(backend.terminate(), Ok(FlushOutcome::Confirmed));
}

#[rstest]
fn terminate_delivers_everything_in_order(transport: Arc<RecordingTransport>) {
    let backend = spawn(Arc::clone(&transport));
    let run = backend.start_run(&run_request()).expect("queue run");
    let suite = backend
        .start_item(&item_request(&run, "Checkout"))
        .expect("queue suite");
    backend.log(&log_request(&run)).expect("queue log");
    backend.log(&log_request(&run)).expect("queue log");
    backend
        .finish_item(&suite, &FinishRequest::now(None))
        .expect("queue finish");
    backend
        .finish_run(&run, &FinishRequest::now(None))
        .expect("queue finish run");

    assert_eq!(backend.terminate(), Ok(FlushOutcome::Confirmed));

    let seen = transport.seen();
    assert_eq!(seen.first().map(String::as_str), Some("start run nightly"));
    assert_eq!(seen.get(1).map(String::as_str), Some("start item Checkout"));
    assert_eq!(seen.last(), Some(&format!("finish run {run}")));
    assert_eq!(backend.delivered(), 6);
}

#[test]
fn failed_delivery_leaves_flush_unconfirmed() {
    let transport = Arc::new(RecordingTransport {
        fail: true,
        ..RecordingTransport::default()
    });
    let backend = spawn(transport);
    backend.start_run(&run_request()).expect("queue run");

    assert_eq!(backend.terminate(), Ok(FlushOutcome::Unconfirmed));
    assert_eq!(backend.failed(), 1);
    assert!(!backend.is_healthy());
}

#[rstest]
fn queue_rejects_work_after_terminate(transport: Arc<RecordingTransport>) {
    let backend = spawn(transport);
    assert!(backend.is_healthy());
    assert_eq!(backend.terminate(), Ok(FlushOutcome::Confirmed));

    assert_eq!(
        backend.start_run(&run_request()),
        Err(BackendError::Closed)
    );
    assert_eq!(backend.terminate(), Err(BackendError::Closed));
    assert!(!backend.is_healthy());
}

#[rstest]
#[case(Some(0))]
#[case(Some(MAX_QUEUE_RATE + 1))]
fn invalid_rate_is_rejected(transport: Arc<RecordingTransport>, #[case] rate: Option<usize>) {
    let result = QueuedBackend::builder(transport).rate(rate).spawn();
    assert!(matches!(result, Err(QueueConfigError::InvalidRate(_))));
}

#[rstest]
fn zero_batch_size_is_rejected(transport: Arc<RecordingTransport>) {
    let result = QueuedBackend::builder(transport).batch_size(0).spawn();
    assert!(matches!(result, Err(QueueConfigError::InvalidBatchSize)));
}
