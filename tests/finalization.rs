//! Integration tests for the finalization sequence.
//!
//! A [`MockServer`] plays both the queued client and the direct endpoint so
//! the tests can see which path finished the run.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use log::Level as LogSeverity;
use reportwire::{
    FinalizationGuard,
    LifecycleCoordinator,
    backend::FlushOutcome,
    delivery::DeliveryClient,
    finalize::{Fallback, RunSource},
    lifecycle::LifecycleOptions,
    model::{ItemId, ItemStatus},
    retry::RetryPolicy,
    slot::{FileRunSlot, RunSlot},
};
use reportwire_testing::{LoggerHandle, MockServer, Op, logger};
use rstest::{fixture, rstest};
use serial_test::serial;

struct Harness {
    server: MockServer,
    coordinator: Arc<Mutex<LifecycleCoordinator>>,
    guard: FinalizationGuard,
}

impl Harness {
    fn with_options(options: LifecycleOptions, slot: Option<Arc<dyn RunSlot>>) -> Self {
        let server = MockServer::new();
        let delivery = DeliveryClient::new(server.backend(), RetryPolicy::once());
        let mut coordinator = LifecycleCoordinator::new(options, delivery);
        if let Some(slot) = slot {
            coordinator = coordinator.with_slot(slot);
        }
        let coordinator = Arc::new(Mutex::new(coordinator));
        let guard = FinalizationGuard::new(Arc::clone(&coordinator), server.direct_api())
            .delays(Duration::ZERO, Duration::ZERO);
        Self {
            server,
            coordinator,
            guard,
        }
    }

    fn start_run(&self) {
        self.coordinator
            .lock()
            .expect("coordinator lock")
            .start_suite("Checkout", &[], None)
            .expect("suite starts");
    }
}

#[fixture]
fn harness() -> Harness { Harness::with_options(LifecycleOptions::default(), None) }

#[rstest]
fn confirmed_flush_needs_no_fallback(harness: Harness) {
    harness.start_run();

    let report = harness.guard.finalize(None);

    assert_eq!(report.source, Some(RunSource::Tracked));
    assert!(report.flush_confirmed);
    assert_eq!(report.fallback, Fallback::NotNeeded);
    assert_eq!(harness.server.attempts(Op::DirectFinish), 0);
    assert_eq!(harness.server.finished_runs().len(), 1);
}

#[rstest]
fn failed_flush_falls_back_and_finishes_the_run_once(harness: Harness) {
    harness.start_run();
    harness.server.fail_next(Op::Terminate, 1);

    let report = harness.guard.finalize(None);

    assert!(!report.flush_confirmed);
    assert_eq!(report.fallback, Fallback::Delivered);
    let finishes = harness.server.run_finish_requests();
    assert!(finishes.iter().any(|(_, direct)| *direct));
    assert_eq!(harness.server.finished_runs().len(), 1);
}

#[rstest]
fn unconfirmed_flush_falls_back(harness: Harness) {
    harness.start_run();
    harness.server.flush_outcome(FlushOutcome::Unconfirmed);

    let report = harness.guard.finalize(Some(ItemStatus::Failed));

    assert_eq!(report.fallback, Fallback::Delivered);
    assert_eq!(harness.server.attempts(Op::DirectFinish), 1);
    assert_eq!(harness.server.finished_runs().len(), 1);
}

#[rstest]
fn lost_run_finish_is_repaired_directly(harness: Harness) {
    harness.start_run();
    harness.server.fail_next(Op::FinishRun, 1);

    let report = harness.guard.finalize(None);

    assert!(!report.flush_confirmed);
    assert_eq!(report.fallback, Fallback::Delivered);
    assert_eq!(harness.server.run_finish_requests().len(), 1);
    assert_eq!(harness.server.finished_runs().len(), 1);
}

#[rstest]
#[serial]
fn both_paths_failing_is_reported_at_error(harness: Harness, mut logger: LoggerHandle) {
    harness.start_run();
    harness.server.fail_next(Op::Terminate, 1);
    harness.server.fail_next(Op::DirectFinish, 1);

    let report = harness.guard.finalize(None);

    assert_eq!(report.fallback, Fallback::Failed);
    assert!(report.is_incomplete());
    assert!(logger.contains(LogSeverity::Error, "may be incomplete"));
}

#[rstest]
fn finalization_runs_once(harness: Harness) {
    harness.start_run();

    let first = harness.guard.finalize(None);
    let second = harness.guard.finalize(None);

    assert!(!first.is_noop());
    assert!(second.is_noop());
    assert_eq!(harness.server.attempts(Op::Terminate), 1);
    assert_eq!(harness.server.run_finish_requests().len(), 1);
}

#[rstest]
fn nothing_to_finalize_without_a_run(harness: Harness) {
    let report = harness.guard.finalize(None);

    assert!(report.is_noop());
    assert_eq!(harness.server.attempts(Op::Terminate), 0);
}

#[test]
fn joined_runs_are_left_to_their_owner() {
    let options = LifecycleOptions {
        explicit_run_id: Some("external-7".into()),
        ..LifecycleOptions::default()
    };
    let harness = Harness::with_options(options, None);
    harness.start_run();

    let report = harness.guard.finalize(None);

    assert_eq!(report.fallback, Fallback::Skipped);
    assert!(harness.server.started_runs().is_empty());
    assert!(harness.server.run_finish_requests().is_empty());
}

#[test]
fn joined_run_in_the_shared_slot_is_finalized_once() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("run.json");
    let slot = FileRunSlot::new(&path);
    slot.publish(&ItemId::from("owner-run"))
        .expect("owner publishes its run");
    let options = LifecycleOptions {
        explicit_run_id: Some("owner-run".into()),
        ..LifecycleOptions::default()
    };
    let harness = Harness::with_options(options, Some(Arc::new(FileRunSlot::new(&path))));
    harness.start_run();

    let first = harness.guard.finalize(None);
    let second = harness.guard.finalize(None);

    assert_eq!(first.fallback, Fallback::Skipped);
    assert!(second.is_noop());
    assert_eq!(harness.server.attempts(Op::Terminate), 1);
    assert!(harness.server.run_finish_requests().is_empty());
    assert_eq!(
        slot.load().expect("readable slot"),
        Some(ItemId::from("owner-run"))
    );
}

#[rstest]
#[case::delivered(0, true, Fallback::NotNeeded)]
#[case::lost(1, false, Fallback::Delivered)]
fn run_finished_before_finalization_resolves_from_the_cache(
    harness: Harness,
    #[case] lost_finishes: usize,
    #[case] confirmed: bool,
    #[case] fallback: Fallback,
) {
    harness.start_run();
    harness.server.fail_next(Op::FinishRun, lost_finishes);
    let _ = harness
        .coordinator
        .lock()
        .expect("coordinator lock")
        .finish_run(None);

    let report = harness.guard.finalize(None);

    assert_eq!(report.source, Some(RunSource::Cached));
    assert_eq!(report.flush_confirmed, confirmed);
    assert_eq!(report.fallback, fallback);
    assert_eq!(harness.server.finished_runs().len(), 1);
    assert!(harness.guard.finalize(None).is_noop());
}

#[test]
fn dropping_the_guard_finalizes() {
    let harness = Harness::with_options(LifecycleOptions::default(), None);
    harness.start_run();
    let Harness { server, guard, .. } = harness;

    drop(guard);

    assert_eq!(server.finished_runs().len(), 1);
    assert_eq!(server.attempts(Op::Terminate), 1);
}

#[test]
fn run_published_by_another_process_is_finished_from_the_slot() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("run.json");

    let owner = Harness::with_options(
        LifecycleOptions::default(),
        Some(Arc::new(FileRunSlot::new(&path))),
    );
    owner.start_run();
    let published = FileRunSlot::new(&path)
        .load()
        .expect("readable slot")
        .expect("run published");

    let finisher = Harness::with_options(
        LifecycleOptions::default(),
        Some(Arc::new(FileRunSlot::new(&path))),
    );
    let report = finisher.guard.finalize(Some(ItemStatus::Interrupted));

    assert_eq!(report.run_id, Some(published.clone()));
    assert_eq!(report.source, Some(RunSource::SharedSlot));
    assert_eq!(report.fallback, Fallback::Delivered);
    assert_eq!(finisher.server.finished_runs(), vec![published]);
    assert!(!path.exists());
}
