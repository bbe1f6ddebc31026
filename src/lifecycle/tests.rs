//! Tests for the lifecycle coordinator.

use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
};

use rstest::{fixture, rstest};

use super::*;
use crate::{
    backend::{FlushOutcome, ReportBackend},
    error::BackendError,
    identity::RunIdSource,
    retry::RetryPolicy,
};

#[derive(Clone, Debug)]
enum Call {
    StartRun(StartRunRequest),
    FinishRun(ItemId, FinishRequest),
    StartItem(StartItemRequest),
    FinishItem(ItemId, FinishRequest),
    Log(LogRequest),
}

/// Backend handing out sequential ids and recording every call.
#[derive(Default)]
struct RecordingBackend {
    calls: Mutex<Vec<Call>>,
}

impl RecordingBackend {
    fn push(&self, call: Call) -> usize {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls.push(call);
        calls.len()
    }

    fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn started_items(&self) -> Vec<StartItemRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::StartItem(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    fn finished_items(&self) -> Vec<(ItemId, FinishRequest)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::FinishItem(id, request) => Some((id, request)),
                _ => None,
            })
            .collect()
    }

    fn logs(&self) -> Vec<LogRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Log(request) => Some(request),
                _ => None,
            })
            .collect()
    }
}

impl ReportBackend for RecordingBackend {
    fn start_run(&self, request: &StartRunRequest) -> Result<ItemId, BackendError> {
        self.push(Call::StartRun(request.clone()));
        Ok(ItemId::from("run-1"))
    }

    fn finish_run(&self, run: &ItemId, request: &FinishRequest) -> Result<(), BackendError> {
        self.push(Call::FinishRun(run.clone(), request.clone()));
        Ok(())
    }

    fn start_item(&self, request: &StartItemRequest) -> Result<ItemId, BackendError> {
        let n = self.push(Call::StartItem(request.clone()));
        Ok(ItemId::from(format!("item-{n}")))
    }

    fn finish_item(&self, item: &ItemId, request: &FinishRequest) -> Result<(), BackendError> {
        self.push(Call::FinishItem(item.clone(), request.clone()));
        Ok(())
    }

    fn log(&self, request: &LogRequest) -> Result<(), BackendError> {
        self.push(Call::Log(request.clone()));
        Ok(())
    }

    fn terminate(&self) -> Result<FlushOutcome, BackendError> { Ok(FlushOutcome::Confirmed) }

    fn is_healthy(&self) -> bool { true }
}

struct Harness {
    backend: Arc<RecordingBackend>,
    coordinator: LifecycleCoordinator,
}

fn harness_with(options: LifecycleOptions) -> Harness {
    let backend = Arc::new(RecordingBackend::default());
    let delivery = DeliveryClient::new(
        Arc::clone(&backend) as Arc<dyn ReportBackend>,
        RetryPolicy::once(),
    );
    Harness {
        backend,
        coordinator: LifecycleCoordinator::new(options, delivery),
    }
}

#[fixture]
fn harness() -> Harness {
    harness_with(LifecycleOptions {
        endpoint: "https://reports.example.test".into(),
        project: "shop".into(),
        ..LifecycleOptions::default()
    })
}

fn tags(values: &[&str]) -> Vec<String> { values.iter().map(ToString::to_string).collect() }

#[rstest]
fn first_suite_starts_the_run(mut harness: Harness) {
    let suite = harness
        .coordinator
        .start_suite("Checkout", &[], Some("Buying things"))
        .expect("start suite");

    let calls = harness.backend.calls();
    let Some(Call::StartRun(run)) = calls.first() else {
        panic!("expected the run to start first, got {calls:?}");
    };
    assert_eq!(run.name, "Checkout");
    assert_eq!(run.description.as_deref(), Some("Buying things"));
    assert!(
        run.attributes
            .contains(&Attribute::system("skippedIssue", "true"))
    );
    assert_eq!(suite.id, Some(ItemId::from("item-2")));
    assert!(harness.coordinator.is_active());
    assert_eq!(
        harness.coordinator.run_url().as_deref(),
        Some("https://reports.example.test/ui/#shop/launches/all/run-1")
    );
}

#[test]
fn configured_run_name_wins() {
    let mut harness = harness_with(LifecycleOptions {
        run_name: Some("Nightly".into()),
        ..LifecycleOptions::default()
    });
    harness
        .coordinator
        .start_suite("Checkout", &[], None)
        .expect("start suite");

    let calls = harness.backend.calls();
    assert!(matches!(calls.first(), Some(Call::StartRun(run)) if run.name == "Nightly"));
}

#[rstest]
fn suite_round_trip_carries_attributes_and_status(mut harness: Harness) {
    harness
        .coordinator
        .start_suite("Checkout", &tags(&["critical:true", "smoke"]), None)
        .expect("start suite");
    harness
        .coordinator
        .finish_suite("FAILED")
        .expect("finish suite");

    let started = harness.backend.started_items();
    assert_eq!(started[0].attributes, vec![Attribute::new("critical", "true")]);
    let finished = harness.backend.finished_items();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].1.status, Some(ItemStatus::Failed));
}

#[rstest]
fn case_without_suite_is_skipped_without_network(mut harness: Harness) {
    let err = harness
        .coordinator
        .start_case("Pay", &[], None)
        .expect_err("no suite");

    assert!(err.is_consistency());
    assert!(harness.backend.calls().is_empty());
}

#[rstest]
fn restarting_an_active_item_reuses_it(mut harness: Harness) {
    let first = harness
        .coordinator
        .start_suite("Checkout", &[], None)
        .expect("start suite");
    let second = harness
        .coordinator
        .start_suite("Checkout", &[], None)
        .expect("restart suite");

    assert!(second.reused);
    assert_eq!(first.id, second.id);
    assert_eq!(harness.backend.started_items().len(), 1);
}

#[rstest]
fn second_finish_is_a_no_op(mut harness: Harness) {
    harness
        .coordinator
        .start_suite("Checkout", &[], None)
        .expect("start suite");

    assert_eq!(
        harness.coordinator.finish_suite("passed").expect("finish"),
        FinishOutcome::Finished
    );
    assert_eq!(
        harness.coordinator.finish_suite("passed").expect("finish"),
        FinishOutcome::AlreadyFinished
    );
    assert_eq!(harness.backend.finished_items().len(), 1);
}

#[rstest]
fn finish_without_start_is_a_consistency_error(mut harness: Harness) {
    let err = harness
        .coordinator
        .finish_case("passed")
        .expect_err("nothing started");
    assert!(matches!(
        err,
        ReportError::Consistency {
            level: Level::Case,
            ..
        }
    ));
}

#[rstest]
fn finishing_a_case_interrupts_its_open_step(mut harness: Harness) {
    let coordinator = &mut harness.coordinator;
    coordinator.start_suite("Checkout", &[], None).expect("suite");
    coordinator
        .start_case("Pay", &[], Some("TC-7"))
        .expect("case");
    let step = coordinator.start_step("enter card").expect("step");

    coordinator.finish_case("passed").expect("finish case");

    let finished = harness.backend.finished_items();
    assert_eq!(finished.len(), 2);
    assert_eq!(Some(&finished[0].0), step.id.as_ref());
    assert_eq!(finished[0].1.status, Some(ItemStatus::Interrupted));
    assert_eq!(finished[1].1.status, Some(ItemStatus::Passed));
    assert_eq!(
        harness.backend.started_items()[1].test_case_id.as_deref(),
        Some("TC-7")
    );
}

#[rstest]
fn finish_run_caches_the_identifier_and_blocks_restart(mut harness: Harness) {
    let coordinator = &mut harness.coordinator;
    coordinator.start_suite("Checkout", &[], None).expect("suite");

    assert_eq!(
        coordinator.finish_run(None).expect("finish run"),
        FinishOutcome::Finished
    );
    assert_eq!(
        coordinator.finish_run(None).expect("finish run again"),
        FinishOutcome::AlreadyFinished
    );

    assert!(coordinator.run_id().is_none());
    assert_eq!(coordinator.last_run_id(), Some(&ItemId::from("run-1")));
    let resolved = coordinator.identity().resolve_run().expect("cached run");
    assert_eq!(resolved.source, RunIdSource::Cached);
    coordinator
        .log("late line", LogLevel::Info)
        .expect("late logs target the finished run");
    assert_eq!(harness.backend.logs()[0].launch_uuid, ItemId::from("run-1"));
    assert!(!coordinator.is_active());
    assert_eq!(coordinator.state(Level::Suite), ItemState::Finished);
    assert!(
        coordinator
            .start_suite("Late", &[], None)
            .expect_err("run finished")
            .is_consistency()
    );

    let run_finishes = harness
        .backend
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::FinishRun(..)))
        .count();
    assert_eq!(run_finishes, 1);
}

#[test]
fn explicit_run_id_joins_without_starting_or_finishing() {
    let mut harness = harness_with(LifecycleOptions {
        explicit_run_id: Some(ItemId::from("external")),
        ..LifecycleOptions::default()
    });
    let coordinator = &mut harness.coordinator;

    coordinator.start_suite("Checkout", &[], None).expect("suite");
    coordinator.finish_suite("passed").expect("finish suite");
    coordinator.finish_run(None).expect("finish run");

    assert!(coordinator.is_joined());
    let calls = harness.backend.calls();
    assert!(
        !calls
            .iter()
            .any(|call| matches!(call, Call::StartRun(_) | Call::FinishRun(..)))
    );
    assert_eq!(
        harness.backend.started_items()[0].launch_uuid,
        ItemId::from("external")
    );
}

#[test]
fn inline_steps_become_case_log_lines() {
    let mut harness = harness_with(LifecycleOptions {
        step_layout: StepLayout::InlineLog,
        ..LifecycleOptions::default()
    });
    let coordinator = &mut harness.coordinator;
    coordinator.start_suite("Checkout", &[], None).expect("suite");
    let case = coordinator.start_case("Pay", &[], None).expect("case");

    let step = coordinator.start_step("submit order").expect("step");
    assert_eq!(step.id, None);
    coordinator.finish_step("failed").expect("finish step");

    assert_eq!(harness.backend.started_items().len(), 2);
    let logs = harness.backend.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "[FAILED] submit order");
    assert_eq!(logs[0].level, LogLevel::Error);
    assert_eq!(logs[0].item, case.id);
}

#[rstest]
#[case(StepLayout::FlatItem, true)]
#[case(StepLayout::NestedItem, false)]
fn step_items_follow_the_layout(#[case] layout: StepLayout, #[case] has_stats: bool) {
    let mut harness = harness_with(LifecycleOptions {
        step_layout: layout,
        ..LifecycleOptions::default()
    });
    let coordinator = &mut harness.coordinator;
    coordinator.start_suite("Checkout", &[], None).expect("suite");
    let case = coordinator.start_case("Pay", &[], None).expect("case");
    coordinator.start_step("enter card").expect("step");

    let step = harness.backend.started_items().pop().expect("step request");
    assert_eq!(step.kind, ItemKind::Step);
    assert_eq!(step.has_stats, has_stats);
    assert_eq!(step.parent, case.id);
}

#[rstest]
#[case(true, None)]
#[case(false, Some(IssueType::NotIssue))]
fn skipped_items_follow_issue_policy(
    #[case] skipped_is_issue: bool,
    #[case] expected: Option<IssueType>,
) {
    let mut harness = harness_with(LifecycleOptions {
        skipped_is_issue,
        ..LifecycleOptions::default()
    });
    harness
        .coordinator
        .start_suite("Checkout", &[], None)
        .expect("suite");
    harness.coordinator.finish_suite("skipped").expect("finish");

    let finished = harness.backend.finished_items();
    assert_eq!(finished[0].1.status, Some(ItemStatus::Skipped));
    assert_eq!(
        finished[0].1.issue.as_ref().map(|issue| issue.issue_type),
        expected
    );
}

#[rstest]
fn logs_target_the_innermost_active_item(mut harness: Harness) {
    let coordinator = &mut harness.coordinator;
    assert!(
        coordinator
            .log("too early", LogLevel::Info)
            .expect_err("no run")
            .is_consistency()
    );

    let suite = coordinator.start_suite("Checkout", &[], None).expect("suite");
    coordinator.log("suite line", LogLevel::Info).expect("log");
    let case = coordinator.start_case("Pay", &[], None).expect("case");
    coordinator
        .attach(Bytes::from_static(b"png"), "page.png", "image/png")
        .expect("attach");
    coordinator.finish_case("passed").expect("finish case");
    coordinator.log("back to suite", LogLevel::Warn).expect("log");

    let logs = harness.backend.logs();
    assert_eq!(logs[0].item, suite.id);
    assert_eq!(logs[1].item, case.id);
    assert_eq!(
        logs[1].attachment.as_ref().map(|file| file.mime_type.as_str()),
        Some("image/png")
    );
    assert_eq!(logs[2].item, suite.id);
}

#[rstest]
fn exceptions_include_their_source_chain(mut harness: Harness) {
    #[derive(Debug, thiserror::Error)]
    #[error("checkout failed")]
    struct Checkout(#[source] io::Error);

    let coordinator = &mut harness.coordinator;
    coordinator.start_suite("Checkout", &[], None).expect("suite");
    let error = Checkout(io::Error::other("socket closed"));
    coordinator
        .log_exception(&error, "step 3")
        .expect("log exception");

    let logs = harness.backend.logs();
    assert_eq!(
        logs[0].message,
        "step 3: checkout failed\ncaused by: socket closed"
    );
    assert_eq!(logs[0].level, LogLevel::Error);
}

#[rstest]
fn clear_run_forgets_every_identifier(mut harness: Harness) {
    let coordinator = &mut harness.coordinator;
    coordinator.start_suite("Checkout", &[], None).expect("suite");
    coordinator.finish_run(None).expect("finish run");

    coordinator.clear_run();

    assert!(coordinator.run_id().is_none());
    assert!(coordinator.identity().resolve_run().is_none());
    assert!(coordinator.run_url().is_none());
}
