//! Steps driving the lifecycle coordinator.

use cucumber::{given, then, when};
use reportwire::{
    FinishOutcome,
    identity::Level,
    lifecycle::ItemState,
    model::{Attribute, CallerStatus},
};
use reportwire_testing::Op;

use crate::worlds::ReportWorld;

#[given(expr = "a reporter retrying {int} time(s)")]
fn reporter(world: &mut ReportWorld, attempts: u32) { world.connect(attempts); }

#[given(expr = "the backend fails the next {int} item start(s)")]
fn failing_item_starts(world: &mut ReportWorld, times: usize) {
    world.server.fail_next(Op::StartItem, times);
}

#[given(expr = "suite {string} has started")]
fn suite_started(world: &mut ReportWorld, name: String) {
    let result = world.coordinator().start_suite(&name, &[], None);
    world.record(result);
}

#[when(expr = "suite {string} starts with tag {string}")]
fn suite_starts_tagged(world: &mut ReportWorld, name: String, tag: String) {
    let result = world.coordinator().start_suite(&name, &[tag], None);
    world.record(result);
}

#[when(expr = "case {string} starts")]
fn case_starts(world: &mut ReportWorld, name: String) {
    let result = world.coordinator().start_case(&name, &[], None);
    world.record(result);
}

#[when(expr = "the suite finishes as {string}")]
fn suite_finishes(world: &mut ReportWorld, status: String) {
    let result = world.coordinator().finish_suite(status);
    world.last_outcome = world.record(result);
}

#[when(regex = r"^the run finishes(?: again)?$")]
fn run_finishes(world: &mut ReportWorld) {
    let result = world.coordinator().finish_run(None);
    world.last_outcome = world.record(result);
}

#[then(expr = "the backend received attribute {string} with value {string}")]
fn received_attribute(world: &mut ReportWorld, key: String, value: String) {
    let expected = Attribute::new(key, value);
    assert!(
        world
            .server
            .started_items()
            .iter()
            .any(|item| item.attributes.contains(&expected)),
        "attribute {expected:?} not delivered"
    );
}

#[then(expr = "the last finished item has status {string}")]
fn finished_status(world: &mut ReportWorld, status: String) {
    let expected = CallerStatus::from(status).to_item_status();
    let finished = world.server.finished_items();
    let (_, request) = finished.last().expect("an item finished");
    assert_eq!(request.status, Some(expected));
}

#[then(expr = "the backend saw {int} item start attempt(s)")]
fn item_start_attempts(world: &mut ReportWorld, attempts: usize) {
    assert_eq!(world.server.attempts(Op::StartItem), attempts);
}

#[then("the case is active")]
fn case_active(world: &mut ReportWorld) {
    assert!(world.last_error.is_none(), "{:?}", world.last_error);
    assert_eq!(world.coordinator().state(Level::Case), ItemState::Active);
}

#[then("the call was skipped without contacting the backend")]
fn skipped(world: &mut ReportWorld) {
    let err = world.last_error.as_ref().expect("the call failed");
    assert!(err.is_consistency(), "unexpected error: {err}");
    assert!(world.server.started_items().is_empty());
}

#[then("the last finish was a no-op")]
fn finish_noop(world: &mut ReportWorld) {
    assert_eq!(world.last_outcome, Some(FinishOutcome::AlreadyFinished));
}

#[then(expr = "the backend received {int} run finish request(s)")]
fn run_finish_requests(world: &mut ReportWorld, count: usize) {
    assert_eq!(world.server.run_finish_requests().len(), count);
}
