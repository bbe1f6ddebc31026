//! Steps driving the finalization guard.

use cucumber::{given, then, when};
use reportwire::finalize::Fallback;
use reportwire_testing::Op;

use crate::worlds::ReportWorld;

#[given("the queue flush fails")]
fn flush_fails(world: &mut ReportWorld) { world.server.fail_next(Op::Terminate, 1); }

#[given("the direct finish fails")]
fn direct_fails(world: &mut ReportWorld) { world.server.fail_next(Op::DirectFinish, 1); }

#[when(regex = r"^the run is finalized(?: again)?$")]
fn finalized(world: &mut ReportWorld) { world.finalize(); }

#[then("the run was finished directly")]
fn finished_directly(world: &mut ReportWorld) {
    let report = world.reports.first().expect("finalization ran");
    assert_eq!(report.fallback, Fallback::Delivered);
    assert!(
        world
            .server
            .run_finish_requests()
            .iter()
            .any(|(_, direct)| *direct)
    );
}

#[then("the flush confirmed delivery")]
fn flush_confirmed(world: &mut ReportWorld) {
    let report = world.reports.first().expect("finalization ran");
    assert!(report.flush_confirmed);
    assert_eq!(report.fallback, Fallback::NotNeeded);
}

#[then("the report is marked incomplete")]
fn incomplete(world: &mut ReportWorld) {
    let report = world.reports.first().expect("finalization ran");
    assert!(report.is_incomplete());
}

#[then(expr = "the backend finished {int} run(s)")]
fn finished_runs(world: &mut ReportWorld, count: usize) {
    assert_eq!(world.server.finished_runs().len(), count);
}

#[then("the second finalization did nothing")]
fn second_noop(world: &mut ReportWorld) {
    let report = world.reports.get(1).expect("finalization ran twice");
    assert!(report.is_noop());
    assert_eq!(world.server.attempts(Op::Terminate), 1);
}
