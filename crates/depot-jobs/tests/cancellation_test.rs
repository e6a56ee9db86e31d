//! Integration tests for cancellation, stall timeouts and fail policies.

mod common;

use common::*;
use depot_jobs::{
    ActivityTracker, FailPolicy, Job, JobContext, JobError, JobSystem, JobSystemConfig, WorkResult,
};
use std::sync::Arc;
use std::time::Duration;

fn step_names(jobs: &[Box<dyn Job>]) -> Vec<String> {
    let mut names: Vec<String> = jobs
        .iter()
        .filter_map(|job| job.downcast_ref::<Step>().map(|s| s.name.clone()))
        .collect();
    names.sort();
    names
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[test]
fn test_cancel_from_worker_single_threaded() {
    let reporter = RecordingReporter::new();
    let (system, journal) = system_with(single(), &reporter);

    system.push_job(Step::new("a")).unwrap();
    system
        .push_job(Step::new("cancel").action(Action::Cancel).child(Step::new("child")))
        .unwrap();
    system.push_job(Step::new("b")).unwrap();
    system.push_job(Step::new("c")).unwrap();

    system.execute_jobs().unwrap();

    assert!(system.are_jobs_cancelled());
    assert!(!system.timed_out());
    assert_eq!(journal.entries(), vec!["a", "cancel"]);
    assert_eq!(reporter.completed(), vec!["a", "cancel"]);
    assert_eq!(sorted(reporter.cancelled()), vec!["b", "c", "child"]);
    assert_eq!(system.pending_jobs_amount(), 0);

    let cancelled = system.take_cancelled_jobs();
    assert_eq!(step_names(&cancelled), vec!["b", "c", "child"]);
    assert_eq!(system.cancelled_jobs_amount(), 0);
}

#[test]
fn test_cancel_from_worker_threaded() {
    let reporter = RecordingReporter::new();
    let (system, journal) = system_with(threaded(2), &reporter);
    let rendezvous = Rendezvous::new(2);

    system
        .push_job(
            Step::new("blocker")
                .meet(&rendezvous)
                .action(Action::Sleep(Duration::from_millis(50))),
        )
        .unwrap();
    system
        .push_job(
            Step::new("canceller")
                .meet(&rendezvous)
                .action(Action::Cancel)
                .child(Step::new("child")),
        )
        .unwrap();
    for name in ["q1", "q2", "q3", "q4"] {
        system.push_job(Step::new(name)).unwrap();
    }

    system.execute_jobs().unwrap();

    assert!(system.are_jobs_cancelled());
    assert_eq!(journal.sorted(), vec!["blocker", "canceller"]);
    assert_eq!(sorted(reporter.completed()), vec!["blocker", "canceller"]);
    assert_eq!(
        sorted(reporter.cancelled()),
        vec!["child", "q1", "q2", "q3", "q4"]
    );
    assert!(reporter.failed().is_empty());
    assert_eq!(system.pending_jobs_amount(), 0);
    assert_eq!(system.cancelled_jobs_amount(), 5);
}

#[test]
fn test_cancelled_jobs_are_cleared_by_next_run() {
    let reporter = RecordingReporter::new();
    let (system, _journal) = system_with(single(), &reporter);

    system.push_job(Step::new("cancel").action(Action::Cancel)).unwrap();
    system.push_job(Step::new("dropped")).unwrap();
    system.execute_jobs().unwrap();
    assert_eq!(system.cancelled_jobs_amount(), 1);

    system.push_job(Step::new("fresh")).unwrap();
    system.execute_jobs().unwrap();
    assert_eq!(system.cancelled_jobs_amount(), 0);
    assert!(!system.are_jobs_cancelled());
}

#[test]
fn test_zero_timeout_stalls_run() {
    for config in both_modes() {
        let reporter = RecordingReporter::new();
        let (system, _journal) =
            system_with(config.with_max_timeout(Some(Duration::ZERO)), &reporter);

        system
            .push_job(Step::new("slow").action(Action::Sleep(Duration::from_millis(5))))
            .unwrap();
        system.push_job(Step::new("next")).unwrap();

        system.execute_jobs().unwrap();

        assert!(system.timed_out());
        assert!(system.are_jobs_cancelled());
        assert_eq!(system.pending_jobs_amount(), 0);
    }
}

#[test]
fn test_activity_heartbeat_prevents_stall() {
    for config in both_modes() {
        let reporter = RecordingReporter::new();
        let tracker = ActivityTracker::new();
        tracker.hold_indefinitely();

        let system = JobSystem::builder(config.with_max_timeout(Some(Duration::ZERO)))
            .reporter(Arc::clone(&reporter) as _)
            .activity_tracker(tracker)
            .build();
        let journal = register_all(&system);

        system
            .push_job(Step::new("slow").action(Action::Sleep(Duration::from_millis(5))))
            .unwrap();
        system.push_job(Step::new("next")).unwrap();

        system.execute_jobs().unwrap();

        assert!(!system.timed_out());
        assert!(!system.are_jobs_cancelled());
        assert_eq!(journal.sorted(), vec!["next", "slow"]);
    }
}

#[test]
fn test_waiting_after_stall_fails() {
    let reporter = RecordingReporter::new();
    let (system, _journal) = system_with(
        single().with_max_timeout(Some(Duration::ZERO)),
        &reporter,
    );

    system
        .push_job(Step::new("waiter").action(Action::AwaitJournal("never")))
        .unwrap();
    system.execute_jobs().unwrap();

    assert!(system.timed_out());
    assert_eq!(reporter.cancelled(), vec!["waiter"]);
    assert!(reporter.failed().is_empty());
    assert!(system.get_unhandled_exceptions().is_empty());
}

#[test]
fn test_fail_fast_returns_first_error_and_cancels_queue() {
    let reporter = RecordingReporter::new();
    let (system, journal) = system_with(
        single()
            .with_max_tries(0)
            .with_fail_policy(FailPolicy::FailFast),
        &reporter,
    );

    system.push_job(Flaky::always_failing("broken")).unwrap();
    system.push_job(Step::new("a")).unwrap();
    system.push_job(Step::new("b")).unwrap();

    let err = system.execute_jobs().unwrap_err();

    assert!(matches!(err, JobError::Unhandled(_)));
    assert!(matches!(err.root(), JobError::ExecutionFailed(m) if m == "broken failed"));
    assert!(journal.entries().is_empty());
    assert_eq!(sorted(reporter.cancelled()), vec!["a", "b"]);
    assert!(!system.is_executing_jobs());
}

#[test]
fn test_fail_fast_skips_retries_and_backup() {
    for config in both_modes() {
        let reporter = RecordingReporter::new();
        let (system, _journal) =
            system_with(config.with_fail_policy(FailPolicy::FailFast), &reporter);

        system
            .push_job(Flaky::always_failing("broken").with_backup(0))
            .unwrap();

        let err = system.execute_jobs().unwrap_err();

        assert_eq!(err.error_code(), "EXECUTION_FAILED");
        assert_eq!(reporter.started(), vec!["broken"]);
        assert!(reporter.retried().is_empty());
        assert_eq!(reporter.failed(), vec!["broken"]);
        assert_eq!(system.get_unhandled_exceptions().len(), 1);
    }
}

#[test]
fn test_fail_fast_threaded_returns_error() {
    let reporter = RecordingReporter::new();
    let (system, _journal) = system_with(
        threaded(2)
            .with_max_tries(0)
            .with_fail_policy(FailPolicy::FailFast),
        &reporter,
    );

    system.push_job(Flaky::always_failing("broken")).unwrap();
    for name in ["a", "b", "c"] {
        system.push_job(Step::new(name)).unwrap();
    }

    let err = system.execute_jobs().unwrap_err();
    assert_eq!(err.error_code(), "EXECUTION_FAILED");
    assert!(!system.is_executing_jobs());
}

#[test]
fn test_fail_gracefully_finishes_started_work() {
    let reporter = RecordingReporter::new();
    let (system, journal) = system_with(single().with_max_tries(0), &reporter);

    system.push_job(Step::new("a").child(Step::new("a-child"))).unwrap();
    system.push_job(Flaky::always_failing("broken")).unwrap();
    system.push_job(Step::new("b")).unwrap();

    let err = system.execute_jobs().unwrap_err();

    assert!(matches!(err.root(), JobError::ExecutionFailed(_)));
    assert_eq!(journal.entries(), vec!["a"]);
    assert_eq!(sorted(reporter.cancelled()), vec!["a-child", "b"]);
    assert_eq!(reporter.failed(), vec!["broken"]);
}

#[test]
fn test_fault_tolerant_keeps_going() {
    let reporter = RecordingReporter::new();
    let (system, journal) = system_with(
        single()
            .with_max_tries(0)
            .with_fail_policy(FailPolicy::FaultTolerant),
        &reporter,
    );

    system.push_job(Flaky::always_failing("broken")).unwrap();
    system.push_job(Step::new("a").child(Step::new("a-child"))).unwrap();

    system.execute_jobs().unwrap();

    assert!(!system.are_jobs_cancelled());
    assert_eq!(journal.entries(), vec!["a", "a-child"]);
    assert_eq!(system.get_unhandled_exceptions().len(), 1);
}

#[test]
fn test_mutations_rejected_from_inside_run() {
    let system = JobSystem::new(JobSystemConfig::single_threaded());
    let outcomes = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&outcomes);

    system
        .register_worker(STEP, move |_job: &mut dyn Job, ctx: &JobContext| -> WorkResult {
            let system = ctx.system();
            sink.lock().push(vec![
                system.push_job(Step::new("late")).is_err(),
                system.register_worker(FLAKY, run_flaky).is_err(),
                system.set_interfering_signals(vec![]).is_err(),
                system.is_executing_jobs(),
            ]);
            Ok(Vec::new())
        })
        .unwrap();

    system.push_job(Step::new("inspector")).unwrap();
    system.execute_jobs().unwrap();

    assert_eq!(*outcomes.lock(), vec![vec![true, true, true, true]]);
    assert!(!system.is_executing_jobs());
}
