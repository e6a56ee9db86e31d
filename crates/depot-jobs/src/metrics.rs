//! Metrics for job system monitoring.
//!
//! Emitted through the `metrics` facade; installing a recorder is up to the
//! embedding binary.

use crate::job::JobKind;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the job system.
pub mod names {
    /// Total jobs pushed by callers.
    pub const JOBS_PUSHED_TOTAL: &str = "depot_jobs_pushed_total";
    /// Total jobs a worker started operating on.
    pub const JOBS_STARTED_TOTAL: &str = "depot_jobs_started_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "depot_jobs_completed_total";
    /// Total jobs failed for good.
    pub const JOBS_FAILED_TOTAL: &str = "depot_jobs_failed_total";
    /// Total retry and backup jobs enqueued.
    pub const JOBS_RETRIED_TOTAL: &str = "depot_jobs_retried_total";
    /// Total jobs cancelled.
    pub const JOBS_CANCELLED_TOTAL: &str = "depot_jobs_cancelled_total";
    /// Total cycles detected.
    pub const CYCLES_DETECTED_TOTAL: &str = "depot_jobs_cycles_detected_total";
    /// Total unhandled errors recorded.
    pub const UNHANDLED_ERRORS_TOTAL: &str = "depot_jobs_unhandled_errors_total";

    /// Current pending jobs.
    pub const JOBS_PENDING: &str = "depot_jobs_pending";
    /// Current units in flight.
    pub const JOBS_IN_FLIGHT: &str = "depot_jobs_in_flight";

    /// Total runs by outcome.
    pub const RUNS_TOTAL: &str = "depot_jobs_runs_total";
    /// Run duration in seconds.
    pub const RUN_DURATION_SECONDS: &str = "depot_jobs_run_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_PUSHED_TOTAL, "Total number of jobs pushed");
    describe_counter!(
        names::JOBS_STARTED_TOTAL,
        "Total number of jobs a worker started operating on"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total number of jobs that failed");
    describe_counter!(
        names::JOBS_RETRIED_TOTAL,
        "Total number of retry and backup jobs enqueued"
    );
    describe_counter!(names::JOBS_CANCELLED_TOTAL, "Total number of jobs cancelled");
    describe_counter!(
        names::CYCLES_DETECTED_TOTAL,
        "Total number of job cycles detected"
    );
    describe_counter!(
        names::UNHANDLED_ERRORS_TOTAL,
        "Total number of unhandled errors recorded"
    );

    describe_gauge!(names::JOBS_PENDING, "Current number of pending jobs");
    describe_gauge!(names::JOBS_IN_FLIGHT, "Current number of units in flight");

    describe_counter!(names::RUNS_TOTAL, "Total number of runs by outcome");
    describe_histogram!(names::RUN_DURATION_SECONDS, "Run duration in seconds");
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job pushed.
    pub fn job_pushed(kind: JobKind) {
        counter!(names::JOBS_PUSHED_TOTAL, "kind" => kind.name()).increment(1);
    }

    /// Record a job started.
    pub fn job_started(kind: JobKind) {
        counter!(names::JOBS_STARTED_TOTAL, "kind" => kind.name()).increment(1);
    }

    /// Record a job completed.
    pub fn job_completed(kind: JobKind) {
        counter!(names::JOBS_COMPLETED_TOTAL, "kind" => kind.name()).increment(1);
    }

    /// Record a job failed.
    pub fn job_failed(kind: JobKind, error_code: &'static str) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "kind" => kind.name(),
            "error_code" => error_code
        )
        .increment(1);
    }

    /// Record a retry or backup job enqueued.
    pub fn job_retried(kind: JobKind, backup: bool) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "kind" => kind.name(),
            "backup" => if backup { "true" } else { "false" }
        )
        .increment(1);
    }

    /// Record jobs cancelled.
    pub fn jobs_cancelled(count: usize) {
        counter!(names::JOBS_CANCELLED_TOTAL).increment(count as u64);
    }

    /// Record a cycle detected.
    pub fn cycle_detected(kind: JobKind) {
        counter!(names::CYCLES_DETECTED_TOTAL, "kind" => kind.name()).increment(1);
    }

    /// Record an unhandled error.
    pub fn unhandled_error(error_code: &'static str) {
        counter!(names::UNHANDLED_ERRORS_TOTAL, "error_code" => error_code).increment(1);
    }

    /// Set the pending jobs gauge.
    pub fn set_pending(count: usize) {
        gauge!(names::JOBS_PENDING).set(count as f64);
    }

    /// Set the in-flight units gauge.
    pub fn set_in_flight(count: usize) {
        gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
    }
}

/// Run metrics recorder.
#[derive(Clone)]
pub struct RunMetrics;

impl RunMetrics {
    /// Record a finished run.
    pub fn run_finished(outcome: &'static str, duration: Duration) {
        counter!(names::RUNS_TOTAL, "outcome" => outcome).increment(1);
        histogram!(names::RUN_DURATION_SECONDS, "outcome" => outcome)
            .record(duration.as_secs_f64());
    }
}
