//! Progress reporting.
//!
//! The scheduling thread calls a [`ProgressReporter`] for every lifecycle
//! event of a job. Reporters receive [`JobInfo`] snapshots, never the live
//! job, and an error returned from a callback is recorded as an unhandled
//! error of the run instead of being propagated.

use crate::error::JobError;
use crate::job::JobInfo;
use tracing::{debug, info, warn};

/// Observer of job lifecycle events.
///
/// Every method has a no-op default, so implementations only override the
/// events they care about.
pub trait ProgressReporter: Send + Sync {
    /// A worker started operating on a job.
    fn notify_job_started(&self, _job: &JobInfo) -> anyhow::Result<()> {
        Ok(())
    }

    /// The scheduler is still waiting for work to finish.
    fn notify_work_in_progress(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Jobs were dropped because the run was cancelled.
    fn notify_jobs_cancelled(&self, _jobs: &[JobInfo]) -> anyhow::Result<()> {
        Ok(())
    }

    /// A job completed; `follow_ups` lists the children it enqueued.
    fn notify_job_completed(&self, _job: &JobInfo, _follow_ups: &[JobInfo]) -> anyhow::Result<()> {
        Ok(())
    }

    /// A job failed for good.
    fn notify_job_failed(&self, _job: &JobInfo, _error: &JobError) -> anyhow::Result<()> {
        Ok(())
    }

    /// A job failed and `retry` was enqueued in its place.
    fn notify_job_retried(
        &self,
        _job: &JobInfo,
        _retry: &JobInfo,
        _error: &JobError,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Reporter that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {}

/// Reporter that turns lifecycle events into tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn notify_job_started(&self, job: &JobInfo) -> anyhow::Result<()> {
        debug!(
            package_id = %job.package_id,
            kind = %job.kind,
            tries = job.tries,
            "Job started: {}",
            job.label
        );
        Ok(())
    }

    fn notify_jobs_cancelled(&self, jobs: &[JobInfo]) -> anyhow::Result<()> {
        for job in jobs {
            info!(package_id = %job.package_id, kind = %job.kind, "Job cancelled: {}", job.label);
        }
        Ok(())
    }

    fn notify_job_completed(&self, job: &JobInfo, follow_ups: &[JobInfo]) -> anyhow::Result<()> {
        info!(
            package_id = %job.package_id,
            kind = %job.kind,
            follow_ups = follow_ups.len(),
            "Job completed: {}",
            job.label
        );
        Ok(())
    }

    fn notify_job_failed(&self, job: &JobInfo, error: &JobError) -> anyhow::Result<()> {
        warn!(
            package_id = %job.package_id,
            kind = %job.kind,
            tries = job.tries,
            error_code = error.error_code(),
            error = %error,
            "Job failed: {}",
            job.label
        );
        Ok(())
    }

    fn notify_job_retried(&self, job: &JobInfo, retry: &JobInfo, error: &JobError) -> anyhow::Result<()> {
        info!(
            package_id = %job.package_id,
            retry_package_id = %retry.package_id,
            kind = %retry.kind,
            tries = retry.tries,
            error = %error,
            "Job retried: {}",
            retry.label
        );
        Ok(())
    }
}
