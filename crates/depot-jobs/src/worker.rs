//! Workers operate on jobs of one kind.

use crate::context::JobContext;
use crate::error::JobError;
use crate::job::Job;
use crate::reporter::ProgressReporter;
use std::sync::Arc;

/// Outcome of one operation: the follow-up jobs to enqueue as children, or
/// the failure that triggers retry and backup handling.
pub type WorkResult = Result<Vec<Box<dyn Job>>, JobError>;

/// Worker trait for processing jobs.
///
/// Workers are shared between threads when the system runs with more than
/// one thread, so `operate_on` takes `&self`; per-job state belongs in the
/// job.
pub trait Worker: Send + Sync {
    /// Operate on a job.
    fn operate_on(&self, job: &mut dyn Job, ctx: &JobContext) -> WorkResult;

    /// Reporter for the jobs of this worker, instead of the system default.
    fn reporter(&self) -> Option<Arc<dyn ProgressReporter>> {
        None
    }
}

impl<F> Worker for F
where
    F: Fn(&mut dyn Job, &JobContext) -> WorkResult + Send + Sync,
{
    fn operate_on(&self, job: &mut dyn Job, ctx: &JobContext) -> WorkResult {
        self(job, ctx)
    }
}
