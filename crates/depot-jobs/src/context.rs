//! Context handed to workers.

use crate::activity::ActivityTracker;
use crate::error::JobResult;
use crate::job::{JobInfo, JobKind};
use crate::outputs::JobOutputs;
use crate::package::PackageId;
use crate::system::JobSystem;
use std::time::Duration;

/// Job execution context.
///
/// Gives a worker access to the system running its job while it operates on
/// it.
#[derive(Clone)]
pub struct JobContext {
    system: JobSystem,
    package_id: PackageId,
    kind: JobKind,
    tries: u32,
}

impl JobContext {
    pub(crate) fn new(system: JobSystem, info: &JobInfo) -> Self {
        Self {
            system,
            package_id: info.package_id,
            kind: info.kind,
            tries: info.tries,
        }
    }

    /// Package of the current job.
    pub fn package_id(&self) -> PackageId {
        self.package_id
    }

    /// Kind of the current job.
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Failed attempts before this one; 0 on the first attempt and for
    /// backup jobs.
    pub fn tries(&self) -> u32 {
        self.tries
    }

    /// Returns true if this attempt is the last one before the backup job.
    pub fn is_last_attempt(&self) -> bool {
        self.tries >= self.system.config().max_tries
    }

    /// Cancels the run; see [`JobSystem::cancel_pending_jobs`].
    pub fn cancel_pending_jobs(&self) {
        self.system.cancel_pending_jobs();
    }

    /// Returns true once the run is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.system.are_jobs_cancelled()
    }

    /// Lets other jobs make progress; see [`JobSystem::wait_for_other_jobs`].
    pub fn wait_for_other_jobs(&self, duration: Duration) -> JobResult<()> {
        self.system.wait_for_other_jobs(duration)
    }

    /// Outputs shared by the jobs of this run.
    pub fn outputs(&self) -> &JobOutputs {
        self.system.outputs()
    }

    /// Progress heartbeat of the system, if one was configured.
    pub fn activity(&self) -> Option<&ActivityTracker> {
        self.system.activity_tracker()
    }

    /// The system running this job.
    pub fn system(&self) -> &JobSystem {
        &self.system
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("package_id", &self.package_id)
            .field("kind", &self.kind)
            .field("tries", &self.tries)
            .finish_non_exhaustive()
    }
}
