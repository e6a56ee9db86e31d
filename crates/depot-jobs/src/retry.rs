//! Recovery of failed jobs.
//!
//! A failed job is retried while its attempts stay below the retry budget,
//! using whatever [`Job::retry_job`] returns. Once retries are exhausted or
//! skipped its [`Job::backup_job`] runs with a fresh budget. A job with
//! neither fails for good.

use crate::job::{Job, Retry};

/// What to do with a failed job.
#[derive(Debug)]
pub(crate) enum Recovery {
    /// Enqueue this job with one more attempt counted.
    Retry(Box<dyn Job>),
    /// Enqueue this job with the attempt count reset.
    Backup(Box<dyn Job>),
    /// Report the failure.
    GiveUp,
}

impl Recovery {
    /// Attempt count of the job enqueued in place of one that failed after
    /// `tries` earlier failures.
    pub fn next_tries(&self, tries: u32) -> u32 {
        match self {
            Recovery::Retry(_) => tries + 1,
            Recovery::Backup(_) | Recovery::GiveUp => 0,
        }
    }
}

/// Decides how to recover `job`, which just failed after `tries` earlier
/// failed attempts.
pub(crate) fn plan(job: Box<dyn Job>, tries: u32, max_tries: u32) -> Recovery {
    if tries < max_tries {
        match job.retry_job() {
            Retry::Same => return Recovery::Retry(job),
            Retry::With(substitute) => return Recovery::Retry(substitute),
            Retry::Skip => {}
        }
    }

    match job.backup_job() {
        Some(backup) => Recovery::Backup(backup),
        None => Recovery::GiveUp,
    }
}
