//! Job error types.

use crate::config::InterferingSignal;
use crate::job::JobKind;
use std::sync::Arc;
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// A job was pushed while a run was executing, or no worker handles it.
    #[error("Can't push jobs: {0}")]
    CantPushJobs(String),

    /// A worker was registered while a run was executing.
    #[error("Can't register worker: {0}")]
    CantRegisterWorker(String),

    /// A run was started while another one is executing.
    #[error("Can't execute jobs: {0}")]
    CantExecuteJobs(String),

    /// Interfering signals were changed while a run was executing.
    #[error("Can't set interfering signals: {0}")]
    CantSetSignals(String),

    /// `wait_for_other_jobs` was called after the run timed out.
    #[error("Can't wait for other jobs: the run has timed out")]
    CantWaitWhenTimedOut,

    /// `wait_for_other_jobs` was called outside of a run.
    #[error("Can't wait for other jobs: no jobs are being executed")]
    CantWaitWhenNotExecutingJobs,

    /// A job kind repeats too often along one ancestry chain.
    #[error("Cycle detected: {kind} appears {occurrences} times in its ancestry (limit {limit})")]
    CycleDetected {
        kind: JobKind,
        occurrences: u32,
        limit: u32,
    },

    /// A follow-up, retry or backup job has no worker.
    #[error("No worker registered for {0}")]
    NoWorkerRegistered(JobKind),

    /// The worker panicked while operating on a job.
    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),

    /// A progress reporter callback failed.
    #[error("Progress reporter failed: {0}")]
    Reporter(String),

    /// The run was cancelled by an OS signal.
    #[error("Run interrupted by {0}")]
    Interrupted(InterferingSignal),

    /// A unit of work ended without reporting back.
    #[error("Unit of work for {job} was lost: {reason}")]
    UnitLost { job: String, reason: String },

    /// Job execution failed.
    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    /// A worker was handed a job type it does not operate on.
    #[error("Unexpected job: expected {expected}, got {actual}")]
    UnexpectedJob {
        expected: &'static str,
        actual: String,
    },

    /// The first unhandled error of a run, as returned by `execute_jobs`.
    #[error("{0}")]
    Unhandled(Arc<JobError>),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Any other worker-side error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobError {
    /// Creates an execution failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }

    /// Returns true if this error must fail a job without retry or backup.
    ///
    /// These are misuses of the system itself; retrying the job would repeat
    /// them.
    pub fn is_system_abort(&self) -> bool {
        match self {
            Self::CantPushJobs(_)
            | Self::CantRegisterWorker(_)
            | Self::CantExecuteJobs(_)
            | Self::CantSetSignals(_)
            | Self::CantWaitWhenTimedOut
            | Self::CantWaitWhenNotExecutingJobs
            | Self::CycleDetected { .. }
            | Self::NoWorkerRegistered(_)
            | Self::Interrupted(_)
            | Self::Configuration(_) => true,
            Self::Unhandled(inner) => inner.is_system_abort(),
            _ => false,
        }
    }

    /// Strips the [`JobError::Unhandled`] wrapper.
    pub fn root(&self) -> &JobError {
        match self {
            Self::Unhandled(inner) => inner.root(),
            other => other,
        }
    }

    /// Exit code a binary should use when this error ends the process.
    ///
    /// Only interrupted runs have one, the shell convention for death by the
    /// interrupting signal.
    pub fn exit_code(&self) -> Option<i32> {
        match self.root() {
            Self::Interrupted(signal) => Some(signal.exit_code()),
            _ => None,
        }
    }

    /// Returns a stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CantPushJobs(_) => "CANT_PUSH_JOBS",
            Self::CantRegisterWorker(_) => "CANT_REGISTER_WORKER",
            Self::CantExecuteJobs(_) => "CANT_EXECUTE_JOBS",
            Self::CantSetSignals(_) => "CANT_SET_SIGNALS",
            Self::CantWaitWhenTimedOut => "CANT_WAIT_WHEN_TIMED_OUT",
            Self::CantWaitWhenNotExecutingJobs => "CANT_WAIT_WHEN_NOT_EXECUTING_JOBS",
            Self::CycleDetected { .. } => "CYCLE_DETECTED",
            Self::NoWorkerRegistered(_) => "NO_WORKER_REGISTERED",
            Self::WorkerPanicked(_) => "WORKER_PANICKED",
            Self::Reporter(_) => "REPORTER_FAILED",
            Self::Interrupted(_) => "INTERRUPTED",
            Self::UnitLost { .. } => "UNIT_LOST",
            Self::ExecutionFailed(_) => "EXECUTION_FAILED",
            Self::UnexpectedJob { .. } => "UNEXPECTED_JOB",
            Self::Unhandled(inner) => inner.error_code(),
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Other(_) => "OTHER",
        }
    }
}

impl From<depot_core::DepotError> for JobError {
    fn from(err: depot_core::DepotError) -> Self {
        match err {
            depot_core::DepotError::Configuration(msg) => JobError::Configuration(msg),
            other => JobError::Other(anyhow::Error::new(other)),
        }
    }
}
