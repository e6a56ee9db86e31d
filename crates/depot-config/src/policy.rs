//! Run policy enumerations shared between configuration and the job engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How individual job failures affect the outcome of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailPolicy {
    /// The first error aborts the run immediately; failed jobs are neither
    /// retried nor replaced by their backup.
    FailFast,
    /// Errors are accumulated, no new branches start once one exists, and the
    /// first one is returned at the end of the run.
    #[default]
    FailGracefully,
    /// Errors are accumulated and reported; the run always returns normally.
    FaultTolerant,
}

impl FailPolicy {
    /// Returns true if the run must stop at the first error.
    #[must_use]
    pub const fn is_fail_fast(&self) -> bool {
        matches!(self, Self::FailFast)
    }

    /// Returns true if an unhandled error should cancel the rest of the run.
    #[must_use]
    pub const fn cancels_on_error(&self) -> bool {
        matches!(self, Self::FailFast | Self::FailGracefully)
    }

    /// Returns true if the first unhandled error is returned to the caller.
    #[must_use]
    pub const fn propagates_errors(&self) -> bool {
        !matches!(self, Self::FaultTolerant)
    }
}

impl fmt::Display for FailPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail_fast"),
            Self::FailGracefully => write!(f, "fail_gracefully"),
            Self::FaultTolerant => write!(f, "fault_tolerant"),
        }
    }
}

/// OS signals that cancel a run while it is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterferingSignal {
    /// SIGINT / Ctrl-C.
    #[default]
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// SIGHUP.
    Hangup,
    /// SIGQUIT.
    Quit,
}

impl InterferingSignal {
    /// Conventional process exit code for termination by this signal.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        128 + match self {
            Self::Hangup => 1,
            Self::Interrupt => 2,
            Self::Quit => 3,
            Self::Terminate => 15,
        }
    }
}

impl fmt::Display for InterferingSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
            Self::Hangup => write!(f, "SIGHUP"),
            Self::Quit => write!(f, "SIGQUIT"),
        }
    }
}
