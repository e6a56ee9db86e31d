//! Job trait and definitions.

use crate::error::{JobError, JobResult};
use crate::package::PackageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifies the class of a job and selects its worker.
///
/// Two kinds are equal when their ids are; the name is for logs only.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct JobKind {
    id: u32,
    name: &'static str,
}

impl JobKind {
    /// Creates a job kind.
    pub const fn new(id: u32, name: &'static str) -> Self {
        Self { id, name }
    }

    /// Returns the numeric id.
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Returns the display name.
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for JobKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for JobKind {}

impl Hash for JobKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Value of a job tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Str(String),
    Int(i64),
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{}", s),
            Self::Int(i) => write!(f, "{}", i),
        }
    }
}

/// Free-form metadata attached to a job.
pub type JobTags = BTreeMap<String, TagValue>;

/// What to run when a job fails and retries remain.
#[derive(Debug, Default)]
pub enum Retry {
    /// Run the same job again.
    #[default]
    Same,
    /// Run this job instead.
    With(Box<dyn Job>),
    /// Don't retry; go straight to the backup job.
    Skip,
}

/// Object-safe access to [`Any`] for every job type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A unit of work the job system schedules.
///
/// Jobs are owned by the system from the moment they are pushed; workers get
/// exclusive access while operating on them and can downcast to the concrete
/// type with `downcast_mut`.
///
/// # Example
///
/// ```rust
/// use depot_jobs::{Job, JobKind};
///
/// const COMPILE: JobKind = JobKind::new(1, "compile");
///
/// #[derive(Debug)]
/// struct Compile {
///     unit: String,
/// }
///
/// impl Job for Compile {
///     fn kind(&self) -> JobKind {
///         COMPILE
///     }
/// }
/// ```
pub trait Job: AsAny + Send + fmt::Debug {
    /// Selects the worker for this job.
    fn kind(&self) -> JobKind;

    /// Priority jobs are dispatched before all regular jobs.
    fn priority(&self) -> bool {
        false
    }

    /// Metadata forwarded to reporters.
    fn tags(&self) -> JobTags {
        JobTags::new()
    }

    /// Consulted when this job fails and retries remain.
    fn retry_job(&self) -> Retry {
        Retry::Same
    }

    /// Consulted once retries are exhausted or skipped.
    fn backup_job(&self) -> Option<Box<dyn Job>> {
        None
    }

    /// Jobs that run after this one completes, as its children.
    ///
    /// Called once, when the job is packaged.
    fn take_after_jobs(&mut self) -> Vec<Box<dyn Job>> {
        Vec::new()
    }
}

impl<'a> dyn Job + 'a {
    /// Returns true if the job is a `T`.
    pub fn is<T: Job>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Returns the job as a `T`, if it is one.
    pub fn downcast_ref<T: Job>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Returns the job as a mutable `T`, if it is one.
    pub fn downcast_mut<T: Job>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Like [`downcast_mut`](Self::downcast_mut), but fails with
    /// [`JobError::UnexpectedJob`] for use with `?` inside a worker.
    pub fn expect_mut<T: Job>(&mut self) -> JobResult<&mut T> {
        let actual = self.kind();
        self.as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| JobError::UnexpectedJob {
                expected: std::any::type_name::<T>(),
                actual: actual.to_string(),
            })
    }
}

/// Snapshot of a scheduled job, handed to progress reporters.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    /// Package this job runs in.
    pub package_id: PackageId,
    /// Job kind.
    pub kind: JobKind,
    /// Debug rendering of the job.
    pub label: String,
    /// Job tags.
    pub tags: JobTags,
    /// Whether the job was queued ahead of regular jobs.
    pub priority: bool,
    /// Failed attempts before this one.
    pub tries: u32,
    /// When the job was packaged.
    pub enqueued_at: DateTime<Utc>,
}

impl JobInfo {
    pub(crate) fn capture(package_id: PackageId, job: &dyn Job, tries: u32) -> Self {
        Self {
            package_id,
            kind: job.kind(),
            label: format!("{:?}", job),
            tags: job.tags(),
            priority: job.priority(),
            tries,
            enqueued_at: Utc::now(),
        }
    }
}

impl fmt::Display for JobInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.label, self.package_id)
    }
}

/// Lifecycle state carried by a scheduler notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Started,
    Completed,
    Cancelled,
    Errored,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Started => write!(f, "started"),
            JobState::Completed => write!(f, "completed"),
            JobState::Cancelled => write!(f, "cancelled"),
            JobState::Errored => write!(f, "errored"),
        }
    }
}
