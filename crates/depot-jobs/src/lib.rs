//! Depot Jobs - In-Process Job Execution Engine
//!
//! Runs a dynamic graph of jobs to quiescence:
//! - Jobs are typed by a [`JobKind`] and dispatched to the registered [`Worker`]
//! - Workers return follow-up jobs, which join the run as children
//! - Failed jobs are retried, then replaced by their backup job
//! - Cycle detection over each job's ancestry
//! - Stall detection with an optional [`ActivityTracker`] heartbeat
//! - Cooperative cancellation, also triggered by interfering OS signals
//! - Fail policies deciding what an unhandled error does to the run
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                     Depot Jobs Architecture                    │
//! ├────────────────────────────────────────────────────────────────┤
//! │                                                                │
//! │  push_jobs                                                     │
//! │     │                                                          │
//! │     ▼                                                          │
//! │  ┌──────────────────────────────────────────────────────┐      │
//! │  │                   Pending Queue                      │      │
//! │  │   ┌────────────┐  ┌──────────────────────────┐       │      │
//! │  │   │  Priority  │  │         Regular          │       │      │
//! │  │   └─────┬──────┘  └────────────┬─────────────┘       │      │
//! │  │         └───────────┬──────────┘    Lineage          │      │
//! │  └─────────────────────┼────────────────────────────────┘      │
//! │                        │ cycle check                           │
//! │                        ▼                                       │
//! │  ┌──────────────────────────────────────────────────────┐      │
//! │  │       Units of work (blocking pool or inline)        │      │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐             │      │
//! │  │   │ Worker 1 │ │ Worker 2 │ │ Worker N │             │      │
//! │  │   └────┬─────┘ └────┬─────┘ └────┬─────┘             │      │
//! │  └────────┼────────────┼────────────┼───────────────────┘      │
//! │           └────────────┼────────────┘                          │
//! │                        ▼ notifications                         │
//! │  ┌──────────────────────────────────────────────────────┐      │
//! │  │                 Scheduling thread                    │      │
//! │  │  follow-ups ─► queue    retries ─► queue             │      │
//! │  │  reporter callbacks     unhandled errors             │      │
//! │  └──────────────────────────────────────────────────────┘      │
//! │                                                                │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use depot_jobs::prelude::*;
//!
//! const FETCH: JobKind = JobKind::new(1, "fetch");
//! const INDEX: JobKind = JobKind::new(2, "index");
//!
//! #[derive(Debug)]
//! struct Fetch {
//!     url: String,
//! }
//!
//! impl Job for Fetch {
//!     fn kind(&self) -> JobKind {
//!         FETCH
//!     }
//! }
//!
//! #[derive(Debug)]
//! struct Index;
//!
//! impl Job for Index {
//!     fn kind(&self) -> JobKind {
//!         INDEX
//!     }
//! }
//!
//! fn fetch(job: &mut dyn Job, ctx: &JobContext) -> WorkResult {
//!     let job = job.expect_mut::<Fetch>()?;
//!     ctx.outputs().put(&job.url, &"fetched")?;
//!     Ok(vec![Box::new(Index)])
//! }
//!
//! fn index(_job: &mut dyn Job, _ctx: &JobContext) -> WorkResult {
//!     Ok(Vec::new())
//! }
//!
//! # fn main() -> JobResult<()> {
//! let system = JobSystem::new(JobSystemConfig::default().with_threads(4));
//! system.register_worker(FETCH, fetch)?;
//! system.register_worker(INDEX, index)?;
//!
//! system.push_job(Fetch { url: "https://example.com/a".to_string() })?;
//! system.execute_jobs()?;
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod config;
pub mod context;
pub mod error;
mod execution;
pub mod job;
pub mod metrics;
mod notification;
pub mod outputs;
pub mod package;
pub mod reporter;
mod retry;
mod signals;
pub mod system;
pub mod worker;
pub mod worker_registry;

pub use activity::ActivityTracker;
pub use config::{FailPolicy, InterferingSignal, JobSystemConfig};
pub use context::JobContext;
pub use error::{JobError, JobResult};
pub use job::{Job, JobInfo, JobKind, JobState, JobTags, Retry, TagValue};
pub use metrics::{register_metrics, JobMetrics, RunMetrics};
pub use outputs::JobOutputs;
pub use package::PackageId;
pub use reporter::{NullReporter, ProgressReporter, TracingReporter};
pub use system::{JobSystem, JobSystemBuilder};
pub use worker::{WorkResult, Worker};
pub use worker_registry::{WorkerInfo, WorkerRegistry};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::job::{Job, JobKind, Retry};
    pub use crate::worker::{WorkResult, Worker};
    pub use crate::{
        ActivityTracker, FailPolicy, JobContext, JobError, JobResult, JobSystem, JobSystemConfig,
        ProgressReporter,
    };
}
