//! The job system: registration, queueing and run state.

use crate::activity::ActivityTracker;
use crate::config::{InterferingSignal, JobSystemConfig};
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobInfo, JobKind};
use crate::metrics::JobMetrics;
use crate::notification::NotificationChannel;
use crate::outputs::JobOutputs;
use crate::package::{JobPackage, LineageId, PackageId, PendingQueue};
use crate::reporter::{NullReporter, ProgressReporter};
use crate::worker::Worker;
use crate::worker_registry::WorkerRegistry;
use depot_config::JobsSettings;
use depot_core::RunId;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// A unit of work currently inside `operate_on`.
#[derive(Debug)]
pub(crate) struct ActiveUnit {
    pub label: String,
    pub kind: JobKind,
    pub thread: String,
    pub started: Instant,
}

/// State that only exists while a run executes.
pub(crate) struct RunContext {
    pub id: RunId,
    pub channel: NotificationChannel,
    pub threaded: bool,
}

pub(crate) struct Shared {
    pub config: JobSystemConfig,
    pub reporter: Arc<dyn ProgressReporter>,
    pub activity: Option<ActivityTracker>,
    pub workers: WorkerRegistry,
    pub signals: RwLock<Vec<InterferingSignal>>,
    pub executing: Mutex<bool>,
    pub cancelled: AtomicBool,
    pub timed_out: AtomicBool,
    pub pending: AtomicUsize,
    pub queue: Mutex<PendingQueue>,
    pub run: Mutex<Option<Arc<RunContext>>>,
    pub deadline: Mutex<Option<Instant>>,
    pub unhandled: Mutex<Vec<Arc<JobError>>>,
    pub cancelled_jobs: Mutex<Vec<Box<dyn Job>>>,
    pub active: Mutex<BTreeMap<PackageId, ActiveUnit>>,
    pub interrupted: Mutex<Option<InterferingSignal>>,
    pub outputs: JobOutputs,
    pub next_package_id: AtomicU64,
}

/// Builder for [`JobSystem`].
pub struct JobSystemBuilder {
    config: JobSystemConfig,
    reporter: Option<Arc<dyn ProgressReporter>>,
    activity: Option<ActivityTracker>,
}

impl JobSystemBuilder {
    /// Sets the default progress reporter.
    pub fn reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Sets the activity tracker consulted by the stall check.
    pub fn activity_tracker(mut self, tracker: ActivityTracker) -> Self {
        self.activity = Some(tracker);
        self
    }

    /// Builds the job system.
    pub fn build(self) -> JobSystem {
        let signals = self.config.interfering_signals.clone();
        JobSystem {
            shared: Arc::new(Shared {
                config: self.config,
                reporter: self.reporter.unwrap_or_else(|| Arc::new(NullReporter)),
                activity: self.activity,
                workers: WorkerRegistry::new(),
                signals: RwLock::new(signals),
                executing: Mutex::new(false),
                cancelled: AtomicBool::new(false),
                timed_out: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                queue: Mutex::new(PendingQueue::default()),
                run: Mutex::new(None),
                deadline: Mutex::new(None),
                unhandled: Mutex::new(Vec::new()),
                cancelled_jobs: Mutex::new(Vec::new()),
                active: Mutex::new(BTreeMap::new()),
                interrupted: Mutex::new(None),
                outputs: JobOutputs::new(),
                next_package_id: AtomicU64::new(0),
            }),
        }
    }
}

/// Schedules jobs onto their workers and runs them to quiescence.
///
/// `JobSystem` is a cheap handle; clones share the same queue, workers and
/// run state. Workers reach it through [`JobContext::system`].
///
/// # Example
///
/// ```rust,no_run
/// use depot_jobs::prelude::*;
///
/// const HELLO: JobKind = JobKind::new(1, "hello");
///
/// #[derive(Debug)]
/// struct Hello;
///
/// impl Job for Hello {
///     fn kind(&self) -> JobKind {
///         HELLO
///     }
/// }
///
/// fn greet(_job: &mut dyn Job, _ctx: &JobContext) -> WorkResult {
///     Ok(Vec::new())
/// }
///
/// # fn main() -> JobResult<()> {
/// let system = JobSystem::new(JobSystemConfig::single_threaded());
/// system.register_worker(HELLO, greet)?;
/// system.push_job(Hello)?;
/// system.execute_jobs()?;
/// # Ok(())
/// # }
/// ```
///
/// [`JobContext::system`]: crate::JobContext::system
#[derive(Clone)]
pub struct JobSystem {
    pub(crate) shared: Arc<Shared>,
}

impl JobSystem {
    /// Creates a job system with the default [`NullReporter`].
    pub fn new(config: JobSystemConfig) -> Self {
        Self::builder(config).build()
    }

    /// Creates a job system from loaded settings.
    pub fn from_settings(settings: &JobsSettings) -> Self {
        Self::new(JobSystemConfig::from(settings))
    }

    /// Starts building a job system.
    pub fn builder(config: JobSystemConfig) -> JobSystemBuilder {
        JobSystemBuilder {
            config,
            reporter: None,
            activity: None,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &JobSystemConfig {
        &self.shared.config
    }

    /// Outputs of the current or last run.
    pub fn outputs(&self) -> &JobOutputs {
        &self.shared.outputs
    }

    /// Returns the activity tracker, if one was configured.
    pub fn activity_tracker(&self) -> Option<&ActivityTracker> {
        self.shared.activity.as_ref()
    }

    /// Returns the worker registry.
    pub fn workers(&self) -> &WorkerRegistry {
        &self.shared.workers
    }

    // ---- registration -----------------------------------------------------

    /// Registers the worker for a job kind.
    pub fn register_worker<W: Worker + 'static>(&self, kind: JobKind, worker: W) -> JobResult<()> {
        self.register_shared_worker(kind, Arc::new(worker))
    }

    /// Registers a worker that is shared with other owners.
    pub fn register_shared_worker(&self, kind: JobKind, worker: Arc<dyn Worker>) -> JobResult<()> {
        if self.is_executing_jobs() {
            return Err(JobError::CantRegisterWorker(format!(
                "{}: jobs are being executed",
                kind
            )));
        }
        self.shared.workers.register(kind, worker);
        Ok(())
    }

    /// Registers several workers.
    pub fn register_workers(
        &self,
        workers: impl IntoIterator<Item = (JobKind, Arc<dyn Worker>)>,
    ) -> JobResult<()> {
        if self.is_executing_jobs() {
            return Err(JobError::CantRegisterWorker(
                "jobs are being executed".to_string(),
            ));
        }
        for (kind, worker) in workers {
            self.shared.workers.register(kind, worker);
        }
        Ok(())
    }

    /// Replaces the signals that cancel a run.
    pub fn set_interfering_signals(&self, signals: Vec<InterferingSignal>) -> JobResult<()> {
        if self.is_executing_jobs() {
            return Err(JobError::CantSetSignals(
                "jobs are being executed".to_string(),
            ));
        }
        *self.shared.signals.write() = signals;
        Ok(())
    }

    /// Returns the signals that cancel a run.
    pub fn interfering_signals(&self) -> Vec<InterferingSignal> {
        self.shared.signals.read().clone()
    }

    // ---- queueing ---------------------------------------------------------

    /// Pushes a root job.
    pub fn push_job<J: Job>(&self, job: J) -> JobResult<()> {
        self.push_jobs(vec![Box::new(job) as Box<dyn Job>])
    }

    /// Pushes a boxed root job.
    pub fn push_boxed_job(&self, job: Box<dyn Job>) -> JobResult<()> {
        self.push_jobs(vec![job])
    }

    /// Pushes root jobs in order.
    ///
    /// Nothing is enqueued if any job lacks a worker.
    pub fn push_jobs(&self, jobs: Vec<Box<dyn Job>>) -> JobResult<()> {
        if self.is_executing_jobs() {
            return Err(JobError::CantPushJobs(
                "jobs are being executed".to_string(),
            ));
        }

        let mut resolved = Vec::with_capacity(jobs.len());
        for job in jobs {
            let kind = job.kind();
            let worker = self
                .shared
                .workers
                .get(kind)
                .ok_or_else(|| JobError::CantPushJobs(format!("no worker registered for {}", kind)))?;
            resolved.push((job, worker));
        }

        for (job, worker) in resolved {
            let kind = job.kind();
            let package = self.package(job, worker, None, 0, Vec::new());
            self.enqueue(package, true);
            JobMetrics::job_pushed(kind);
        }
        Ok(())
    }

    // ---- control ----------------------------------------------------------

    /// Cancels the run: queued jobs are dropped into the cancelled list and
    /// no new branches start. Work already inside a worker finishes.
    ///
    /// Safe to call from any thread; it only sets a flag.
    pub fn cancel_pending_jobs(&self) {
        if !self.shared.cancelled.swap(true, Ordering::SeqCst) {
            info!(pending = self.pending_jobs_amount(), "Cancelling pending jobs");
        }
    }

    // ---- introspection ----------------------------------------------------

    /// Returns true while `execute_jobs` runs.
    pub fn is_executing_jobs(&self) -> bool {
        *self.shared.executing.lock()
    }

    /// Returns true once the current or last run was cancelled.
    pub fn are_jobs_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Returns true if the current or last run stalled.
    pub fn timed_out(&self) -> bool {
        self.shared.timed_out.load(Ordering::SeqCst)
    }

    /// Jobs that are queued, running or waiting to be retried.
    pub fn pending_jobs_amount(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Jobs waiting in the queue.
    pub fn queued_jobs_amount(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Unhandled errors of the current or last run, oldest first.
    pub fn get_unhandled_exceptions(&self) -> Vec<Arc<JobError>> {
        self.shared.unhandled.lock().clone()
    }

    /// Takes the jobs cancelled in the current or last run.
    pub fn take_cancelled_jobs(&self) -> Vec<Box<dyn Job>> {
        std::mem::take(&mut *self.shared.cancelled_jobs.lock())
    }

    /// Number of jobs cancelled in the current or last run and not taken.
    pub fn cancelled_jobs_amount(&self) -> usize {
        self.shared.cancelled_jobs.lock().len()
    }

    /// Signal that interrupted the last run, if any.
    pub fn interrupted_by(&self) -> Option<InterferingSignal> {
        *self.shared.interrupted.lock()
    }

    // ---- internals --------------------------------------------------------

    pub(crate) fn current_run(&self) -> Option<Arc<RunContext>> {
        self.shared.run.lock().clone()
    }

    pub(crate) fn resolve_worker(&self, kind: JobKind) -> JobResult<Arc<dyn Worker>> {
        self.shared
            .workers
            .get(kind)
            .ok_or(JobError::NoWorkerRegistered(kind))
    }

    /// Wraps a job into a package, taking its after-jobs behind `carried`.
    pub(crate) fn package(
        &self,
        mut job: Box<dyn Job>,
        worker: Arc<dyn Worker>,
        parent: Option<LineageId>,
        tries: u32,
        carried: Vec<Box<dyn Job>>,
    ) -> JobPackage {
        let mut next_jobs = carried;
        next_jobs.extend(job.take_after_jobs());

        let id = PackageId::new(self.shared.next_package_id.fetch_add(1, Ordering::Relaxed) + 1);
        let info = JobInfo::capture(id, job.as_ref(), tries);
        let lineage = self.shared.queue.lock().lineage.add(info.kind, parent);

        JobPackage {
            id,
            job,
            worker,
            tries,
            lineage,
            next_jobs,
            info,
        }
    }

    /// Snapshot of a job that never got a package.
    pub(crate) fn detached_info(&self, job: &dyn Job) -> JobInfo {
        let id = PackageId::new(self.shared.next_package_id.fetch_add(1, Ordering::Relaxed) + 1);
        JobInfo::capture(id, job, 0)
    }

    /// Queues a package; `counted` is false for retry and backup packages,
    /// which replace one that is already pending.
    pub(crate) fn enqueue(&self, package: JobPackage, counted: bool) {
        self.shared.queue.lock().push(package);
        if counted {
            let pending = self.shared.pending.fetch_add(1, Ordering::SeqCst) + 1;
            JobMetrics::set_pending(pending);
        }
    }

    pub(crate) fn decrement_pending(&self) {
        let previous = self
            .shared
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match previous {
            Ok(n) => JobMetrics::set_pending(n - 1),
            Err(_) => warn!("Pending job counter already at zero"),
        }
    }

    /// Records an unhandled error of the run; cancels the run unless the
    /// policy tolerates faults.
    pub(crate) fn record_unhandled(&self, err: JobError) -> Arc<JobError> {
        error!(error_code = err.error_code(), error = %err, "Unhandled job error");
        JobMetrics::unhandled_error(err.error_code());
        let err = Arc::new(err);
        self.shared.unhandled.lock().push(Arc::clone(&err));
        if self.config().fail_policy.cancels_on_error() {
            self.cancel_pending_jobs();
        }
        err
    }

    /// First unhandled error if the run must stop right now.
    pub(crate) fn fail_fast_error(&self) -> Option<JobError> {
        if !self.config().fail_policy.is_fail_fast() {
            return None;
        }
        self.shared
            .unhandled
            .lock()
            .first()
            .map(|first| JobError::Unhandled(Arc::clone(first)))
    }

    /// Calls the reporter of `worker`, or the default one; a failing
    /// callback becomes an unhandled error.
    pub(crate) fn report<F>(&self, worker: Option<&Arc<dyn Worker>>, subject: &str, call: F)
    where
        F: FnOnce(&dyn ProgressReporter) -> anyhow::Result<()>,
    {
        let reporter = worker
            .and_then(|w| w.reporter())
            .unwrap_or_else(|| Arc::clone(&self.shared.reporter));

        if let Err(e) = call(reporter.as_ref()) {
            warn!(subject = %subject, error = %e, "Progress reporter failed");
            self.record_unhandled(JobError::Reporter(format!("{}: {:#}", subject, e)));
        }
    }

    /// Clears everything left over from the previous run.
    pub(crate) fn reset_run_state(&self) {
        let shared = &self.shared;
        shared.cancelled.store(false, Ordering::SeqCst);
        shared.timed_out.store(false, Ordering::SeqCst);
        shared.unhandled.lock().clear();
        shared.cancelled_jobs.lock().clear();
        shared.active.lock().clear();
        *shared.interrupted.lock() = None;
        shared.outputs.clear();

        let queued = shared.queue.lock().len();
        shared.pending.store(queued, Ordering::SeqCst);
        JobMetrics::set_pending(queued);
    }

    /// Pushes the stall deadline out by `max_timeout` from now.
    pub(crate) fn touch_clock(&self) {
        if let Some(max_timeout) = self.config().max_timeout {
            *self.shared.deadline.lock() = Instant::now().checked_add(max_timeout);
        }
    }
}

impl std::fmt::Debug for JobSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSystem")
            .field("config", self.config())
            .field("workers", &self.shared.workers.kinds())
            .field("pending", &self.pending_jobs_amount())
            .field("executing", &self.is_executing_jobs())
            .finish_non_exhaustive()
    }
}
