//! Common test infrastructure for job system integration tests.
//!
//! Provides a reporter that records every lifecycle event, a handful of
//! scripted jobs and the workers that run them.

#![allow(dead_code)]

use depot_core::telemetry::{init_tracing, TelemetryConfig};
use depot_jobs::{
    Job, JobContext, JobError, JobInfo, JobKind, JobSystem, JobSystemConfig, JobTags,
    ProgressReporter, Retry, WorkResult, Worker,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

pub const STEP: JobKind = JobKind::new(1, "step");
pub const FLAKY: JobKind = JobKind::new(2, "flaky");
pub const PING: JobKind = JobKind::new(3, "ping");
pub const PONG: JobKind = JobKind::new(4, "pong");
pub const UNREGISTERED: JobKind = JobKind::new(99, "unregistered");

/// Lifecycle event seen by a [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started(String),
    Completed { job: String, follow_ups: Vec<String> },
    Cancelled(Vec<String>),
    Failed { job: String, code: &'static str },
    Retried { job: String, retry: String, tries: u32 },
}

/// Name of a job as reported; the `name` tag, or its label.
pub fn name_of(info: &JobInfo) -> String {
    info.tags
        .get("name")
        .map_or_else(|| info.label.clone(), ToString::to_string)
}

/// Reporter that records every event it receives.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<Event>>,
    work_in_progress: AtomicUsize,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.collect(|e| match e {
            Event::Started(job) => vec![job.clone()],
            _ => vec![],
        })
    }

    pub fn completed(&self) -> Vec<String> {
        self.collect(|e| match e {
            Event::Completed { job, .. } => vec![job.clone()],
            _ => vec![],
        })
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.collect(|e| match e {
            Event::Cancelled(jobs) => jobs.clone(),
            _ => vec![],
        })
    }

    pub fn failed(&self) -> Vec<String> {
        self.collect(|e| match e {
            Event::Failed { job, .. } => vec![job.clone()],
            _ => vec![],
        })
    }

    pub fn failure_codes(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Failed { code, .. } => Some(*code),
                _ => None,
            })
            .collect()
    }

    pub fn retried(&self) -> Vec<String> {
        self.collect(|e| match e {
            Event::Retried { job, .. } => vec![job.clone()],
            _ => vec![],
        })
    }

    pub fn work_in_progress(&self) -> usize {
        self.work_in_progress.load(Ordering::SeqCst)
    }

    fn collect(&self, pick: impl Fn(&Event) -> Vec<String>) -> Vec<String> {
        self.events.lock().iter().flat_map(pick).collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl ProgressReporter for RecordingReporter {
    fn notify_job_started(&self, job: &JobInfo) -> anyhow::Result<()> {
        self.push(Event::Started(name_of(job)));
        Ok(())
    }

    fn notify_work_in_progress(&self) -> anyhow::Result<()> {
        self.work_in_progress.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn notify_jobs_cancelled(&self, jobs: &[JobInfo]) -> anyhow::Result<()> {
        self.push(Event::Cancelled(jobs.iter().map(name_of).collect()));
        Ok(())
    }

    fn notify_job_completed(&self, job: &JobInfo, follow_ups: &[JobInfo]) -> anyhow::Result<()> {
        self.push(Event::Completed {
            job: name_of(job),
            follow_ups: follow_ups.iter().map(name_of).collect(),
        });
        Ok(())
    }

    fn notify_job_failed(&self, job: &JobInfo, error: &JobError) -> anyhow::Result<()> {
        self.push(Event::Failed {
            job: name_of(job),
            code: error.error_code(),
        });
        Ok(())
    }

    fn notify_job_retried(&self, job: &JobInfo, retry: &JobInfo, _error: &JobError) -> anyhow::Result<()> {
        self.push(Event::Retried {
            job: name_of(job),
            retry: name_of(retry),
            tries: retry.tries,
        });
        Ok(())
    }
}

/// Order in which jobs ran, shared between the test and its workers.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, name: &str) {
        self.0.lock().push(name.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn sorted(&self) -> Vec<String> {
        let mut entries = self.entries();
        entries.sort();
        entries
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.lock().iter().any(|e| e == name)
    }
}

fn name_tags(name: &str) -> JobTags {
    let mut tags = JobTags::new();
    tags.insert("name".to_string(), name.into());
    tags
}

/// What a [`Step`] does besides recording itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Action {
    #[default]
    Nothing,
    /// Cancel the run.
    Cancel,
    /// Run the same system again from inside the worker.
    Reenter,
    /// Wait, one tick or sleep at a time, until the named job ran.
    AwaitJournal(&'static str),
    /// Sleep before finishing.
    Sleep(Duration),
    /// Panic inside the worker.
    Panic,
}

/// Job run by [`StepWorker`]; records its name and returns its children.
#[derive(Debug, Default)]
pub struct Step {
    pub name: String,
    pub urgent: bool,
    pub action: Action,
    pub children: Vec<Box<dyn Job>>,
    pub after: Vec<Box<dyn Job>>,
    pub rendezvous: Option<Arc<Rendezvous>>,
}

impl Step {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn child(mut self, job: impl Job) -> Self {
        self.children.push(Box::new(job));
        self
    }

    pub fn then(mut self, job: impl Job) -> Self {
        self.after.push(Box::new(job));
        self
    }

    pub fn meet(mut self, rendezvous: &Arc<Rendezvous>) -> Self {
        self.rendezvous = Some(Arc::clone(rendezvous));
        self
    }
}

impl Job for Step {
    fn kind(&self) -> JobKind {
        STEP
    }

    fn priority(&self) -> bool {
        self.urgent
    }

    fn tags(&self) -> JobTags {
        name_tags(&self.name)
    }

    fn take_after_jobs(&mut self) -> Vec<Box<dyn Job>> {
        std::mem::take(&mut self.after)
    }
}

/// Worker for [`Step`] jobs.
#[derive(Debug, Clone, Default)]
pub struct StepWorker {
    pub journal: Journal,
    pub reporter: Option<Arc<RecordingReporter>>,
}

impl Worker for StepWorker {
    fn operate_on(&self, job: &mut dyn Job, ctx: &JobContext) -> WorkResult {
        let step = job.expect_mut::<Step>()?;

        if let Some(rendezvous) = &step.rendezvous {
            if !rendezvous.arrive_and_wait(Duration::from_secs(5)) {
                return Err(JobError::failed(format!("{}: rendezvous timed out", step.name)));
            }
        }

        match step.action {
            Action::Nothing => {}
            Action::Cancel => ctx.cancel_pending_jobs(),
            Action::Reenter => ctx.system().execute_jobs()?,
            Action::AwaitJournal(name) => {
                let deadline = Instant::now() + Duration::from_secs(5);
                while !self.journal.contains(name) {
                    if Instant::now() > deadline {
                        return Err(JobError::failed(format!("{} never ran", name)));
                    }
                    ctx.wait_for_other_jobs(Duration::from_millis(1))?;
                }
            }
            Action::Sleep(duration) => std::thread::sleep(duration),
            Action::Panic => panic!("{} exploded", step.name),
        }

        self.journal.record(&step.name);
        Ok(std::mem::take(&mut step.children))
    }

    fn reporter(&self) -> Option<Arc<dyn ProgressReporter>> {
        self.reporter
            .as_ref()
            .map(|r| Arc::clone(r) as Arc<dyn ProgressReporter>)
    }
}

/// Job that fails a scripted number of times before succeeding.
#[derive(Debug)]
pub struct Flaky {
    pub name: String,
    pub failures: u32,
    pub skip_retries: bool,
    pub backup_failures: Option<u32>,
    pub backup_kind: JobKind,
    pub after: Vec<Box<dyn Job>>,
}

impl Flaky {
    pub fn new(name: &str, failures: u32) -> Self {
        Self {
            name: name.to_string(),
            failures,
            skip_retries: false,
            backup_failures: None,
            backup_kind: FLAKY,
            after: Vec::new(),
        }
    }

    pub fn always_failing(name: &str) -> Self {
        Self::new(name, u32::MAX)
    }

    pub fn with_backup(mut self, failures: u32) -> Self {
        self.backup_failures = Some(failures);
        self
    }

    pub fn with_backup_kind(mut self, kind: JobKind) -> Self {
        self.backup_kind = kind;
        self
    }

    pub fn skipping_retries(mut self) -> Self {
        self.skip_retries = true;
        self
    }

    pub fn then(mut self, job: impl Job) -> Self {
        self.after.push(Box::new(job));
        self
    }
}

/// Backup jobs report under a kind of their own choosing.
#[derive(Debug)]
struct Backup(Flaky);

impl Job for Flaky {
    fn kind(&self) -> JobKind {
        FLAKY
    }

    fn tags(&self) -> JobTags {
        name_tags(&self.name)
    }

    fn retry_job(&self) -> Retry {
        if self.skip_retries {
            Retry::Skip
        } else {
            Retry::Same
        }
    }

    fn backup_job(&self) -> Option<Box<dyn Job>> {
        let failures = self.backup_failures?;
        let backup = Flaky::new(&format!("{}-backup", self.name), failures);
        if self.backup_kind == FLAKY {
            Some(Box::new(backup))
        } else {
            Some(Box::new(Backup(backup.with_backup_kind(self.backup_kind))))
        }
    }

    fn take_after_jobs(&mut self) -> Vec<Box<dyn Job>> {
        std::mem::take(&mut self.after)
    }
}

impl Job for Backup {
    fn kind(&self) -> JobKind {
        self.0.backup_kind
    }

    fn tags(&self) -> JobTags {
        self.0.tags()
    }
}

/// Fails while the job has failures left; records the attempt it
/// succeeded on under the job's name.
pub fn run_flaky(job: &mut dyn Job, ctx: &JobContext) -> WorkResult {
    let flaky = job.expect_mut::<Flaky>()?;
    if flaky.failures > 0 {
        flaky.failures -= 1;
        return Err(JobError::failed(format!("{} failed", flaky.name)));
    }
    ctx.outputs().put(&flaky.name, &ctx.tries())?;
    Ok(Vec::new())
}

/// Job alternating between two kinds until `remaining` reaches one.
#[derive(Debug)]
pub struct Bounce {
    pub kind: JobKind,
    pub remaining: u32,
}

impl Bounce {
    /// A chain of `length` jobs starting with a ping.
    pub fn chain(length: u32) -> Self {
        Self {
            kind: PING,
            remaining: length,
        }
    }
}

impl Job for Bounce {
    fn kind(&self) -> JobKind {
        self.kind
    }

    fn tags(&self) -> JobTags {
        name_tags(&format!("{}-{}", self.kind.name(), self.remaining))
    }
}

pub fn run_bounce(job: &mut dyn Job, _ctx: &JobContext) -> WorkResult {
    let bounce = job.expect_mut::<Bounce>()?;
    if bounce.remaining <= 1 {
        return Ok(Vec::new());
    }
    let next = if bounce.kind == PING { PONG } else { PING };
    Ok(vec![Box::new(Bounce {
        kind: next,
        remaining: bounce.remaining - 1,
    })])
}

/// Lets a fixed number of jobs wait for each other.
#[derive(Debug)]
pub struct Rendezvous {
    expected: usize,
    arrived: AtomicUsize,
}

impl Rendezvous {
    pub fn new(expected: usize) -> Arc<Self> {
        Arc::new(Self {
            expected,
            arrived: AtomicUsize::new(0),
        })
    }

    /// Returns false if the others did not arrive within `timeout`.
    pub fn arrive_and_wait(&self, timeout: Duration) -> bool {
        self.arrived.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + timeout;
        while self.arrived.load(Ordering::SeqCst) < self.expected {
            if Instant::now() > deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

static LOGGING: Once = Once::new();

/// Installs a warn-level subscriber once per test binary.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let config = TelemetryConfig {
            log_filter: "warn".to_string(),
            ..TelemetryConfig::default()
        };
        // another harness may own the global subscriber already
        let _ = init_tracing(&config);
    });
}

/// A system with workers for every job in this module.
pub fn system_with(config: JobSystemConfig, reporter: &Arc<RecordingReporter>) -> (JobSystem, Journal) {
    let system = JobSystem::builder(config)
        .reporter(Arc::clone(reporter) as Arc<dyn ProgressReporter>)
        .build();
    let journal = register_all(&system);
    (system, journal)
}

/// Registers the workers for every job in this module.
pub fn register_all(system: &JobSystem) -> Journal {
    init_logging();
    let journal = Journal::default();
    system
        .register_worker(
            STEP,
            StepWorker {
                journal: journal.clone(),
                reporter: None,
            },
        )
        .unwrap();
    system.register_worker(FLAKY, run_flaky).unwrap();
    system.register_worker(PING, run_bounce).unwrap();
    system.register_worker(PONG, run_bounce).unwrap();
    journal
}

/// Single-threaded configuration with a short channel wait.
pub fn single() -> JobSystemConfig {
    JobSystemConfig::single_threaded().with_wait_time(Duration::from_millis(5))
}

/// Threaded configuration with a short channel wait.
pub fn threaded(threads: usize) -> JobSystemConfig {
    JobSystemConfig::default()
        .with_threads(threads)
        .with_wait_time(Duration::from_millis(5))
}

/// Both execution strategies, for tests that must hold under each.
pub fn both_modes() -> [JobSystemConfig; 2] {
    [single(), threaded(4)]
}
