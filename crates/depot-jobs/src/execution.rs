//! The run loop.
//!
//! `execute_jobs` drives the queued packages, and every package they spawn,
//! to quiescence. With more than one thread, units of work run on the
//! blocking pool of a per-run tokio runtime while the calling thread
//! schedules. With one thread, the calling thread does both, one package per
//! tick.
//!
//! Units never mutate scheduler state. Every consequence of a unit (follow-up
//! jobs, retries, cancellation, failure) is applied by the scheduling thread
//! when it drains the run's notification channel.

use crate::config::InterferingSignal;
use crate::context::JobContext;
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobInfo};
use crate::metrics::{JobMetrics, RunMetrics};
use crate::notification::{Notification, NotificationChannel, NotificationSender};
use crate::package::JobPackage;
use crate::retry::{self, Recovery};
use crate::signals::SignalGuard;
use crate::system::{ActiveUnit, JobSystem, RunContext};
use crate::worker::Worker;
use depot_core::RunId;
use futures::future::join_all;
use parking_lot::Mutex;
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, error, info, info_span, warn};

/// A unit of work submitted to the blocking pool.
struct InFlight {
    info: JobInfo,
    handle: JoinHandle<()>,
}

/// A failed package on its way to retry, backup or terminal failure.
struct Failure {
    info: JobInfo,
    worker: Arc<dyn Worker>,
    next_jobs: Vec<Box<dyn Job>>,
    error: JobError,
}

/// Holds the executing flag for the duration of a run.
struct ExecutionGuard<'a> {
    executing: &'a Mutex<bool>,
}

impl<'a> ExecutionGuard<'a> {
    fn acquire(executing: &'a Mutex<bool>) -> JobResult<Self> {
        let mut flag = executing.lock();
        if *flag {
            return Err(JobError::CantExecuteJobs(
                "jobs are already being executed".to_string(),
            ));
        }
        *flag = true;
        Ok(Self { executing })
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        *self.executing.lock() = false;
    }
}

impl JobSystem {
    /// Runs every queued job, and every job they spawn, to completion.
    ///
    /// Returns once nothing is pending, or once a cancelled run has wound
    /// down. The result follows the fail policy: `FailFast` fails a job on its
    /// first error, without retries, and returns that error right away.
    /// `FailGracefully` returns the first unhandled error at the end and
    /// `FaultTolerant` always returns `Ok`. A run interrupted by one of the
    /// interfering signals returns [`JobError::Interrupted`].
    ///
    /// Blocks the calling thread.
    ///
    /// # Errors
    ///
    /// [`JobError::CantExecuteJobs`] if a run is already executing, which
    /// includes calls from inside a worker, or if the calling thread is inside
    /// a tokio runtime. Async callers go through `std::thread::spawn`.
    pub fn execute_jobs(&self) -> JobResult<()> {
        let _guard = ExecutionGuard::acquire(&self.shared.executing)?;
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(JobError::CantExecuteJobs(
                "can't block a thread of an async runtime".to_string(),
            ));
        }
        self.reset_run_state();

        let run_id = RunId::new();
        let span = info_span!("job_run", run_id = %run_id);
        let _entered = span.enter();

        let config = self.config();
        let started = Instant::now();
        info!(
            pending = self.pending_jobs_amount(),
            threads = config.thread_count,
            fail_policy = %config.fail_policy,
            "Executing jobs"
        );

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.thread_count.max(1))
            .thread_name("depot-jobs")
            .enable_all()
            .build()
            .map_err(|e| JobError::CantExecuteJobs(format!("can't start worker pool: {}", e)))?;

        let run = Arc::new(RunContext {
            id: run_id,
            channel: NotificationChannel::new(),
            threaded: config.is_threaded(),
        });
        *self.shared.run.lock() = Some(Arc::clone(&run));

        let system = self.clone();
        let signals = SignalGuard::install(
            runtime.handle(),
            &self.interfering_signals(),
            Arc::new(move |signal| system.interrupt(signal)),
        );
        debug!(listeners = signals.len(), "Signal listeners installed");

        self.touch_clock();
        let outcome = if run.threaded {
            self.run_threaded(&run, &runtime)
        } else {
            self.run_single(&run)
        };

        drop(signals);
        *self.shared.run.lock() = None;
        if outcome.is_err() {
            // Units abandoned by a fail-fast exit finish on their own threads.
            runtime.shutdown_background();
        } else {
            drop(runtime);
        }

        let packages = {
            let mut queue = self.shared.queue.lock();
            let created = queue.lineage.len();
            queue.lineage.clear();
            created
        };

        let result = self.resolve_outcome(outcome);
        let elapsed = started.elapsed();
        let label = match &result {
            Ok(()) if self.timed_out() => "timed_out",
            Ok(()) => "completed",
            Err(JobError::Interrupted(_)) => "interrupted",
            Err(_) => "failed",
        };
        RunMetrics::run_finished(label, elapsed);
        info!(
            outcome = label,
            elapsed_ms = elapsed.as_millis() as u64,
            packages,
            unhandled = self.shared.unhandled.lock().len(),
            cancelled = self.cancelled_jobs_amount(),
            "Run finished"
        );

        result
    }

    /// Lets other jobs make progress from inside a worker.
    ///
    /// With more than one thread this sleeps for `duration`. With one thread
    /// it runs exactly one scheduler tick instead, since nothing else would.
    ///
    /// # Errors
    ///
    /// [`JobError::CantWaitWhenNotExecutingJobs`] outside of a run and
    /// [`JobError::CantWaitWhenTimedOut`] once the run stalled.
    pub fn wait_for_other_jobs(&self, duration: Duration) -> JobResult<()> {
        let run = self
            .current_run()
            .ok_or(JobError::CantWaitWhenNotExecutingJobs)?;
        if self.timed_out() {
            return Err(JobError::CantWaitWhenTimedOut);
        }

        if run.threaded {
            thread::sleep(duration);
        } else {
            self.tick(&run);
        }
        Ok(())
    }

    fn resolve_outcome(&self, outcome: JobResult<()>) -> JobResult<()> {
        if let Some(signal) = self.interrupted_by() {
            return Err(JobError::Interrupted(signal));
        }
        outcome?;

        if self.config().fail_policy.propagates_errors() {
            if let Some(first) = self.shared.unhandled.lock().first() {
                return Err(JobError::Unhandled(Arc::clone(first)));
            }
        }
        Ok(())
    }

    // ---- strategies -------------------------------------------------------

    fn run_threaded(&self, run: &RunContext, runtime: &Runtime) -> JobResult<()> {
        let wait_time = self.config().wait_time;
        let soft_cap = self.config().soft_cap();
        let mut in_flight = Vec::new();

        self.top_up(run, runtime, &mut in_flight, usize::MAX);

        while self.pending_jobs_amount() > 0 && !self.are_jobs_cancelled() {
            self.top_up(run, runtime, &mut in_flight, soft_cap);
            let received = self.drain_blocking(run, runtime, wait_time);
            self.reap_finished(runtime, &mut in_flight);
            self.check_timeout();

            if let Some(err) = self.fail_fast_error() {
                self.cancel_queued();
                return Err(err);
            }
            if received == 0 {
                self.report(None, "work in progress", |r| r.notify_work_in_progress());
            }
            if in_flight.is_empty() && self.shared.queue.lock().is_empty() {
                self.drain_pending(run);
                if self.shared.queue.lock().is_empty() {
                    self.settle_pending();
                }
            }
        }

        self.cancel_queued();
        if !in_flight.is_empty() {
            debug!(run_id = %run.id, in_flight = in_flight.len(), "Waiting for in-flight jobs");
            let (infos, handles): (Vec<_>, Vec<_>) =
                in_flight.into_iter().map(|u| (u.info, u.handle)).unzip();
            let results = runtime.block_on(join_all(handles));
            for (info, result) in infos.into_iter().zip(results) {
                if let Err(e) = result {
                    self.unit_lost(info, e.to_string());
                }
            }
        }
        JobMetrics::set_in_flight(0);
        self.drain_pending(run);

        self.fail_fast_error().map_or(Ok(()), Err)
    }

    fn run_single(&self, run: &RunContext) -> JobResult<()> {
        while self.pending_jobs_amount() > 0 && !self.are_jobs_cancelled() {
            self.tick(run);

            if let Some(err) = self.fail_fast_error() {
                self.cancel_queued();
                return Err(err);
            }
            self.report(None, "work in progress", |r| r.notify_work_in_progress());
            if self.shared.queue.lock().is_empty() {
                self.settle_pending();
            }
        }

        self.cancel_queued();
        self.drain_pending(run);

        self.fail_fast_error().map_or(Ok(()), Err)
    }

    /// Runs one package inline and applies everything it reported.
    fn tick(&self, run: &RunContext) {
        if !self.are_jobs_cancelled() {
            if let Some(package) = self.next_dispatchable() {
                self.run_unit(package, &run.channel.sender());
            }
        }
        self.drain_pending(run);
        self.check_timeout();
    }

    fn top_up(&self, run: &RunContext, runtime: &Runtime, in_flight: &mut Vec<InFlight>, cap: usize) {
        while in_flight.len() < cap && !self.are_jobs_cancelled() {
            let Some(package) = self.next_dispatchable() else {
                break;
            };

            let info = package.info.clone();
            let system = self.clone();
            let sender = run.channel.sender();
            let span = debug_span!("job_unit", package_id = %info.package_id, kind = %info.kind);
            let handle = runtime.spawn_blocking(move || span.in_scope(|| system.run_unit(package, &sender)));

            in_flight.push(InFlight { info, handle });
            JobMetrics::set_in_flight(in_flight.len());
        }
    }

    fn reap_finished(&self, runtime: &Runtime, in_flight: &mut Vec<InFlight>) {
        let mut index = 0;
        while index < in_flight.len() {
            if !in_flight[index].handle.is_finished() {
                index += 1;
                continue;
            }
            let unit = in_flight.swap_remove(index);
            if let Err(e) = runtime.block_on(unit.handle) {
                self.unit_lost(unit.info, e.to_string());
            }
        }
        JobMetrics::set_in_flight(in_flight.len());
    }

    /// Pops the next package that passes the cycle check; packages that fail
    /// it are failed on the spot.
    fn next_dispatchable(&self) -> Option<JobPackage> {
        let max_cycle = self.config().max_cycle;
        loop {
            let (package, verdict) = {
                let mut queue = self.shared.queue.lock();
                let package = queue.pop()?;
                let verdict = queue.lineage.check_cycles(package.lineage, max_cycle);
                (package, verdict)
            };

            match verdict {
                Ok(()) => return Some(package),
                Err(err) => {
                    warn!(
                        package_id = %package.id,
                        kind = %package.info.kind,
                        error = %err,
                        "Cycle detected, not running job"
                    );
                    JobMetrics::cycle_detected(package.info.kind);
                    self.fail_package(package, err);
                }
            }
        }
    }

    // ---- units of work ----------------------------------------------------

    fn run_unit(&self, mut package: JobPackage, sender: &NotificationSender) {
        if self.are_jobs_cancelled() {
            sender.send(Notification::Cancelled { package });
            return;
        }

        let thread = thread::current().name().unwrap_or("unnamed").to_string();
        self.shared.active.lock().insert(
            package.id,
            ActiveUnit {
                label: package.info.label.clone(),
                kind: package.info.kind,
                thread,
                started: Instant::now(),
            },
        );
        sender.send(Notification::Started {
            info: package.info.clone(),
            worker: Arc::clone(&package.worker),
        });

        let ctx = JobContext::new(self.clone(), &package.info);
        let worker = Arc::clone(&package.worker);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            worker.operate_on(package.job.as_mut(), &ctx)
        }));
        self.shared.active.lock().remove(&package.id);

        let notification = match outcome {
            Ok(Ok(follow_ups)) => Notification::Completed {
                package,
                follow_ups,
            },
            Ok(Err(error)) => Notification::Errored { package, error },
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(package_id = %package.id, panic = %message, "Worker panicked");
                Notification::Errored {
                    package,
                    error: JobError::WorkerPanicked(message),
                }
            }
        };
        sender.send(notification);
    }

    fn unit_lost(&self, info: JobInfo, reason: String) {
        self.shared.active.lock().remove(&info.package_id);
        let error = JobError::UnitLost {
            job: info.label.clone(),
            reason,
        };
        JobMetrics::job_failed(info.kind, error.error_code());
        let error = self.record_unhandled(error);
        self.report(None, &info.label, |r| r.notify_job_failed(&info, &error));
        self.decrement_pending();
    }

    // ---- notifications ----------------------------------------------------

    /// Waits for notifications until one that is not a start arrives or the
    /// wait times out; returns how many were handled.
    fn drain_blocking(&self, run: &RunContext, runtime: &Runtime, wait: Duration) -> usize {
        let mut received = 0;
        while let Some(notification) = run.channel.recv_timeout(runtime, wait) {
            received += 1;
            let started = matches!(notification, Notification::Started { .. });
            self.handle_notification(notification);
            if !started {
                break;
            }
        }
        received
    }

    fn drain_pending(&self, run: &RunContext) {
        while let Some(notification) = run.channel.try_recv() {
            self.handle_notification(notification);
        }
    }

    fn handle_notification(&self, notification: Notification) {
        self.touch_clock();
        match notification {
            Notification::Started { info, worker } => {
                debug!(
                    package_id = %info.package_id,
                    kind = %info.kind,
                    tries = info.tries,
                    "Job started"
                );
                JobMetrics::job_started(info.kind);
                self.report(Some(&worker), &info.label, |r| r.notify_job_started(&info));
            }
            Notification::Completed {
                package,
                follow_ups,
            } => self.complete(package, follow_ups),
            Notification::Cancelled { package } => self.cancel_packages(vec![package]),
            Notification::Errored { package, error } => self.handle_failure(package, error),
        }
    }

    fn complete(&self, package: JobPackage, follow_ups: Vec<Box<dyn Job>>) {
        let JobPackage {
            worker,
            lineage,
            next_jobs,
            info,
            ..
        } = package;
        let children: Vec<Box<dyn Job>> = follow_ups.into_iter().chain(next_jobs).collect();
        let mut spawned = Vec::with_capacity(children.len());

        if self.are_jobs_cancelled() {
            self.cancel_jobs(children);
        } else {
            for child in children {
                match self.resolve_worker(child.kind()) {
                    Ok(child_worker) => {
                        let package = self.package(child, child_worker, Some(lineage), 0, Vec::new());
                        spawned.push(package.info.clone());
                        self.enqueue(package, true);
                    }
                    Err(err) => {
                        warn!(package_id = %info.package_id, error = %err, "Can't enqueue follow-up job");
                        self.record_unhandled(err);
                    }
                }
            }
        }

        debug!(
            package_id = %info.package_id,
            kind = %info.kind,
            follow_ups = spawned.len(),
            "Job completed"
        );
        JobMetrics::job_completed(info.kind);
        self.report(Some(&worker), &info.label, |r| r.notify_job_completed(&info, &spawned));
        self.decrement_pending();
    }

    // ---- cancellation -----------------------------------------------------

    fn cancel_queued(&self) {
        let packages = self.shared.queue.lock().drain();
        if !packages.is_empty() {
            info!(count = packages.len(), "Cancelling queued jobs");
        }
        self.cancel_packages(packages);
    }

    /// Moves packages, and the after-jobs they carry, to the cancelled list.
    fn cancel_packages(&self, packages: Vec<JobPackage>) {
        if packages.is_empty() {
            return;
        }

        let mut batch = Vec::new();
        let mut count = 0;
        for package in packages {
            let JobPackage {
                job,
                worker,
                next_jobs,
                info,
                ..
            } = package;
            let subject = info.label.clone();
            let mut infos = vec![info];
            infos.extend(next_jobs.iter().map(|j| self.detached_info(j.as_ref())));
            count += infos.len();

            {
                let mut cancelled = self.shared.cancelled_jobs.lock();
                cancelled.push(job);
                cancelled.extend(next_jobs);
            }
            self.decrement_pending();

            if worker.reporter().is_some() {
                self.report(Some(&worker), &subject, |r| r.notify_jobs_cancelled(&infos));
            } else {
                batch.extend(infos);
            }
        }

        debug!(count, "Jobs cancelled");
        JobMetrics::jobs_cancelled(count);
        if !batch.is_empty() {
            self.report(None, "cancelled jobs", |r| r.notify_jobs_cancelled(&batch));
        }
    }

    /// Moves jobs that never got a package to the cancelled list.
    fn cancel_jobs(&self, jobs: Vec<Box<dyn Job>>) {
        if jobs.is_empty() {
            return;
        }
        let infos: Vec<JobInfo> = jobs.iter().map(|j| self.detached_info(j.as_ref())).collect();
        JobMetrics::jobs_cancelled(jobs.len());
        self.shared.cancelled_jobs.lock().extend(jobs);
        self.report(None, "cancelled jobs", |r| r.notify_jobs_cancelled(&infos));
    }

    // ---- failures ---------------------------------------------------------

    fn handle_failure(&self, package: JobPackage, error: JobError) {
        if self.are_jobs_cancelled() {
            debug!(
                package_id = %package.id,
                error = %error,
                "Job failed after cancellation, not retrying"
            );
            self.cancel_packages(vec![package]);
            return;
        }
        if error.is_system_abort() || self.config().fail_policy.is_fail_fast() {
            self.fail_package(package, error);
            return;
        }

        let JobPackage {
            job,
            worker,
            tries,
            next_jobs,
            info,
            ..
        } = package;
        let failure = Failure {
            info,
            worker,
            next_jobs,
            error,
        };

        let recovery = retry::plan(job, tries, self.config().max_tries);
        let next_tries = recovery.next_tries(tries);
        match recovery {
            Recovery::Retry(next) => self.resubmit(failure, next, next_tries, false),
            Recovery::Backup(next) => self.resubmit(failure, next, next_tries, true),
            Recovery::GiveUp => self.fail(failure),
        }
    }

    /// Enqueues `next` in place of the failed job, as a new root.
    fn resubmit(&self, failure: Failure, next: Box<dyn Job>, tries: u32, backup: bool) {
        let worker = match self.resolve_worker(next.kind()) {
            Ok(worker) => worker,
            Err(missing) => {
                warn!(
                    package_id = %failure.info.package_id,
                    error = %missing,
                    backup,
                    "Can't enqueue substitute job"
                );
                self.record_unhandled(missing);
                self.fail(failure);
                return;
            }
        };

        let Failure {
            info,
            worker: failed_worker,
            next_jobs,
            error,
        } = failure;
        let package = self.package(next, worker, None, tries, next_jobs);
        let retry = package.info.clone();

        warn!(
            package_id = %info.package_id,
            retry_package_id = %retry.package_id,
            kind = %retry.kind,
            tries,
            backup,
            error = %error,
            "Retrying failed job"
        );
        JobMetrics::job_retried(retry.kind, backup);
        self.report(Some(&failed_worker), &info.label, |r| {
            r.notify_job_retried(&info, &retry, &error)
        });
        self.enqueue(package, false);
    }

    fn fail_package(&self, package: JobPackage, error: JobError) {
        let JobPackage {
            worker,
            next_jobs,
            info,
            ..
        } = package;
        self.fail(Failure {
            info,
            worker,
            next_jobs,
            error,
        });
    }

    /// Fails a package for good.
    fn fail(&self, failure: Failure) {
        let Failure {
            info,
            worker,
            next_jobs,
            error,
        } = failure;

        self.touch_clock();
        warn!(
            package_id = %info.package_id,
            kind = %info.kind,
            tries = info.tries,
            error_code = error.error_code(),
            "Job failed: {}",
            info.label
        );
        JobMetrics::job_failed(info.kind, error.error_code());

        let error = self.record_unhandled(error);
        self.report(Some(&worker), &info.label, |r| r.notify_job_failed(&info, &error));
        self.decrement_pending();
        self.cancel_jobs(next_jobs);
    }

    // ---- clock and signals ------------------------------------------------

    /// Cancels the run once the deadline passed without fresh activity.
    fn check_timeout(&self) {
        let Some(max_timeout) = self.config().max_timeout else {
            return;
        };
        let now = Instant::now();

        {
            let mut deadline = self.shared.deadline.lock();
            match *deadline {
                Some(at) if now < at => return,
                // too far out to represent
                None => return,
                Some(_) => {}
            }
            let fresh = self
                .shared
                .activity
                .as_ref()
                .is_some_and(|tracker| tracker.is_fresh_at(now, max_timeout));
            if fresh {
                *deadline = now.checked_add(max_timeout);
                return;
            }
        }

        if !self.shared.timed_out.swap(true, Ordering::SeqCst) {
            warn!(
                max_timeout_ms = max_timeout.as_millis() as u64,
                pending = self.pending_jobs_amount(),
                "Run stalled, cancelling pending jobs"
            );
            self.cancel_pending_jobs();
        }
    }

    /// Resets the pending counter when nothing is left to account for it.
    fn settle_pending(&self) {
        let pending = self.shared.pending.swap(0, Ordering::SeqCst);
        if pending > 0 {
            error!(pending, "Pending jobs without queued or running work, resetting counter");
            JobMetrics::set_pending(0);
        }
    }

    /// Logs what the run is doing, then cancels it.
    ///
    /// Rust can't walk the stacks of other threads, so the snapshot is the
    /// stack of the signal thread plus every in-flight job with the thread
    /// running it.
    pub(crate) fn interrupt(&self, signal: InterferingSignal) {
        {
            let active = self.shared.active.lock();
            let backtrace = Backtrace::force_capture();
            debug!(
                signal = %signal,
                in_flight = active.len(),
                backtrace = %backtrace,
                "Interfering signal received"
            );
            for (package_id, unit) in &*active {
                debug!(
                    package_id = %package_id,
                    kind = %unit.kind,
                    thread = %unit.thread,
                    running_ms = unit.started.elapsed().as_millis() as u64,
                    "In flight: {}",
                    unit.label
                );
            }
        }

        self.shared.interrupted.lock().get_or_insert(signal);
        warn!(signal = %signal, "Run interrupted");
        self.cancel_pending_jobs();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
