//! Job system configuration.

pub use depot_config::{FailPolicy, InterferingSignal};

use depot_config::JobsSettings;
use std::time::Duration;

/// Configuration of a [`JobSystem`](crate::JobSystem).
#[derive(Debug, Clone)]
pub struct JobSystemConfig {
    /// Number of worker threads; 1 runs every job on the calling thread.
    pub thread_count: usize,

    /// Retry budget per job.
    pub max_tries: u32,

    /// Maximum occurrences of one job kind along an ancestry chain.
    pub max_cycle: u32,

    /// Time without progress after which the run is cancelled; `None`
    /// disables the stall check.
    pub max_timeout: Option<Duration>,

    /// Upper bound of one blocking wait on the notification channel.
    pub wait_time: Duration,

    /// Run-wide failure propagation policy.
    pub fail_policy: FailPolicy,

    /// Signals that cancel a run.
    pub interfering_signals: Vec<InterferingSignal>,
}

impl Default for JobSystemConfig {
    fn default() -> Self {
        Self::from(&JobsSettings::default())
    }
}

impl From<&JobsSettings> for JobSystemConfig {
    fn from(settings: &JobsSettings) -> Self {
        Self {
            thread_count: settings.thread_count.max(1),
            max_tries: settings.max_tries,
            max_cycle: settings.max_cycle,
            max_timeout: settings.max_timeout(),
            wait_time: settings.wait_time(),
            fail_policy: settings.fail_policy,
            interfering_signals: settings.interfering_signals.clone(),
        }
    }
}

impl JobSystemConfig {
    /// Configuration that runs every job on the calling thread.
    pub fn single_threaded() -> Self {
        Self::default().with_threads(1)
    }

    /// Sets the thread count.
    pub fn with_threads(mut self, thread_count: usize) -> Self {
        self.thread_count = thread_count.max(1);
        self
    }

    /// Sets the retry budget.
    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    /// Sets the cycle limit.
    pub fn with_max_cycle(mut self, max_cycle: u32) -> Self {
        self.max_cycle = max_cycle;
        self
    }

    /// Sets the stall timeout.
    pub fn with_max_timeout(mut self, max_timeout: Option<Duration>) -> Self {
        self.max_timeout = max_timeout;
        self
    }

    /// Sets the notification wait.
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Sets the failure policy.
    pub fn with_fail_policy(mut self, fail_policy: FailPolicy) -> Self {
        self.fail_policy = fail_policy;
        self
    }

    /// Sets the interfering signals.
    pub fn with_interfering_signals(mut self, signals: Vec<InterferingSignal>) -> Self {
        self.interfering_signals = signals;
        self
    }

    /// Returns true if jobs run on a worker pool.
    pub fn is_threaded(&self) -> bool {
        self.thread_count > 1
    }

    /// Number of units kept in flight: one and a half per thread.
    pub fn soft_cap(&self) -> usize {
        (self.thread_count * 3).div_ceil(2).max(1)
    }
}
