//! Application configuration structures.

use crate::{FailPolicy, InterferingSignal};
use depot_core::telemetry::TelemetryConfig;
use depot_core::DepotError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Logging configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Job scheduler configuration.
    #[serde(default)]
    pub jobs: JobsSettings,
}

impl AppConfig {
    /// Renders the configuration as TOML, e.g. to seed a `default.toml`.
    pub fn to_toml_string(&self) -> Result<String, DepotError> {
        toml::to_string_pretty(self).map_err(|e| DepotError::Configuration(e.to_string()))
    }
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "depot".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Job scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsSettings {
    /// Number of worker threads; 1 selects the single-threaded strategy.
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,

    /// Retry budget per job.
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,

    /// Maximum repetitions of one job kind along an ancestry chain.
    #[serde(default = "default_max_cycle")]
    pub max_cycle: u32,

    /// Seconds without progress before a run counts as stalled; unset disables.
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: Option<f64>,

    /// Upper bound of one blocking wait on the notification channel.
    #[serde(default = "default_wait_time_ms")]
    pub wait_time_ms: u64,

    /// Run-wide failure propagation policy.
    #[serde(default)]
    pub fail_policy: FailPolicy,

    /// Signals that cancel a run while it executes.
    #[serde(default = "default_interfering_signals")]
    pub interfering_signals: Vec<InterferingSignal>,
}

impl Default for JobsSettings {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
            max_tries: default_max_tries(),
            max_cycle: default_max_cycle(),
            max_timeout_secs: default_max_timeout_secs(),
            wait_time_ms: default_wait_time_ms(),
            fail_policy: FailPolicy::default(),
            interfering_signals: default_interfering_signals(),
        }
    }
}

fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
        .max(2)
}

fn default_max_tries() -> u32 {
    3
}

fn default_max_cycle() -> u32 {
    3
}

#[allow(clippy::unnecessary_wraps)]
fn default_max_timeout_secs() -> Option<f64> {
    Some(300.0) // 5 minutes
}

fn default_wait_time_ms() -> u64 {
    250
}

fn default_interfering_signals() -> Vec<InterferingSignal> {
    vec![InterferingSignal::Interrupt]
}

impl JobsSettings {
    /// Returns the stall timeout as a Duration.
    #[must_use]
    pub fn max_timeout(&self) -> Option<Duration> {
        self.max_timeout_secs
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Returns the notification wait as a Duration.
    #[must_use]
    pub const fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }
}
