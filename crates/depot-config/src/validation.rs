//! Configuration validation module.
//!
//! Provides validation for all configuration values, failing fast on
//! invalid configuration rather than at runtime.

use crate::{AppConfig, JobsSettings};
use depot_core::telemetry::TelemetryConfig;
use std::collections::HashSet;
use std::fmt;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// The scheduler needs at least one thread.
    InvalidThreadCount { value: usize },
    /// Thread count exceeds maximum allowed.
    ThreadCountTooLarge { value: usize, maximum: usize },
    /// Retry budget exceeds maximum allowed.
    MaxTriesTooLarge { value: u32, maximum: u32 },
    /// Cycle limit must allow each job kind at least once.
    InvalidMaxCycle { value: u32 },
    /// Timeout must be a finite, non-negative number of seconds.
    InvalidTimeout { name: String, value: f64 },
    /// Wait time must be positive.
    NonPositiveWaitTime { value: u64 },
    /// The same signal is listed twice.
    DuplicateSignal { signal: String },
    /// Log filter is empty.
    EmptyLogFilter,
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidThreadCount { value } => {
                write!(f, "Invalid thread count: {} (must be at least 1)", value)
            }
            Self::ThreadCountTooLarge { value, maximum } => {
                write!(f, "Thread count {} exceeds maximum allowed ({})", value, maximum)
            }
            Self::MaxTriesTooLarge { value, maximum } => {
                write!(f, "max_tries {} exceeds maximum allowed ({})", value, maximum)
            }
            Self::InvalidMaxCycle { value } => {
                write!(f, "Invalid max_cycle: {} (must be at least 1)", value)
            }
            Self::InvalidTimeout { name, value } => {
                write!(
                    f,
                    "Timeout '{}' must be a finite, non-negative number of seconds, got {}",
                    name, value
                )
            }
            Self::NonPositiveWaitTime { value } => {
                write!(f, "wait_time_ms must be positive, got {}", value)
            }
            Self::DuplicateSignal { signal } => {
                write!(f, "Signal {} is listed more than once", signal)
            }
            Self::EmptyLogFilter => write!(f, "Log filter cannot be empty"),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result of configuration validation containing all errors found.
#[derive(Debug)]
pub struct ValidationResult {
    errors: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Creates a new validation result.
    fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Adds an error to the result.
    fn add_error(&mut self, error: ConfigValidationError) {
        self.errors.push(error);
    }

    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the validation errors.
    pub fn errors(&self) -> &[ConfigValidationError] {
        &self.errors
    }

    /// Converts to Result, returning Err with all errors if any exist.
    pub fn into_result(self) -> Result<(), Vec<ConfigValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Upper bound on worker threads; the target hardware is small.
    const MAX_THREADS: usize = 256;
    /// Upper bound on the retry budget.
    const MAX_TRIES: u32 = 100;

    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut result = ValidationResult::new();

        Self::validate_jobs(&config.jobs, &mut result);
        Self::validate_telemetry(&config.telemetry, &mut result);

        result.into_result()
    }

    /// Validates only the scheduler settings.
    pub fn validate_jobs_settings(settings: &JobsSettings) -> Result<(), Vec<ConfigValidationError>> {
        let mut result = ValidationResult::new();
        Self::validate_jobs(settings, &mut result);
        result.into_result()
    }

    fn validate_jobs(settings: &JobsSettings, result: &mut ValidationResult) {
        if settings.thread_count == 0 {
            result.add_error(ConfigValidationError::InvalidThreadCount {
                value: settings.thread_count,
            });
        }
        if settings.thread_count > Self::MAX_THREADS {
            result.add_error(ConfigValidationError::ThreadCountTooLarge {
                value: settings.thread_count,
                maximum: Self::MAX_THREADS,
            });
        }

        if settings.max_tries > Self::MAX_TRIES {
            result.add_error(ConfigValidationError::MaxTriesTooLarge {
                value: settings.max_tries,
                maximum: Self::MAX_TRIES,
            });
        }

        if settings.max_cycle == 0 {
            result.add_error(ConfigValidationError::InvalidMaxCycle {
                value: settings.max_cycle,
            });
        }

        if let Some(secs) = settings.max_timeout_secs {
            if !secs.is_finite() || secs < 0.0 {
                result.add_error(ConfigValidationError::InvalidTimeout {
                    name: "jobs.max_timeout_secs".to_string(),
                    value: secs,
                });
            }
        }

        if settings.wait_time_ms == 0 {
            result.add_error(ConfigValidationError::NonPositiveWaitTime {
                value: settings.wait_time_ms,
            });
        }

        let mut seen = HashSet::new();
        for signal in &settings.interfering_signals {
            if !seen.insert(signal) {
                result.add_error(ConfigValidationError::DuplicateSignal {
                    signal: signal.to_string(),
                });
            }
        }
    }

    fn validate_telemetry(config: &TelemetryConfig, result: &mut ValidationResult) {
        if config.log_filter.trim().is_empty() {
            result.add_error(ConfigValidationError::EmptyLogFilter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InterferingSignal;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let mut config = AppConfig::default();
        config.jobs.thread_count = 0;
        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors, vec![ConfigValidationError::InvalidThreadCount { value: 0 }]);
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = AppConfig::default();
        config.jobs.max_cycle = 0;
        config.jobs.wait_time_ms = 0;
        config.jobs.max_timeout_secs = Some(f64::NAN);
        config.jobs.interfering_signals =
            vec![InterferingSignal::Interrupt, InterferingSignal::Interrupt];
        config.telemetry.log_filter = "  ".to_string();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ConfigValidationError::EmptyLogFilter));
        assert!(errors.contains(&ConfigValidationError::DuplicateSignal {
            signal: "SIGINT".to_string()
        }));
    }

    #[test]
    fn test_zero_timeout_is_valid() {
        let settings = JobsSettings {
            max_timeout_secs: Some(0.0),
            ..Default::default()
        };
        assert!(ConfigValidator::validate_jobs_settings(&settings).is_ok());
    }

    #[test]
    fn test_error_display() {
        let err = ConfigValidationError::MaxTriesTooLarge {
            value: 500,
            maximum: 100,
        };
        assert!(err.to_string().contains("500"));
    }
}
