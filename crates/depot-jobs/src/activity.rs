//! Progress heartbeat for long-running jobs.
//!
//! The stall timeout only sees scheduler events. A job that works for a long
//! time without finishing records progress on an [`ActivityTracker`] shared
//! with the job system, which keeps the run from being declared stalled.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
enum Progress {
    Never,
    At(Instant),
    Indefinite,
}

/// Shared record of the last observed progress.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    last: Arc<Mutex<Progress>>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    /// Creates a tracker with no recorded progress.
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Progress::Never)),
        }
    }

    /// Records progress now.
    pub fn record_progress(&self) {
        self.record_progress_at(Instant::now());
    }

    /// Records progress at `at`; earlier instants than the current record
    /// are ignored.
    pub fn record_progress_at(&self, at: Instant) {
        let mut last = self.last.lock();
        match *last {
            Progress::Indefinite => {}
            Progress::At(current) if current >= at => {}
            _ => *last = Progress::At(at),
        }
    }

    /// Marks progress as ongoing until [`clear`](Self::clear) is called.
    pub fn hold_indefinitely(&self) {
        *self.last.lock() = Progress::Indefinite;
    }

    /// Forgets all recorded progress.
    pub fn clear(&self) {
        *self.last.lock() = Progress::Never;
    }

    /// Returns the last recorded instant, if any.
    ///
    /// A tracker held indefinitely reports `None` here but is always fresh.
    pub fn last_progress(&self) -> Option<Instant> {
        match *self.last.lock() {
            Progress::At(at) => Some(at),
            Progress::Never | Progress::Indefinite => None,
        }
    }

    /// Returns true if progress was recorded within `window` before now.
    pub fn is_fresh(&self, window: Duration) -> bool {
        self.is_fresh_at(Instant::now(), window)
    }

    pub(crate) fn is_fresh_at(&self, now: Instant, window: Duration) -> bool {
        match *self.last.lock() {
            Progress::Never => false,
            Progress::Indefinite => true,
            Progress::At(at) => match now.checked_sub(window) {
                Some(threshold) => at > threshold,
                None => true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tracker_is_stale() {
        let tracker = ActivityTracker::new();
        assert!(tracker.last_progress().is_none());
        assert!(!tracker.is_fresh(Duration::from_secs(60)));
    }

    #[test]
    fn test_recent_progress_is_fresh() {
        let tracker = ActivityTracker::new();
        let now = Instant::now();
        tracker.record_progress_at(now);
        assert!(tracker.is_fresh_at(now + Duration::from_secs(1), Duration::from_secs(5)));
        assert!(!tracker.is_fresh_at(now + Duration::from_secs(10), Duration::from_secs(5)));
    }

    #[test]
    fn test_zero_window_is_never_fresh() {
        let tracker = ActivityTracker::new();
        let now = Instant::now();
        tracker.record_progress_at(now);
        assert!(!tracker.is_fresh_at(now, Duration::ZERO));
    }

    #[test]
    fn test_older_record_is_ignored() {
        let tracker = ActivityTracker::new();
        let now = Instant::now();
        tracker.record_progress_at(now + Duration::from_secs(2));
        tracker.record_progress_at(now);
        assert_eq!(tracker.last_progress(), Some(now + Duration::from_secs(2)));
    }

    #[test]
    fn test_hold_indefinitely_until_cleared() {
        let tracker = ActivityTracker::new();
        tracker.hold_indefinitely();
        tracker.record_progress();
        assert!(tracker.is_fresh(Duration::ZERO));
        assert!(tracker.last_progress().is_none());

        tracker.clear();
        assert!(!tracker.is_fresh(Duration::from_secs(3600)));
    }

    #[test]
    fn test_clones_share_state() {
        let tracker = ActivityTracker::new();
        let handle = tracker.clone();
        handle.record_progress();
        assert!(tracker.last_progress().is_some());
    }
}
