//! Notifications from units of work to the scheduling thread.
//!
//! Units never touch scheduler state. They report what happened to their
//! package through a per-run channel, and the scheduling thread applies the
//! consequences when it drains the channel.

use crate::error::JobError;
use crate::job::{Job, JobInfo, JobState};
use crate::package::JobPackage;
use crate::worker::Worker;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Lifecycle event of one package.
pub(crate) enum Notification {
    Started {
        info: JobInfo,
        worker: Arc<dyn Worker>,
    },
    Completed {
        package: JobPackage,
        follow_ups: Vec<Box<dyn Job>>,
    },
    Cancelled {
        package: JobPackage,
    },
    Errored {
        package: JobPackage,
        error: JobError,
    },
}

impl Notification {
    pub fn state(&self) -> JobState {
        match self {
            Notification::Started { .. } => JobState::Started,
            Notification::Completed { .. } => JobState::Completed,
            Notification::Cancelled { .. } => JobState::Cancelled,
            Notification::Errored { .. } => JobState::Errored,
        }
    }
}

/// Sending half handed to units of work.
#[derive(Clone)]
pub(crate) struct NotificationSender {
    tx: UnboundedSender<Notification>,
}

impl NotificationSender {
    /// Sends a notification; once the run is over it is dropped.
    pub fn send(&self, notification: Notification) {
        let state = notification.state();
        if self.tx.send(notification).is_err() {
            debug!(state = %state, "Run is over, dropping notification");
        }
    }
}

/// Channel of one run.
pub(crate) struct NotificationChannel {
    tx: UnboundedSender<Notification>,
    rx: Mutex<UnboundedReceiver<Notification>>,
}

impl NotificationChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn sender(&self) -> NotificationSender {
        NotificationSender {
            tx: self.tx.clone(),
        }
    }

    /// Returns the next notification without waiting.
    pub fn try_recv(&self) -> Option<Notification> {
        match self.rx.lock().try_recv() {
            Ok(notification) => Some(notification),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Waits at most `wait` for the next notification.
    pub fn recv_timeout(&self, runtime: &Runtime, wait: Duration) -> Option<Notification> {
        let mut rx = self.rx.lock();
        runtime.block_on(async { tokio::time::timeout(wait, rx.recv()).await.ok().flatten() })
    }
}
