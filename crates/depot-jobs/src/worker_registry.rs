//! Worker registry mapping job kinds to workers.

use crate::job::JobKind;
use crate::worker::Worker;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Information about a registered worker.
#[derive(Clone)]
pub struct WorkerInfo {
    /// Kind the worker operates on.
    pub kind: JobKind,
    /// The worker.
    pub worker: Arc<dyn Worker>,
    /// Registration timestamp.
    pub registered_at: Instant,
    /// Registration sequence number.
    pub seq: u64,
}

impl std::fmt::Debug for WorkerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerInfo")
            .field("kind", &self.kind)
            .field("registered_at", &self.registered_at)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// Worker registry for resolving the worker of a job.
#[derive(Default)]
pub struct WorkerRegistry {
    /// Registered workers by kind.
    workers: RwLock<HashMap<JobKind, WorkerInfo>>,
    /// Counter for total registrations.
    registration_count: AtomicU64,
}

impl WorkerRegistry {
    /// Create a new worker registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker, replacing any previous worker of the same kind.
    ///
    /// Returns the registration sequence number.
    pub fn register(&self, kind: JobKind, worker: Arc<dyn Worker>) -> u64 {
        let seq = self.registration_count.fetch_add(1, Ordering::Relaxed) + 1;
        let info = WorkerInfo {
            kind,
            worker,
            registered_at: Instant::now(),
            seq,
        };

        if self.workers.write().insert(kind, info).is_some() {
            warn!(kind = %kind, registration_seq = seq, "Worker replaced");
        } else {
            info!(kind = %kind, registration_seq = seq, "Worker registered");
        }

        seq
    }

    /// Get the worker for a kind.
    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn Worker>> {
        self.workers.read().get(&kind).map(|w| Arc::clone(&w.worker))
    }

    /// Get information about the worker of a kind.
    pub fn get_info(&self, kind: JobKind) -> Option<WorkerInfo> {
        self.workers.read().get(&kind).cloned()
    }

    /// Check if a kind has a worker.
    pub fn contains(&self, kind: JobKind) -> bool {
        self.workers.read().contains_key(&kind)
    }

    /// Unregister the worker of a kind.
    pub fn unregister(&self, kind: JobKind) -> bool {
        let removed = self.workers.write().remove(&kind).is_some();
        if removed {
            info!(kind = %kind, "Worker unregistered");
        }
        removed
    }

    /// Get all kinds with a worker, ordered by id.
    pub fn kinds(&self) -> Vec<JobKind> {
        let mut kinds: Vec<JobKind> = self.workers.read().keys().copied().collect();
        kinds.sort_by_key(JobKind::id);
        kinds
    }

    /// Get the count of registered workers.
    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    /// Returns true if no worker is registered.
    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }

    /// Get total registrations since creation.
    pub fn total_registrations(&self) -> u64 {
        self.registration_count.load(Ordering::Relaxed)
    }
}
