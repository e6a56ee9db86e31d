//! Job packages and their ancestry.
//!
//! A package wraps a job with everything the scheduler needs to run it: the
//! worker, the attempt count, the jobs to spawn on completion and a link into
//! the lineage arena used for cycle detection.

use crate::error::{JobError, JobResult};
use crate::job::{Job, JobInfo, JobKind};
use crate::worker::Worker;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Unique id of a package within a job system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PackageId(u64);

impl PackageId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkg-{}", self.0)
    }
}

/// Index of a node in the [`Lineage`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LineageId(usize);

#[derive(Debug)]
struct LineageNode {
    kind: JobKind,
    parent: Option<LineageId>,
}

/// Parent links of every package created during a run.
///
/// Nodes are never removed while the run lasts, so a package can walk its
/// ancestry even after its ancestors have completed.
#[derive(Debug, Default)]
pub(crate) struct Lineage {
    nodes: Vec<LineageNode>,
}

impl Lineage {
    pub fn add(&mut self, kind: JobKind, parent: Option<LineageId>) -> LineageId {
        self.nodes.push(LineageNode { kind, parent });
        LineageId(self.nodes.len() - 1)
    }

    /// Fails if any kind occurs more than `max_cycle` times on the chain from
    /// `id` to its root, `id` included.
    pub fn check_cycles(&self, id: LineageId, max_cycle: u32) -> JobResult<()> {
        let mut counts: HashMap<JobKind, u32> = HashMap::new();
        let mut cursor = Some(id);

        while let Some(LineageId(index)) = cursor {
            let Some(node) = self.nodes.get(index) else {
                break;
            };
            let count = counts.entry(node.kind).or_insert(0);
            *count += 1;
            if *count > max_cycle {
                return Err(JobError::CycleDetected {
                    kind: node.kind,
                    occurrences: self.occurrences(id, node.kind),
                    limit: max_cycle,
                });
            }
            cursor = node.parent;
        }

        Ok(())
    }

    fn occurrences(&self, id: LineageId, kind: JobKind) -> u32 {
        let mut total = 0;
        let mut cursor = Some(id);
        while let Some(node) = cursor.and_then(|LineageId(index)| self.nodes.get(index)) {
            if node.kind == kind {
                total += 1;
            }
            cursor = node.parent;
        }
        total
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

/// A job together with its scheduling state.
pub(crate) struct JobPackage {
    pub id: PackageId,
    pub job: Box<dyn Job>,
    pub worker: Arc<dyn Worker>,
    /// Failed attempts so far; reset to 0 for a backup job.
    pub tries: u32,
    pub lineage: LineageId,
    /// The job's after-jobs, enqueued as children once it completes.
    pub next_jobs: Vec<Box<dyn Job>>,
    pub info: JobInfo,
}

impl fmt::Debug for JobPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobPackage")
            .field("id", &self.id)
            .field("job", &self.job)
            .field("tries", &self.tries)
            .field("next_jobs", &self.next_jobs.len())
            .finish()
    }
}

/// Queue of packages waiting for dispatch.
///
/// Priority packages sit in front of regular ones; each class keeps FIFO
/// order.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    items: VecDeque<JobPackage>,
    priority_len: usize,
    pub lineage: Lineage,
}

impl PendingQueue {
    pub fn push(&mut self, package: JobPackage) {
        if package.info.priority {
            self.items.insert(self.priority_len, package);
            self.priority_len += 1;
        } else {
            self.items.push_back(package);
        }
    }

    pub fn pop(&mut self) -> Option<JobPackage> {
        let package = self.items.pop_front()?;
        if package.info.priority {
            self.priority_len -= 1;
        }
        Some(package)
    }

    pub fn drain(&mut self) -> Vec<JobPackage> {
        self.priority_len = 0;
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
