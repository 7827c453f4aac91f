//! Worker pool of isolated execution units fed from a FIFO job queue.
//!
//! Each execution unit is a dedicated OS thread with its own single-threaded
//! tokio runtime. Units never share state with each other: the only thing a
//! unit touches is its inbound command channel and the supervisor's inbox.
//!
//! A single supervisor thread owns the slot table, the queue and the pending
//! job map. Every mutation of those happens inside its message loop, so the
//! dispatch routine is never re-entered.
//!
//! # Example
//!
//! ```rust,ignore
//! use ticker_collector::config::WorkerPoolConfig;
//! use ticker_collector::core::WorkerPool;
//!
//! let pool = WorkerPool::initialize(
//!     WorkerPoolConfig::new().with_worker_count(8),
//!     my_executor, // implements UnitExecutor
//! )?;
//!
//! let result = pool.process_all(&identifiers).await;
//! println!("{} ok / {} failed", result.success_count(), result.failure_count());
//! ```

mod native;
mod unit;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

pub use native::{JobHandle, WorkerPool};

/// Monotonically increasing job identifier, starting at 1.
pub type JobId = u64;

/// One unit of dispatch: an identifier plus its tracking data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique, increasing job id.
    pub id: JobId,
    /// Identifier to fetch and persist.
    pub identifier: String,
    /// When the job was enqueued.
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    /// Create a job stamped with the current time.
    #[must_use]
    pub fn new(id: JobId, identifier: String) -> Self {
        Self {
            id,
            identifier,
            submitted_at: Utc::now(),
        }
    }
}

/// Errors raised by pool lifecycle operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A unit did not answer its liveness probe in time.
    #[error("worker {worker_id} failed to initialize within {timeout:?}")]
    InitTimeout {
        /// Slot index of the unit.
        worker_id: usize,
        /// Probe timeout that elapsed.
        timeout: Duration,
    },

    /// The OS refused to start a thread.
    #[error("failed to spawn worker {worker_id}: {message}")]
    Spawn {
        /// Slot index of the unit.
        worker_id: usize,
        /// OS error text.
        message: String,
    },

    /// The pool has been terminated.
    #[error("pool has been shut down")]
    PoolShutdown,

    /// Internal error (supervisor gone, channel closed).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Why a single job did not produce a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The unit ran the job and reported an error.
    #[error("{identifier}: {message}")]
    Failed {
        /// Identifier of the failed job.
        identifier: String,
        /// Error text reported by the unit.
        message: String,
    },

    /// The unit holding the job terminated abnormally.
    #[error("worker {worker_id} crashed while processing {identifier}: {message}")]
    UnitCrashed {
        /// Slot index of the crashed unit.
        worker_id: usize,
        /// Identifier of the lost job.
        identifier: String,
        /// Panic or exit reason.
        message: String,
    },

    /// The pool was terminated before the job finished.
    #[error("{identifier}: abandoned by pool termination")]
    Abandoned {
        /// Identifier of the abandoned job.
        identifier: String,
    },

    /// The pool was already shut down when the job was submitted.
    #[error("pool has been shut down")]
    PoolShutdown,
}

/// Snapshot of pool utilization and running tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Configured slots.
    pub worker_count: usize,
    /// Units currently running a job.
    pub busy_workers: usize,
    /// Units ready for work.
    pub idle_workers: usize,
    /// Slots waiting for a replacement unit.
    pub dead_workers: usize,
    /// Jobs waiting in the FIFO queue.
    pub queued_jobs: usize,
    /// Jobs submitted but not yet reported (queued plus running).
    pub pending_jobs: usize,
    /// Total jobs accepted.
    pub submitted_jobs: u64,
    /// Jobs that produced a record.
    pub completed_jobs: u64,
    /// Jobs that failed, crashed or were abandoned.
    pub failed_jobs: u64,
    /// Units recreated after a crash.
    pub replaced_workers: u64,
}

/// Counters shared between the supervisor (writer) and pool handles (readers).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub busy_workers: AtomicUsize,
    pub dead_workers: AtomicUsize,
    pub queued_jobs: AtomicUsize,
    pub pending_jobs: AtomicUsize,
    pub submitted_jobs: AtomicU64,
    pub completed_jobs: AtomicU64,
    pub failed_jobs: AtomicU64,
    pub replaced_workers: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        let busy_workers = self.busy_workers.load(Ordering::Relaxed);
        let dead_workers = self.dead_workers.load(Ordering::Relaxed);
        PoolStats {
            worker_count,
            busy_workers,
            idle_workers: worker_count.saturating_sub(busy_workers + dead_workers),
            dead_workers,
            queued_jobs: self.queued_jobs.load(Ordering::Relaxed),
            pending_jobs: self.pending_jobs.load(Ordering::Relaxed),
            submitted_jobs: self.submitted_jobs.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
            replaced_workers: self.replaced_workers.load(Ordering::Relaxed),
        }
    }
}

/// Successful outcome of one job.
#[derive(Debug, Clone)]
pub struct JobSuccess<R> {
    /// Job id.
    pub job_id: JobId,
    /// Identifier processed.
    pub identifier: String,
    /// Record returned by the sink.
    pub record: R,
    /// Unit that ran the job.
    pub worker_id: usize,
    /// Time from submission to report.
    pub duration: Duration,
}

/// Failed outcome of one job.
#[derive(Debug, Clone)]
pub struct JobFailure {
    /// Job id, if the job was accepted at all.
    pub job_id: Option<JobId>,
    /// Identifier processed.
    pub identifier: String,
    /// Error text.
    pub error: String,
    /// Unit that held the job, if it was dispatched.
    pub worker_id: Option<usize>,
    /// Time from submission to report.
    pub duration: Duration,
}

/// Aggregate of a `process_all` call. Treat entries as an unordered set.
#[derive(Debug, Clone)]
pub struct PoolResult<R> {
    /// Jobs that produced a record.
    pub successes: Vec<JobSuccess<R>>,
    /// Jobs that did not.
    pub failures: Vec<JobFailure>,
    /// Wall-clock time of the whole call.
    pub duration: Duration,
    /// Number of identifiers submitted.
    pub total_identifiers: usize,
    /// Pool slots used.
    pub workers_used: usize,
}

impl<R> PoolResult<R> {
    /// Number of successful jobs.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    /// Number of failed jobs.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Identifiers that succeeded, in report order.
    #[must_use]
    pub fn succeeded_identifiers(&self) -> Vec<String> {
        self.successes.iter().map(|s| s.identifier.clone()).collect()
    }
}

/// Final report for one job, delivered to whoever awaits it.
#[derive(Debug)]
pub struct JobReport<R> {
    /// Job id, `None` if the pool refused the submission.
    pub job_id: Option<JobId>,
    /// Identifier processed.
    pub identifier: String,
    /// Unit that held the job.
    pub worker_id: Option<usize>,
    /// Time from submission to report.
    pub duration: Duration,
    /// Record or error.
    pub outcome: Result<R, JobError>,
}

/// Command sent from the supervisor to one execution unit.
pub(crate) enum UnitCommand {
    /// Liveness probe; the unit answers with its slot index.
    Ping {
        reply: crossbeam_channel::Sender<usize>,
    },
    /// Run one job.
    Run(Job),
}

/// What a unit reports about itself.
#[derive(Debug)]
pub(crate) enum UnitEventKind<R> {
    JobComplete { job_id: JobId, record: R },
    JobError { job_id: JobId, error: String },
    UnitExited { reason: String },
}

/// Event from a unit, tagged with the slot and the unit generation so the
/// supervisor can ignore reports from replaced units.
#[derive(Debug)]
pub(crate) struct UnitEvent<R> {
    pub worker_id: usize,
    pub generation: u64,
    pub kind: UnitEventKind<R>,
}

/// Everything the supervisor loop reacts to.
pub(crate) enum Inbox<R> {
    Submit {
        job: Job,
        enqueued_at: Instant,
        reply: oneshot::Sender<JobReport<R>>,
    },
    Unit(UnitEvent<R>),
    Terminate,
}
