//! Native `WorkerPool` built on OS threads.
//!
//! One supervisor thread owns the slot table, the FIFO queue and the map of
//! pending jobs. Callers and units only talk to it through its inbox, so the
//! dispatch routine runs on a single thread and is never re-entered.
//!
//! # Design Principles
//!
//! - **No polling**: units block on their command channel; callers await a
//!   oneshot per job
//! - **Replace, don't repair**: a unit that dies is discarded and a fresh one
//!   is started in the same slot before dispatch resumes
//! - **Generations**: every unit is tagged with its slot generation so late
//!   events from a replaced unit are ignored

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::executor::UnitExecutor;
use crate::util::duration_ms;

use super::unit::{probe, spawn_unit, UnitHandle};
use super::{
    Inbox, Job, JobError, JobFailure, JobId, JobReport, JobSuccess, PoolCounters, PoolError,
    PoolResult, PoolStats, UnitCommand, UnitEvent, UnitEventKind,
};

/// Fixed-size pool of isolated execution units.
///
/// # Design
///
/// - **FIFO**: jobs are dispatched in submission order to the first idle unit
/// - **One job per unit**: a unit is never handed a second job while busy
/// - **Crash recovery**: a crashed unit's job is reported failed exactly once
///   and the slot gets a new unit, so capacity is not lost
pub struct WorkerPool<R, E>
where
    R: Send + 'static,
    E: UnitExecutor<R>,
{
    /// Units actually started.
    worker_count: usize,

    /// Supervisor inbox.
    inbox: Sender<Inbox<R>>,

    /// Statistics published by the supervisor.
    counters: Arc<PoolCounters>,

    /// Set once by `terminate` or drop.
    shutdown: AtomicBool,

    /// Supervisor thread handle.
    supervisor: Mutex<Option<JoinHandle<()>>>,

    /// Job id counter; ids start at 1.
    next_job_id: AtomicU64,

    _executor: PhantomData<E>,
}

/// Handle to one enqueued job.
#[derive(Debug)]
pub struct JobHandle<R> {
    job_id: JobId,
    identifier: String,
    enqueued_at: Instant,
    report: oneshot::Receiver<JobReport<R>>,
}

impl<R> JobHandle<R> {
    /// Id assigned to the job.
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait for the job's report.
    ///
    /// If the pool goes away before reporting, the job is reported as
    /// abandoned.
    pub async fn wait(self) -> JobReport<R> {
        match self.report.await {
            Ok(report) => report,
            Err(_) => JobReport {
                job_id: Some(self.job_id),
                identifier: self.identifier.clone(),
                worker_id: None,
                duration: self.enqueued_at.elapsed(),
                outcome: Err(JobError::Abandoned {
                    identifier: self.identifier,
                }),
            },
        }
    }
}

impl<R, E> WorkerPool<R, E>
where
    R: Send + 'static,
    E: UnitExecutor<R>,
{
    /// Start the pool.
    ///
    /// The requested unit count is capped at `num_cpus * max_workers_per_cpu`.
    /// Every unit must answer its liveness probe within the configured
    /// timeout.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidConfig` if the configuration is invalid
    /// - `PoolError::InitTimeout` if a unit does not answer its probe
    /// - `PoolError::Spawn` if a thread cannot be started
    pub fn initialize(config: WorkerPoolConfig, executor: E) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let worker_count = config.effective_worker_count();
        if worker_count < config.worker_count {
            warn!(
                requested = config.worker_count,
                worker_count, "worker count capped by hardware parallelism"
            );
        }

        let (inbox_tx, inbox_rx) = unbounded::<Inbox<R>>();
        let counters = Arc::new(PoolCounters::default());

        let mut slots = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            match start_unit(worker_id, 0, &executor, &inbox_tx, &config) {
                Ok(unit) => slots.push(Slot::live(worker_id, 0, unit)),
                Err(err) => {
                    error!(worker_id, error = %err, "worker pool initialization failed");
                    // Dropping the handles closes every unit's channel.
                    drop(slots);
                    return Err(err);
                }
            }
        }

        let supervisor = Supervisor {
            slots,
            queue: VecDeque::new(),
            pending: HashMap::new(),
            executor,
            inbox: inbox_rx,
            events: inbox_tx.clone(),
            counters: Arc::clone(&counters),
            config,
        };

        let handle = thread::Builder::new()
            .name("tc-pool-supervisor".into())
            .spawn(move || supervisor.run())
            .map_err(|e| PoolError::Internal(format!("failed to spawn supervisor: {e}")))?;

        info!(worker_count, "worker pool initialized");

        Ok(Self {
            worker_count,
            inbox: inbox_tx,
            counters,
            shutdown: AtomicBool::new(false),
            supervisor: Mutex::new(Some(handle)),
            next_job_id: AtomicU64::new(1),
            _executor: PhantomData,
        })
    }

    /// Number of units in the pool.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Enqueue one identifier without waiting for it.
    ///
    /// Jobs are queued in the order `enqueue` is called.
    ///
    /// # Errors
    ///
    /// `PoolError::PoolShutdown` if the pool has been terminated.
    pub fn enqueue(&self, identifier: impl Into<String>) -> Result<JobHandle<R>, PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }

        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let identifier = identifier.into();
        let enqueued_at = Instant::now();
        let (reply, report) = oneshot::channel();

        self.inbox
            .send(Inbox::Submit {
                job: Job::new(job_id, identifier.clone()),
                enqueued_at,
                reply,
            })
            .map_err(|_| PoolError::PoolShutdown)?;

        self.counters.submitted_jobs.fetch_add(1, Ordering::Relaxed);
        debug!(job_id, identifier = %identifier, "job enqueued");

        Ok(JobHandle {
            job_id,
            identifier,
            enqueued_at,
            report,
        })
    }

    /// Submit one identifier and wait for its record.
    ///
    /// # Errors
    ///
    /// The job's [`JobError`], or `JobError::PoolShutdown` if the pool was
    /// already terminated.
    pub async fn submit(&self, identifier: impl Into<String>) -> Result<R, JobError> {
        match self.enqueue(identifier) {
            Ok(handle) => handle.wait().await.outcome,
            Err(_) => Err(JobError::PoolShutdown),
        }
    }

    /// Submit every identifier, wait for all of them and split the outcomes.
    ///
    /// Never short-circuits: each identifier ends up in exactly one of
    /// `successes` or `failures`. Duplicates are processed independently.
    pub async fn process_all<I, S>(&self, identifiers: I) -> PoolResult<R>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let started = Instant::now();
        let mut handles = Vec::new();
        let mut failures = Vec::new();

        for identifier in identifiers {
            let identifier = identifier.into();
            match self.enqueue(identifier.clone()) {
                Ok(handle) => handles.push(handle.wait()),
                Err(err) => failures.push(JobFailure {
                    job_id: None,
                    identifier,
                    error: err.to_string(),
                    worker_id: None,
                    duration: Duration::ZERO,
                }),
            }
        }

        let total_identifiers = handles.len() + failures.len();
        info!(
            total_identifiers,
            worker_count = self.worker_count,
            "processing identifiers"
        );

        let mut successes = Vec::with_capacity(handles.len());
        for report in join_all(handles).await {
            match report.outcome {
                Ok(record) => successes.push(JobSuccess {
                    job_id: report.job_id.unwrap_or_default(),
                    identifier: report.identifier,
                    record,
                    worker_id: report.worker_id.unwrap_or_default(),
                    duration: report.duration,
                }),
                Err(err) => failures.push(JobFailure {
                    job_id: report.job_id,
                    identifier: report.identifier,
                    error: err.to_string(),
                    worker_id: report.worker_id,
                    duration: report.duration,
                }),
            }
        }

        let duration = started.elapsed();
        info!(
            succeeded = successes.len(),
            failed = failures.len(),
            elapsed_ms = duration_ms(duration),
            "identifiers processed"
        );

        PoolResult {
            successes,
            failures,
            duration,
            total_identifiers,
            workers_used: self.worker_count,
        }
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.worker_count)
    }

    /// Stop the pool.
    ///
    /// Every queued or running job is reported as abandoned, idle units are
    /// joined and busy units are detached; they exit once their current job
    /// returns. Later submissions fail with `PoolShutdown`.
    pub fn terminate(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("terminating worker pool");
        let _ = self.inbox.send(Inbox::Terminate);

        if let Some(handle) = self.supervisor.lock().take() {
            if handle.join().is_err() {
                error!("pool supervisor panicked");
            }
        }
    }
}

impl<R, E> Drop for WorkerPool<R, E>
where
    R: Send + 'static,
    E: UnitExecutor<R>,
{
    fn drop(&mut self) {
        // Signal only; joining here could hang a dropping caller.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            let _ = self.inbox.send(Inbox::Terminate);
            debug!("worker pool dropped without terminate; supervisor detached");
        }
    }
}

/// Spawn a unit and wait for its liveness probe.
fn start_unit<R, E>(
    worker_id: usize,
    generation: u64,
    executor: &E,
    events: &Sender<Inbox<R>>,
    config: &WorkerPoolConfig,
) -> Result<UnitHandle, PoolError>
where
    R: Send + 'static,
    E: UnitExecutor<R>,
{
    let unit = spawn_unit(
        worker_id,
        generation,
        executor.clone(),
        events.clone(),
        config.thread_stack_size,
    )?;
    // On failure the handle is dropped, which closes the unit's channel.
    probe(&unit, worker_id, config.probe_timeout())?;
    Ok(unit)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    Busy(JobId),
    /// Waiting for a replacement unit.
    Dead {
        since: Instant,
    },
}

struct Slot {
    worker_id: usize,
    generation: u64,
    state: SlotState,
    unit: Option<UnitHandle>,
}

impl Slot {
    const fn live(worker_id: usize, generation: u64, unit: UnitHandle) -> Self {
        Self {
            worker_id,
            generation,
            state: SlotState::Idle,
            unit: Some(unit),
        }
    }

    fn is_idle(&self) -> bool {
        self.state == SlotState::Idle
    }
}

struct Pending<R> {
    identifier: String,
    enqueued_at: Instant,
    worker_id: Option<usize>,
    reply: oneshot::Sender<JobReport<R>>,
}

struct Supervisor<R, E> {
    slots: Vec<Slot>,
    queue: VecDeque<Job>,
    pending: HashMap<JobId, Pending<R>>,
    executor: E,
    inbox: Receiver<Inbox<R>>,
    /// Cloned into replacement units.
    events: Sender<Inbox<R>>,
    counters: Arc<PoolCounters>,
    config: WorkerPoolConfig,
}

impl<R, E> Supervisor<R, E>
where
    R: Send + 'static,
    E: UnitExecutor<R>,
{
    fn run(mut self) {
        let tick = self.config.supervisor_tick();
        debug!(slots = self.slots.len(), "pool supervisor started");

        loop {
            match self.inbox.recv_timeout(tick) {
                Ok(Inbox::Submit {
                    job,
                    enqueued_at,
                    reply,
                }) => self.accept(job, enqueued_at, reply),
                Ok(Inbox::Unit(event)) => self.on_unit_event(event),
                Ok(Inbox::Terminate) | Err(RecvTimeoutError::Disconnected) => break,
                // The tick only gives dead slots another chance.
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.dispatch();
            self.publish();
        }

        self.shutdown();
    }

    fn accept(&mut self, job: Job, enqueued_at: Instant, reply: oneshot::Sender<JobReport<R>>) {
        self.pending.insert(
            job.id,
            Pending {
                identifier: job.identifier.clone(),
                enqueued_at,
                worker_id: None,
                reply,
            },
        );
        self.queue.push_back(job);
    }

    fn on_unit_event(&mut self, event: UnitEvent<R>) {
        let UnitEvent {
            worker_id,
            generation,
            kind,
        } = event;

        let Some(slot) = self.slots.get(worker_id) else {
            warn!(worker_id, "event for unknown slot");
            return;
        };
        if slot.generation != generation {
            debug!(worker_id, generation, current = slot.generation, "stale unit event ignored");
            return;
        }

        match kind {
            UnitEventKind::JobComplete { job_id, record } => {
                self.release(worker_id, job_id);
                self.finish(job_id, Some(worker_id), |_| Ok(record));
            }
            UnitEventKind::JobError { job_id, error } => {
                self.release(worker_id, job_id);
                self.finish(job_id, Some(worker_id), |identifier| {
                    Err(JobError::Failed {
                        identifier: identifier.to_string(),
                        message: error,
                    })
                });
            }
            UnitEventKind::UnitExited { reason } => self.on_unit_exit(worker_id, reason),
        }
    }

    fn release(&mut self, worker_id: usize, job_id: JobId) {
        let slot = &mut self.slots[worker_id];
        if slot.state == SlotState::Busy(job_id) {
            slot.state = SlotState::Idle;
        } else {
            warn!(worker_id, job_id, state = ?slot.state, "report does not match slot state");
        }
    }

    /// Deliver the one and only report for `job_id`.
    fn finish<F>(&mut self, job_id: JobId, worker_id: Option<usize>, outcome: F)
    where
        F: FnOnce(&str) -> Result<R, JobError>,
    {
        let Some(pending) = self.pending.remove(&job_id) else {
            warn!(job_id, "report for unknown job");
            return;
        };

        let outcome = outcome(&pending.identifier);
        match &outcome {
            Ok(_) => {
                self.counters.completed_jobs.fetch_add(1, Ordering::Relaxed);
                debug!(
                    job_id,
                    worker_id = ?worker_id,
                    identifier = %pending.identifier,
                    "job completed"
                );
            }
            Err(err) => {
                self.counters.failed_jobs.fetch_add(1, Ordering::Relaxed);
                debug!(job_id, worker_id = ?worker_id, error = %err, "job failed");
            }
        }

        let report = JobReport {
            job_id: Some(job_id),
            identifier: pending.identifier,
            worker_id: worker_id.or(pending.worker_id),
            duration: pending.enqueued_at.elapsed(),
            outcome,
        };
        if pending.reply.send(report).is_err() {
            debug!(job_id, "caller stopped waiting before the report");
        }
    }

    fn on_unit_exit(&mut self, worker_id: usize, reason: String) {
        let slot = &mut self.slots[worker_id];
        let previous = slot.state;
        if let SlotState::Dead { .. } = previous {
            // Already waiting for a replacement.
            return;
        }

        slot.state = SlotState::Dead {
            since: Instant::now(),
        };
        // The thread has returned or is about to; detach it.
        drop(slot.unit.take());

        match previous {
            SlotState::Busy(job_id) => {
                error!(worker_id, job_id, reason = %reason, "unit crashed while holding a job");
                self.finish(job_id, Some(worker_id), |identifier| {
                    Err(JobError::UnitCrashed {
                        worker_id,
                        identifier: identifier.to_string(),
                        message: reason,
                    })
                });
            }
            _ => warn!(worker_id, reason = %reason, "idle unit exited"),
        }

        self.replace(worker_id);
    }

    /// Start a fresh unit in `worker_id`'s slot.
    fn replace(&mut self, worker_id: usize) {
        let slot = &mut self.slots[worker_id];
        let generation = slot.generation + 1;
        slot.generation = generation;

        match start_unit(worker_id, generation, &self.executor, &self.events, &self.config) {
            Ok(unit) => {
                slot.unit = Some(unit);
                slot.state = SlotState::Idle;
                self.counters.replaced_workers.fetch_add(1, Ordering::Relaxed);
                info!(worker_id, generation, "unit replaced");
            }
            Err(err) => {
                slot.state = SlotState::Dead {
                    since: Instant::now(),
                };
                error!(worker_id, generation, error = %err, "unit replacement failed, will retry");
            }
        }
    }

    fn revive_dead(&mut self) {
        let tick = self.config.supervisor_tick();
        let due: Vec<usize> = self
            .slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Dead { since } if since.elapsed() >= tick))
            .map(|s| s.worker_id)
            .collect();
        for worker_id in due {
            self.replace(worker_id);
        }
    }

    /// Greedy FIFO: hand queued jobs to idle units, head first.
    fn dispatch(&mut self) {
        self.revive_dead();

        while !self.queue.is_empty() {
            let Some(worker_id) = self.slots.iter().position(Slot::is_idle) else {
                break;
            };
            let Some(job) = self.queue.pop_front() else {
                break;
            };
            let job_id = job.id;
            let slot = &mut self.slots[worker_id];

            let Some(unit) = slot.unit.as_ref() else {
                slot.state = SlotState::Dead {
                    since: Instant::now(),
                };
                self.queue.push_front(job);
                continue;
            };

            if let Err(err) = unit.commands.send(UnitCommand::Run(job)) {
                warn!(worker_id, job_id, "unit channel closed, requeueing job");
                if let UnitCommand::Run(job) = err.into_inner() {
                    self.queue.push_front(job);
                }
                slot.unit = None;
                slot.state = SlotState::Dead {
                    since: Instant::now(),
                };
                continue;
            }

            slot.state = SlotState::Busy(job_id);
            if let Some(pending) = self.pending.get_mut(&job_id) {
                pending.worker_id = Some(worker_id);
            }
            debug!(worker_id, job_id, "job dispatched");
        }
    }

    fn publish(&self) {
        let busy = self
            .slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Busy(_)))
            .count();
        let dead = self
            .slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Dead { .. }))
            .count();

        self.counters.busy_workers.store(busy, Ordering::Relaxed);
        self.counters.dead_workers.store(dead, Ordering::Relaxed);
        self.counters.queued_jobs.store(self.queue.len(), Ordering::Relaxed);
        self.counters
            .pending_jobs
            .store(self.pending.len(), Ordering::Relaxed);
    }

    fn shutdown(mut self) {
        let abandoned = self.pending.len();
        self.queue.clear();

        for (job_id, pending) in self.pending.drain() {
            self.counters.failed_jobs.fetch_add(1, Ordering::Relaxed);
            let report = JobReport {
                job_id: Some(job_id),
                identifier: pending.identifier.clone(),
                worker_id: pending.worker_id,
                duration: pending.enqueued_at.elapsed(),
                outcome: Err(JobError::Abandoned {
                    identifier: pending.identifier,
                }),
            };
            let _ = pending.reply.send(report);
        }

        let mut joined = 0;
        for slot in self.slots.drain(..) {
            let Some(unit) = slot.unit else { continue };
            let UnitHandle { commands, thread } = unit;
            // Closing the channel ends the unit's receive loop.
            drop(commands);
            if slot.state == SlotState::Idle {
                if thread.join().is_err() {
                    warn!(worker_id = slot.worker_id, "unit panicked during shutdown");
                }
                joined += 1;
            } else {
                debug!(worker_id = slot.worker_id, "busy unit detached");
            }
        }

        self.publish();
        info!(abandoned, joined, "worker pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CollectorError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone)]
    struct Upper {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl UnitExecutor<String> for Upper {
        async fn execute(&self, job: &Job) -> Result<String, CollectorError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(job.identifier.to_uppercase())
        }
    }

    fn pool(workers: usize) -> (WorkerPool<String, Upper>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::initialize(
            WorkerPoolConfig::new().with_worker_count(workers),
            Upper {
                calls: Arc::clone(&calls),
            },
        )
        .unwrap();
        (pool, calls)
    }

    #[tokio::test]
    async fn test_submit_returns_record() {
        let (pool, calls) = pool(2);
        assert_eq!(pool.submit("vnm").await.unwrap(), "VNM");
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        let stats = pool.stats();
        assert_eq!(stats.submitted_jobs, 1);
        assert_eq!(stats.completed_jobs, 1);
        pool.terminate();
    }

    #[tokio::test]
    async fn test_job_ids_increase_from_one() {
        let (pool, _) = pool(1);
        let first = pool.enqueue("a").unwrap();
        let second = pool.enqueue("b").unwrap();
        assert_eq!(first.job_id(), 1);
        assert_eq!(second.job_id(), 2);
        assert!(first.wait().await.outcome.is_ok());
        assert!(second.wait().await.outcome.is_ok());
        pool.terminate();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = WorkerPool::initialize(
            WorkerPoolConfig::new().with_worker_count(0),
            Upper { calls },
        );
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_submit_after_terminate() {
        let (pool, calls) = pool(2);
        pool.terminate();
        assert_eq!(pool.submit("fpt").await, Err(JobError::PoolShutdown));
        assert!(matches!(pool.enqueue("fpt"), Err(PoolError::PoolShutdown)));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }
}
