//! Core execution engine: retries, execution units, the worker pool, the
//! collection pipeline and its scheduler.

pub mod error;
pub mod executor;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod trigger;
pub mod worker_pool;

pub use error::{AppResult, CollectorError};
pub use executor::{FetchAndPersist, IdentifierSource, PersistenceSink, RemoteSource, UnitExecutor};
pub use pipeline::{
    Collaborators, PhaseFailure, PhaseKind, PhaseStatus, PhaseSummary, Pipeline, PipelineSummary,
    ProfilePool, RunKind,
};
pub use retry::{with_retry, RetryPolicy};
pub use scheduler::{CollectionScheduler, NextRun, RunOutcome, SchedulerStatus, TriggerStatus};
pub use trigger::{time_until, TriggerExpression, TriggerKind};
pub use worker_pool::{
    Job, JobError, JobFailure, JobHandle, JobId, JobReport, JobSuccess, PoolError, PoolResult,
    PoolStats, WorkerPool,
};
