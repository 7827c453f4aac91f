//! # Ticker Collector
//!
//! A concurrent collection engine for market reference data.
//!
//! The engine fans per-identifier work out to a fixed pool of isolated
//! execution units, runs a five-phase collection pipeline in which each
//! phase is contained, and fires that pipeline from timezone-aware cron
//! triggers with at most one run in flight.
//!
//! ## WorkerPool - isolated execution units
//!
//! Each unit is a dedicated OS thread with its own single-threaded tokio
//! runtime. Jobs are dispatched FIFO to idle units by a supervisor thread.
//! A unit that panics is replaced, its in-flight job is reported as failed,
//! and the pool keeps its capacity.
//!
//! ```rust,ignore
//! use ticker_collector::config::WorkerPoolConfig;
//! use ticker_collector::core::WorkerPool;
//!
//! let pool = WorkerPool::initialize(WorkerPoolConfig::new().with_worker_count(8), executor)?;
//! let result = pool.process_all(["VNM", "FPT", "HPG"]).await;
//! println!("{} ok, {} failed", result.success_count(), result.failure_count());
//! pool.terminate();
//! ```
//!
//! ## Pipeline and scheduler
//!
//! ```rust,ignore
//! use ticker_collector::builders::{build_scheduler, http_collaborators};
//! use ticker_collector::config::CollectorConfig;
//!
//! let config = CollectorConfig::from_env()?;
//! let (collaborators, _stores) = http_collaborators(&config)?;
//! let scheduler = build_scheduler(&config, collaborators)?;
//! scheduler.start();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Retries, execution units, the worker pool, the pipeline and the scheduler.
pub mod core;
/// Configuration models for the pool, retries, phases and triggers.
pub mod config;
/// Builders wiring configuration and collaborators together.
pub mod builders;
/// Infrastructure adapters for remote sources and persistence.
pub mod infra;
/// Domain records.
pub mod models;
/// Shared utilities.
pub mod util;
