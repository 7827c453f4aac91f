//! Configuration models for the pool, retries, phases and triggers.

pub mod collector;
pub mod pool;

pub use collector::{CollectorConfig, PipelineConfig, SheetConfig, SourceConfig, TriggerConfig};
pub use pool::{RetryConfig, WorkerPoolConfig};
