//! Builders wiring configuration and collaborators into a running scheduler.

pub mod scheduler_builder;

pub use scheduler_builder::{build_pipeline, build_scheduler, http_collaborators, MemoryStores};
