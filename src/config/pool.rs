//! Worker pool and retry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Requested number of execution units.
    pub worker_count: usize,
    /// Cap on units per hardware thread.
    pub max_workers_per_cpu: usize,
    /// Liveness probe timeout in milliseconds.
    pub probe_timeout_ms: u64,
    /// Stack size of each unit thread in bytes.
    pub thread_stack_size: usize,
    /// How often the supervisor retries reviving dead slots, in milliseconds.
    pub supervisor_tick_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 128,
            max_workers_per_cpu: 4,
            probe_timeout_ms: 5_000,
            thread_stack_size: 2 * 1024 * 1024,
            supervisor_tick_ms: 1_000,
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the requested number of units.
    #[must_use]
    pub const fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the per-CPU cap multiplier.
    #[must_use]
    pub const fn with_max_workers_per_cpu(mut self, max: usize) -> Self {
        self.max_workers_per_cpu = max;
        self
    }

    /// Set the liveness probe timeout.
    #[must_use]
    pub const fn with_probe_timeout_ms(mut self, ms: u64) -> Self {
        self.probe_timeout_ms = ms;
        self
    }

    /// Set the unit thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Set the supervisor tick.
    #[must_use]
    pub const fn with_supervisor_tick_ms(mut self, ms: u64) -> Self {
        self.supervisor_tick_ms = ms;
        self
    }

    /// Units actually started: the requested count capped at
    /// `num_cpus * max_workers_per_cpu`, never below one.
    #[must_use]
    pub fn effective_worker_count(&self) -> usize {
        let cap = num_cpus::get().saturating_mul(self.max_workers_per_cpu);
        self.worker_count.min(cap).max(1)
    }

    /// Liveness probe timeout as a `Duration`.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Supervisor tick as a `Duration`.
    #[must_use]
    pub const fn supervisor_tick(&self) -> Duration {
        Duration::from_millis(self.supervisor_tick_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_workers_per_cpu == 0 {
            return Err("max_workers_per_cpu must be greater than 0".into());
        }
        if self.probe_timeout_ms == 0 {
            return Err("probe_timeout_ms must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.supervisor_tick_ms == 0 {
            return Err("supervisor_tick_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Retry settings for remote fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1_000,
        }
    }
}

impl RetryConfig {
    /// Validate retry values.
    ///
    /// # Errors
    ///
    /// Returns a message if `max_attempts` is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = WorkerPoolConfig::new();
        assert_eq!(cfg.worker_count, 128);
        assert_eq!(cfg.probe_timeout(), Duration::from_secs(5));
        assert!(cfg.validate().is_ok());
        assert!(RetryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_effective_worker_count_is_capped() {
        let cap = num_cpus::get() * 4;
        let cfg = WorkerPoolConfig::new().with_worker_count(cap + 100);
        assert_eq!(cfg.effective_worker_count(), cap);

        let cfg = WorkerPoolConfig::new().with_worker_count(1);
        assert_eq!(cfg.effective_worker_count(), 1);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let err = WorkerPoolConfig::new().with_worker_count(0).validate();
        assert_eq!(err, Err("worker_count must be greater than 0".to_string()));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: WorkerPoolConfig = serde_json::from_str(r#"{"worker_count": 8}"#).unwrap();
        assert_eq!(cfg.worker_count, 8);
        assert_eq!(cfg.max_workers_per_cpu, 4);
    }
}
