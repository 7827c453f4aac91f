//! In-memory persistence sinks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::{CollectorError, PersistenceSink};
use crate::models::Keyed;

/// Keyed last-write-wins store for development and tests.
pub struct InMemorySink<T> {
    records: RwLock<HashMap<String, T>>,
    writes: AtomicU64,
}

impl<T> Default for InMemorySink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InMemorySink<T> {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Distinct keys stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Upserts accepted, including overwrites.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl<T: Clone> InMemorySink<T> {
    /// Record stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<T> {
        self.records.read().get(key).cloned()
    }

    /// All stored records, in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.records.read().values().cloned().collect()
    }
}

#[async_trait]
impl<T> PersistenceSink<T> for InMemorySink<T>
where
    T: Keyed + Clone + Send + Sync + 'static,
{
    async fn upsert(&self, record: T) -> Result<T, CollectorError> {
        self.records.write().insert(record.key(), record.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(record)
    }
}
