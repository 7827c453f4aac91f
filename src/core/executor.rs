//! Collaborator traits and the fetch-then-persist unit executor.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::retry::RetryPolicy;
use crate::core::worker_pool::Job;
use crate::core::CollectorError;

/// Remote data source: fetch one value for a key.
///
/// Implementations may fail transiently and give no fairness guarantee across
/// concurrent callers. Rate limiting is the caller's problem.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use ticker_collector::core::{CollectorError, RemoteSource};
///
/// struct Echo;
///
/// #[async_trait]
/// impl RemoteSource<str, String> for Echo {
///     async fn fetch(&self, key: &str) -> Result<String, CollectorError> {
///         Ok(key.to_uppercase())
///     }
/// }
/// ```
#[async_trait]
pub trait RemoteSource<K, T>: Send + Sync
where
    K: ?Sized + Sync,
    T: Send + 'static,
{
    /// Fetch the value identified by `key`.
    async fn fetch(&self, key: &K) -> Result<T, CollectorError>;
}

/// Persistence sink with idempotent upsert keyed by a natural identifier.
///
/// Repeated upserts of the same key are last-write-wins.
#[async_trait]
pub trait PersistenceSink<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Store one record and return what was saved.
    async fn upsert(&self, record: T) -> Result<T, CollectorError>;

    /// Store many records, returning how many were saved.
    ///
    /// The default stops at the first failing record.
    async fn upsert_many(&self, records: Vec<T>) -> Result<usize, CollectorError> {
        let mut saved = 0;
        for record in records {
            self.upsert(record).await?;
            saved += 1;
        }
        Ok(saved)
    }
}

/// Source of the identifier list for one pipeline run.
#[async_trait]
pub trait IdentifierSource: Send + Sync {
    /// Load the identifiers to collect.
    async fn load(&self) -> Result<Vec<String>, CollectorError>;
}

/// Work performed by an execution unit for one dispatched job.
///
/// Called from a dedicated unit thread with its own single-threaded tokio
/// runtime, so blocking inside `execute` only stalls that unit.
#[async_trait]
pub trait UnitExecutor<R>: Send + Sync + Clone + 'static
where
    R: Send + 'static,
{
    /// Run the job and return its record.
    async fn execute(&self, job: &Job) -> Result<R, CollectorError>;
}

/// Fetch a record through a retry policy, then upsert it once.
pub struct FetchAndPersist<T>
where
    T: Send + 'static,
{
    source: Arc<dyn RemoteSource<str, T>>,
    sink: Arc<dyn PersistenceSink<T>>,
    retry: RetryPolicy,
}

impl<T> Clone for FetchAndPersist<T>
where
    T: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            sink: Arc::clone(&self.sink),
            retry: self.retry,
        }
    }
}

impl<T> FetchAndPersist<T>
where
    T: Send + 'static,
{
    /// Combine a source, a sink and the retry policy for the fetch side.
    pub fn new(
        source: Arc<dyn RemoteSource<str, T>>,
        sink: Arc<dyn PersistenceSink<T>>,
        retry: RetryPolicy,
    ) -> Self {
        Self { source, sink, retry }
    }
}

#[async_trait]
impl<T> UnitExecutor<T> for FetchAndPersist<T>
where
    T: Send + 'static,
{
    async fn execute(&self, job: &Job) -> Result<T, CollectorError> {
        let source = &self.source;
        let identifier = job.identifier.as_str();

        let record = self
            .retry
            .run(identifier, move || source.fetch(identifier))
            .await?;

        // Persistence is not retried; the sink owns its durability.
        self.sink.upsert(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FlakySource {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl RemoteSource<str, String> for FlakySource {
        async fn fetch(&self, key: &str) -> Result<String, CollectorError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.fail_first {
                return Err(CollectorError::Fetch("timeout".into()));
            }
            Ok(format!("record:{key}"))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        saved: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl PersistenceSink<String> for RecordingSink {
        async fn upsert(&self, record: String) -> Result<String, CollectorError> {
            if self.fail {
                return Err(CollectorError::Persist("constraint violation".into()));
            }
            self.saved.lock().push(record.clone());
            Ok(record)
        }
    }

    fn job(identifier: &str) -> Job {
        Job::new(1, identifier.to_string())
    }

    #[tokio::test]
    async fn test_fetch_retried_then_persisted() {
        let source = Arc::new(FlakySource {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let sink = Arc::new(RecordingSink::default());
        let executor = FetchAndPersist::new(
            source.clone(),
            sink.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );

        let saved = executor.execute(&job("VNM")).await.unwrap();
        assert_eq!(saved, "record:VNM");
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.saved.lock().as_slice(), ["record:VNM".to_string()]);
    }

    #[tokio::test]
    async fn test_persist_error_not_retried() {
        let source = Arc::new(FlakySource {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let sink = Arc::new(RecordingSink {
            saved: Mutex::new(Vec::new()),
            fail: true,
        });
        let executor = FetchAndPersist::new(
            source.clone(),
            sink,
            RetryPolicy::new(3, Duration::from_millis(1)),
        );

        let err = executor.execute(&job("FPT")).await.unwrap_err();
        assert!(matches!(err, CollectorError::Persist(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upsert_many_counts_saved() {
        let sink = RecordingSink::default();
        let saved = sink
            .upsert_many(vec!["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(saved, 3);
    }
}
