//! Tests for error types

use std::time::Duration;

use ticker_collector::core::{CollectorError, JobError, PoolError};

#[test]
fn test_retries_exhausted_error() {
    let err = CollectorError::RetriesExhausted {
        attempts: 3,
        last: Box::new(CollectorError::Fetch("HTTP 503".to_string())),
    };
    assert_eq!(format!("{}", err), "failed after 3 attempts: fetch failed: HTTP 503");
    assert_eq!(err.attempts(), 3);
}

#[test]
fn test_unretried_error_counts_one_attempt() {
    let err = CollectorError::Persist("duplicate key".to_string());
    assert_eq!(err.attempts(), 1);
    assert_eq!(format!("{}", err), "persist failed: duplicate key");
}

#[test]
fn test_pool_error_converts() {
    let err: CollectorError = PoolError::InitTimeout {
        worker_id: 7,
        timeout: Duration::from_secs(5),
    }
    .into();
    assert_eq!(
        format!("{}", err),
        "pool error: worker 7 failed to initialize within 5s"
    );
}

#[test]
fn test_job_error_messages() {
    let crashed = JobError::UnitCrashed {
        worker_id: 2,
        identifier: "VNM".to_string(),
        message: "boom".to_string(),
    };
    assert_eq!(format!("{}", crashed), "worker 2 crashed while processing VNM: boom");

    let abandoned = JobError::Abandoned {
        identifier: "FPT".to_string(),
    };
    assert_eq!(format!("{}", abandoned), "FPT: abandoned by pool termination");
}
