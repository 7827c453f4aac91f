//! Integration tests for the collection scheduler.
//!
//! These tests validate:
//! - At most one pipeline run in flight; overlapping requests are skipped
//! - Manual runs propagate identifier load failures
//! - start / stop are idempotent and reflected in status
//! - Timer-driven fires run the pipeline

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Asia::Ho_Chi_Minh;
use common::{BrokenIdentifiers, FakeProfiles, Harness};
use ticker_collector::config::TriggerConfig;
use ticker_collector::core::{
    CollectionScheduler, CollectorError, RunKind, RunOutcome, TriggerKind,
};

fn default_triggers() -> Vec<TriggerConfig> {
    vec![
        TriggerConfig::new("morning", "0 8 * * *", TriggerKind::FullPipeline),
        TriggerConfig::new("evening", "0 20 * * *", TriggerKind::FullPipeline),
        TriggerConfig::new("technical", "*/30 9-15 * * Mon-Fri", TriggerKind::IndicatorRefresh),
    ]
}

fn scheduler_for(harness: &Harness, triggers: &[TriggerConfig]) -> CollectionScheduler {
    CollectionScheduler::new(Arc::new(harness.pipeline()), triggers, Ho_Chi_Minh).unwrap()
}

#[tokio::test]
async fn test_overlapping_runs_are_skipped() {
    let mut harness = Harness::new(&["VNM", "FPT"]);
    harness.profiles = Arc::new(FakeProfiles {
        delay: Duration::from_millis(300),
        ..FakeProfiles::default()
    });
    let scheduler = scheduler_for(&harness, &default_triggers());

    let (first, second, third) = tokio::join!(
        scheduler.trigger_manually(),
        scheduler.trigger_manually(),
        scheduler.run_now(TriggerKind::IndicatorRefresh),
    );

    assert!(matches!(first.unwrap(), RunOutcome::Completed(_)));
    assert_eq!(second.unwrap(), RunOutcome::Skipped);
    assert_eq!(third.unwrap(), RunOutcome::Skipped);
    assert_eq!(harness.profiles.calls.load(Ordering::SeqCst), 2);
    assert!(!scheduler.is_running());
    let status = scheduler.status();
    assert_eq!((status.completed_runs, status.skipped_runs), (1, 2));

    // The guard is released once the run ends.
    let again = scheduler.run_now(TriggerKind::IndicatorRefresh).await.unwrap();
    assert_eq!(again.summary().unwrap().kind, RunKind::IndicatorRefresh);
    assert_eq!(scheduler.last_summary().unwrap().kind, RunKind::IndicatorRefresh);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_manual_run_propagates_load_failure() {
    let mut harness = Harness::new(&[]);
    harness.identifiers = Arc::new(BrokenIdentifiers);
    let scheduler = scheduler_for(&harness, &default_triggers());

    let err = scheduler.trigger_manually().await.unwrap_err();
    assert!(matches!(err, CollectorError::InvalidPayload(_)));
    assert!(!scheduler.is_running());
    assert!(scheduler.last_summary().is_none());

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_status_reflects_start_and_stop() {
    let harness = Harness::new(&["VNM"]);
    let scheduler = scheduler_for(&harness, &default_triggers());

    let idle = scheduler.status();
    assert_eq!(idle.timezone, "Asia/Ho_Chi_Minh");
    assert_eq!(idle.triggers.len(), 3);
    assert!(idle.triggers.iter().all(|t| !t.active));
    assert!(idle.next_runs.is_empty());
    assert!(!idle.pipeline_running);

    scheduler.start();
    scheduler.start();
    let running = scheduler.status();
    assert!(running.triggers.iter().all(|t| t.active));
    assert_eq!(running.next_runs.len(), 3);
    assert!(running
        .next_runs
        .windows(2)
        .all(|pair| pair[0].at <= pair[1].at));
    for trigger in &running.triggers {
        assert!(trigger.next_run.is_some());
        assert!(trigger.description.contains("Asia/Ho_Chi_Minh"));
        let until = trigger.time_until.as_deref().unwrap();
        assert!(until.ends_with('m'), "{until}");
    }

    let morning = &running.triggers[0];
    assert_eq!(morning.expression, "0 8 * * *");
    assert!(morning.next_run.as_deref().unwrap().contains("T08:00:00+07:00"));

    scheduler.stop();
    scheduler.stop();
    let stopped = scheduler.status();
    assert!(stopped.triggers.iter().all(|t| !t.active));
    assert!(stopped.next_runs.is_empty());

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_trigger_names_rejected() {
    let harness = Harness::new(&["VNM"]);
    let triggers = vec![
        TriggerConfig::new("daily", "0 8 * * *", TriggerKind::FullPipeline),
        TriggerConfig::new("daily", "0 20 * * *", TriggerKind::FullPipeline),
    ];

    let result = CollectionScheduler::new(Arc::new(harness.pipeline()), &triggers, Ho_Chi_Minh);
    assert!(matches!(result, Err(CollectorError::Config(_))));
}

#[tokio::test]
async fn test_trigger_fires_pipeline() {
    let harness = Harness::new(&["VNM", "FPT"]);
    let triggers = vec![TriggerConfig::new(
        "every-second",
        "* * * * * *",
        TriggerKind::IndicatorRefresh,
    )];
    let scheduler = scheduler_for(&harness, &triggers);

    scheduler.start();
    let mut summary = None;
    for _ in 0..60 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        summary = scheduler.last_summary();
        if summary.is_some() {
            break;
        }
    }
    scheduler.shutdown().await;

    let summary = summary.expect("trigger never fired");
    assert_eq!(summary.kind, RunKind::IndicatorRefresh);
    assert!(harness.indicator_store.len() >= 2);
}

#[tokio::test]
async fn test_timer_fire_during_manual_run_is_skipped() {
    let mut harness = Harness::new(&["VNM"]);
    harness.profiles = Arc::new(FakeProfiles {
        delay: Duration::from_millis(2_500),
        ..FakeProfiles::default()
    });
    let triggers = vec![TriggerConfig::new(
        "every-second",
        "* * * * * *",
        TriggerKind::FullPipeline,
    )];
    let scheduler = scheduler_for(&harness, &triggers);

    let manual = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.trigger_manually().await }
    });
    for _ in 0..50 {
        if scheduler.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(scheduler.is_running());

    // Let exactly one timer fire hit the guard, then silence the trigger.
    scheduler.start();
    for _ in 0..80 {
        if scheduler.status().skipped_runs > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    scheduler.stop();

    let outcome = manual.await.unwrap().unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));

    let status = scheduler.status();
    assert_eq!(status.completed_runs, 1);
    assert_eq!(status.skipped_runs, 1);
    assert_eq!(harness.profiles.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        scheduler.last_summary().unwrap().run_id,
        outcome.summary().unwrap().run_id
    );

    scheduler.shutdown().await;
}
