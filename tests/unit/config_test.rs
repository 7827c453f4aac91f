//! Tests for configuration validation

use std::collections::HashMap;

use ticker_collector::config::{CollectorConfig, RetryConfig, WorkerPoolConfig};
use ticker_collector::core::TriggerKind;
use ticker_collector::models::IndicatorTimeframe;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults_match_deployment() {
    let config = CollectorConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.pool.worker_count, 128);
    assert_eq!(config.retry, RetryConfig::default());
    assert_eq!(config.timezone, "Asia/Ho_Chi_Minh");

    let kinds: Vec<TriggerKind> = config.triggers.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TriggerKind::FullPipeline,
            TriggerKind::FullPipeline,
            TriggerKind::IndicatorRefresh
        ]
    );
}

#[test]
fn test_environment_overrides() {
    let config = CollectorConfig::from_lookup(lookup(&[
        ("WORKER_COUNT", "16"),
        ("MAX_RETRY_ATTEMPTS", "5"),
        ("CRON_SCHEDULE_MORNING", "30 7 * * 1-5"),
        ("SCHEDULER_TIMEZONE", "Asia/Bangkok"),
        ("TECHNICAL_TIMEFRAME", "one_day"),
    ]))
    .unwrap();

    assert_eq!(config.pool.worker_count, 16);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.triggers[0].expression, "30 7 * * 1-5");
    assert_eq!(config.timezone, "Asia/Bangkok");
    assert_eq!(config.pipeline.indicator_timeframe, IndicatorTimeframe::OneDay);
}

#[test]
fn test_environment_rejects_bad_values() {
    for (key, value) in [
        ("WORKER_COUNT", "many"),
        ("SCHEDULER_TIMEZONE", "Mars/Olympus"),
        ("CRON_SCHEDULE_EVENING", "every night"),
    ] {
        assert!(CollectorConfig::from_lookup(lookup(&[(key, value)])).is_err(), "{key}");
    }
}

#[test]
fn test_pool_config_validation() {
    assert!(WorkerPoolConfig::new().validate().is_ok());
    assert!(WorkerPoolConfig::new().with_worker_count(0).validate().is_err());
    assert!(WorkerPoolConfig::new().with_probe_timeout_ms(0).validate().is_err());
}

#[test]
fn test_json_config_partial() {
    let config = CollectorConfig::from_json_str(
        r#"{"pool": {"worker_count": 8}, "identifiers_file": "/data/tickers.json"}"#,
    )
    .unwrap();
    assert_eq!(config.pool.worker_count, 8);
    assert_eq!(config.pool.probe_timeout_ms, 5000);
    assert_eq!(config.identifiers_file.to_str(), Some("/data/tickers.json"));
}
