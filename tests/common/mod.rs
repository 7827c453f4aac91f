//! In-process fakes for the collaborator traits.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use ticker_collector::config::{PipelineConfig, WorkerPoolConfig};
use ticker_collector::core::{
    Collaborators, CollectorError, IdentifierSource, Pipeline, RemoteSource, RetryPolicy,
};
use ticker_collector::infra::{InMemorySink, StaticIdentifiers};
use ticker_collector::models::{
    ForeignFlowEntry, ImpactEntry, IndicatorLine, IndicatorRequest, IndicatorSnapshot,
    InstrumentProfile, PricePoint, SeriesRequest,
};

/// Profile source failing or panicking for fixed sets of identifiers.
#[derive(Default)]
pub struct FakeProfiles {
    pub failing: HashSet<String>,
    /// Panic inside the execution unit for these.
    pub panicking: HashSet<String>,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

#[async_trait]
impl RemoteSource<str, InstrumentProfile> for FakeProfiles {
    async fn fetch(&self, identifier: &str) -> Result<InstrumentProfile, CollectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panicking.contains(identifier) {
            panic!("profile decoder crashed on {identifier}");
        }
        if self.failing.contains(identifier) {
            return Err(CollectorError::Fetch(format!("{identifier}: HTTP 503")));
        }
        Ok(InstrumentProfile::bare(identifier))
    }
}

/// Price source returning `size` points per request, or failing every call.
#[derive(Default)]
pub struct FakePrices {
    pub fail_all: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl RemoteSource<SeriesRequest, Vec<PricePoint>> for FakePrices {
    async fn fetch(&self, request: &SeriesRequest) -> Result<Vec<PricePoint>, CollectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all {
            return Err(CollectorError::Fetch("connection reset".into()));
        }
        Ok((0..i64::from(request.size))
            .map(|day| PricePoint {
                ticker: request.identifier.clone(),
                date: 1_700_000_000 + day * 86_400,
                open: 10.0,
                high: 11.0,
                low: 9.5,
                close: 10.5,
                volume: 1_000.0,
                kind: request.kind(),
            })
            .collect())
    }
}

/// What a bulk dataset fake does when fetched.
#[derive(Clone)]
pub enum DatasetBehavior<T> {
    Rows(Vec<T>),
    Fail,
    Panic,
}

/// Bulk dataset source.
pub struct FakeDataset<T> {
    pub behavior: DatasetBehavior<T>,
    pub calls: AtomicUsize,
}

impl<T> FakeDataset<T> {
    pub fn new(behavior: DatasetBehavior<T>) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<T> RemoteSource<(), Vec<T>> for FakeDataset<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn fetch(&self, _: &()) -> Result<Vec<T>, CollectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            DatasetBehavior::Rows(rows) => Ok(rows.clone()),
            DatasetBehavior::Fail => Err(CollectorError::Fetch("sheet unavailable".into())),
            DatasetBehavior::Panic => panic!("dataset parser exploded"),
        }
    }
}

/// Indicator source with per-identifier behavior.
#[derive(Default)]
pub struct FakeIndicators {
    /// Answer "no data" for these.
    pub missing: HashSet<String>,
    /// Answer a snapshot without any lines or pivot for these.
    pub blank: HashSet<String>,
    /// Fail for these.
    pub failing: HashSet<String>,
    /// Answer these after a 300 ms pause.
    pub slow: HashSet<String>,
    /// Identifiers in the order their fetch returned.
    pub finished: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl RemoteSource<IndicatorRequest, Option<IndicatorSnapshot>> for FakeIndicators {
    async fn fetch(
        &self,
        request: &IndicatorRequest,
    ) -> Result<Option<IndicatorSnapshot>, CollectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = request.identifier.as_str();
        if self.slow.contains(id) {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        self.finished.lock().push(id.to_string());
        if self.failing.contains(id) {
            return Err(CollectorError::Fetch(format!("{id}: timeout")));
        }
        if self.missing.contains(id) {
            return Ok(None);
        }

        let mut snapshot = IndicatorSnapshot {
            ticker: id.to_string(),
            timeframe: request.timeframe,
            server_time: None,
            gauge_moving_average: None,
            gauge_oscillator: None,
            gauge_summary: Some(json!({"rating": "BUY"})),
            pivot: None,
            moving_averages: Vec::new(),
            oscillators: Vec::new(),
        };
        if !self.blank.contains(id) {
            snapshot.moving_averages.push(IndicatorLine {
                name: "EMA10".into(),
                value: Some(10.0),
                rating: Some("BUY".into()),
            });
        }
        Ok(Some(snapshot))
    }
}

/// Identifier source that always fails.
pub struct BrokenIdentifiers;

#[async_trait]
impl IdentifierSource for BrokenIdentifiers {
    async fn load(&self) -> Result<Vec<String>, CollectorError> {
        Err(CollectorError::InvalidPayload(
            "identifier file must contain an array".into(),
        ))
    }
}

/// Fakes and stores behind one pipeline.
pub struct Harness {
    pub profiles: Arc<FakeProfiles>,
    pub prices: Arc<FakePrices>,
    pub impact: Arc<FakeDataset<ImpactEntry>>,
    pub foreign_flow: Arc<FakeDataset<ForeignFlowEntry>>,
    pub indicators: Arc<FakeIndicators>,
    pub profile_store: Arc<InMemorySink<InstrumentProfile>>,
    pub price_store: Arc<InMemorySink<PricePoint>>,
    pub impact_store: Arc<InMemorySink<ImpactEntry>>,
    pub foreign_flow_store: Arc<InMemorySink<ForeignFlowEntry>>,
    pub indicator_store: Arc<InMemorySink<IndicatorSnapshot>>,
    pub identifiers: Arc<dyn IdentifierSource>,
}

pub fn impact(symbol: &str, value: f64) -> ImpactEntry {
    ImpactEntry {
        symbol: symbol.into(),
        impact_index: value,
    }
}

pub fn flow(symbol: &str, buy_value: f64, sell_value: f64) -> ForeignFlowEntry {
    ForeignFlowEntry {
        symbol: symbol.into(),
        buy_volume: 1.0,
        buy_value,
        sell_volume: 1.0,
        sell_value,
    }
}

pub fn set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl Harness {
    /// Every fake succeeds for `identifiers`.
    pub fn new(identifiers: &[&str]) -> Self {
        Self {
            profiles: Arc::new(FakeProfiles::default()),
            prices: Arc::new(FakePrices::default()),
            impact: Arc::new(FakeDataset::new(DatasetBehavior::Rows(vec![
                impact("VNM", 0.5),
                impact("FPT", -0.25),
                impact("HPG", 0.0),
            ]))),
            foreign_flow: Arc::new(FakeDataset::new(DatasetBehavior::Rows(vec![
                flow("VNM", 100.0, 40.0),
                flow("FPT", 10.0, 90.0),
            ]))),
            indicators: Arc::new(FakeIndicators::default()),
            profile_store: Arc::new(InMemorySink::new()),
            price_store: Arc::new(InMemorySink::new()),
            impact_store: Arc::new(InMemorySink::new()),
            foreign_flow_store: Arc::new(InMemorySink::new()),
            indicator_store: Arc::new(InMemorySink::new()),
            identifiers: Arc::new(StaticIdentifiers::new(identifiers.iter().copied())),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            identifiers: Arc::clone(&self.identifiers),
            profiles: self.profiles.clone(),
            profile_sink: self.profile_store.clone(),
            prices: self.prices.clone(),
            price_sink: self.price_store.clone(),
            impact: self.impact.clone(),
            impact_sink: self.impact_store.clone(),
            foreign_flow: self.foreign_flow.clone(),
            foreign_flow_sink: self.foreign_flow_store.clone(),
            indicators: self.indicators.clone(),
            indicator_sink: self.indicator_store.clone(),
        }
    }

    /// Pipeline with two units, one attempt per fetch and no pacing delays.
    pub fn pipeline(&self) -> Pipeline {
        let config = PipelineConfig {
            recent_delay_ms: 0,
            indicator_lanes: 2,
            indicator_lane_delay_ms: 0,
            ..PipelineConfig::default()
        };
        Pipeline::new(
            config,
            WorkerPoolConfig::new().with_worker_count(2),
            RetryPolicy::new(1, Duration::from_millis(1)),
            self.collaborators(),
        )
    }
}
