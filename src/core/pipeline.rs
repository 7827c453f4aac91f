//! Phased collection pipeline.
//!
//! A full run executes five phases in order:
//!
//! 1. profiles for every identifier, through the worker pool
//! 2. the recent price window for every identifier that phase 1 saved
//! 3. the impact-index dataset (one download, bulk upsert)
//! 4. the foreign-flow dataset (one download, bulk upsert)
//! 5. indicator snapshots for one timeframe, spread over independent lanes
//!
//! Each phase is contained: an error or a panic inside it is recorded in its
//! [`PhaseSummary`] and the next phase still runs. Only loading the
//! identifier list can fail the run as a whole.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{PipelineConfig, WorkerPoolConfig};
use crate::core::executor::{FetchAndPersist, IdentifierSource, PersistenceSink, RemoteSource};
use crate::core::retry::RetryPolicy;
use crate::core::worker_pool::WorkerPool;
use crate::core::CollectorError;
use crate::models::{
    ForeignFlowEntry, ImpactEntry, ImpactStatistics, IndicatorRequest, IndicatorSnapshot,
    IndicatorTimeframe, InstrumentProfile, PricePoint, SeriesRequest,
};
use crate::util::{duration_ms, panic_message};

/// Pool type used by the profile phase.
pub type ProfilePool = WorkerPool<InstrumentProfile, FetchAndPersist<InstrumentProfile>>;

/// The five collection phases, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Phase 1.
    Profiles,
    /// Phase 2.
    RecentPrices,
    /// Phase 3.
    ImpactIndex,
    /// Phase 4.
    ForeignFlow,
    /// Phase 5.
    Indicators,
}

impl PhaseKind {
    /// 1-based position in a full run.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Profiles => 1,
            Self::RecentPrices => 2,
            Self::ImpactIndex => 3,
            Self::ForeignFlow => 4,
            Self::Indicators => 5,
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Profiles => "profiles",
            Self::RecentPrices => "recent_prices",
            Self::ImpactIndex => "impact_index",
            Self::ForeignFlow => "foreign_flow",
            Self::Indicators => "indicators",
        };
        f.write_str(name)
    }
}

/// Outcome class of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Nothing failed.
    Succeeded,
    /// Some items failed, some did not.
    Partial,
    /// Every item failed, or the phase aborted.
    Failed,
    /// Nothing to do.
    Skipped,
}

/// One failed item inside a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseFailure {
    /// Identifier or dataset name.
    pub identifier: String,
    /// Error text.
    pub error: String,
}

/// Result of one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    /// Which phase.
    pub phase: PhaseKind,
    /// Outcome class.
    pub status: PhaseStatus,
    /// Items that succeeded.
    pub succeeded: usize,
    /// Items that failed.
    pub failed: usize,
    /// Items with nothing to store.
    pub skipped: usize,
    /// Records written to the sink.
    pub records: usize,
    /// Wall-clock time in milliseconds.
    pub duration_ms: u64,
    /// Abort reason, set when the phase did not complete.
    pub error: Option<String>,
    /// Failed items with their errors.
    pub failures: Vec<PhaseFailure>,
    /// Phase-specific extras.
    pub details: serde_json::Value,
}

impl PhaseSummary {
    fn completed(
        phase: PhaseKind,
        started: Instant,
        tally: Tally,
        details: serde_json::Value,
    ) -> Self {
        let status = match (tally.succeeded, tally.failed, tally.skipped) {
            (0, 0, 0) => PhaseStatus::Skipped,
            (_, 0, _) => PhaseStatus::Succeeded,
            (0, _, 0) => PhaseStatus::Failed,
            _ => PhaseStatus::Partial,
        };
        Self {
            phase,
            status,
            succeeded: tally.succeeded,
            failed: tally.failed,
            skipped: tally.skipped,
            records: tally.records,
            duration_ms: duration_ms(started.elapsed()),
            error: None,
            failures: tally.failures,
            details,
        }
    }

    fn aborted(phase: PhaseKind, started: Instant, error: String) -> Self {
        Self {
            phase,
            status: PhaseStatus::Failed,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            records: 0,
            duration_ms: duration_ms(started.elapsed()),
            error: Some(error),
            failures: Vec::new(),
            details: serde_json::Value::Null,
        }
    }

    fn skipped(phase: PhaseKind, reason: &str) -> Self {
        Self {
            phase,
            status: PhaseStatus::Skipped,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            records: 0,
            duration_ms: 0,
            error: None,
            failures: Vec::new(),
            details: serde_json::json!({ "reason": reason }),
        }
    }
}

/// Which phases a run covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// All five phases.
    Full,
    /// Phase 5 only.
    IndicatorRefresh,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Unique run id.
    pub run_id: Uuid,
    /// Phases covered.
    pub kind: RunKind,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock time in milliseconds.
    pub duration_ms: u64,
    /// Identifiers loaded for the run.
    pub total_identifiers: usize,
    /// Per-phase results in run order.
    pub phases: Vec<PhaseSummary>,
}

impl PipelineSummary {
    /// Summary of `phase`, if the run covered it.
    #[must_use]
    pub fn phase(&self, phase: PhaseKind) -> Option<&PhaseSummary> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    /// Failed items across every phase, plus one per aborted phase.
    #[must_use]
    pub fn total_failed(&self) -> usize {
        self.phases
            .iter()
            .map(|p| p.failed + usize::from(p.error.is_some()))
            .sum()
    }
}

#[derive(Debug, Default)]
struct Tally {
    succeeded: usize,
    failed: usize,
    skipped: usize,
    records: usize,
    failures: Vec<PhaseFailure>,
}

impl Tally {
    fn fail(&mut self, identifier: impl Into<String>, error: impl ToString) {
        self.failed += 1;
        self.failures.push(PhaseFailure {
            identifier: identifier.into(),
            error: error.to_string(),
        });
    }
}

/// External collaborators used by the phases.
#[derive(Clone)]
pub struct Collaborators {
    /// Identifier list, read at the start of each run.
    pub identifiers: Arc<dyn IdentifierSource>,
    /// Phase 1 source.
    pub profiles: Arc<dyn RemoteSource<str, InstrumentProfile>>,
    /// Phase 1 sink.
    pub profile_sink: Arc<dyn PersistenceSink<InstrumentProfile>>,
    /// Phase 2 source.
    pub prices: Arc<dyn RemoteSource<SeriesRequest, Vec<PricePoint>>>,
    /// Phase 2 sink, one upsert per point.
    pub price_sink: Arc<dyn PersistenceSink<PricePoint>>,
    /// Phase 3 source.
    pub impact: Arc<dyn RemoteSource<(), Vec<ImpactEntry>>>,
    /// Phase 3 sink.
    pub impact_sink: Arc<dyn PersistenceSink<ImpactEntry>>,
    /// Phase 4 source.
    pub foreign_flow: Arc<dyn RemoteSource<(), Vec<ForeignFlowEntry>>>,
    /// Phase 4 sink.
    pub foreign_flow_sink: Arc<dyn PersistenceSink<ForeignFlowEntry>>,
    /// Phase 5 source; `None` means the source had nothing for the identifier.
    pub indicators: Arc<dyn RemoteSource<IndicatorRequest, Option<IndicatorSnapshot>>>,
    /// Phase 5 sink.
    pub indicator_sink: Arc<dyn PersistenceSink<IndicatorSnapshot>>,
}

enum IndicatorOutcome {
    Saved,
    Skipped,
    Failed(String),
}

/// Runs collection phases against a set of collaborators.
///
/// The worker pool is started on first use and kept for later runs.
pub struct Pipeline {
    config: PipelineConfig,
    pool_config: WorkerPoolConfig,
    retry: RetryPolicy,
    collaborators: Collaborators,
    pool: OnceCell<Arc<ProfilePool>>,
}

impl Pipeline {
    /// Create a pipeline. No threads are started until the first run.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        pool_config: WorkerPoolConfig,
        retry: RetryPolicy,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            pool_config,
            retry,
            collaborators,
            pool: OnceCell::new(),
        }
    }

    /// Phase tuning in use.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run all five phases.
    ///
    /// # Errors
    ///
    /// Only if the identifier list cannot be loaded. Phase errors are
    /// recorded in the summary.
    pub async fn run_full(&self) -> Result<PipelineSummary, CollectorError> {
        let identifiers = self.collaborators.identifiers.load().await?;
        let run = RunClock::start(RunKind::Full, identifiers.len());

        let started = Instant::now();
        let profiles_phase = contain(PhaseKind::Profiles, self.collect_profiles(&identifiers));
        let (profiles, saved) = match profiles_phase.await {
            Ok(out) => out,
            Err(message) => (
                PhaseSummary::aborted(PhaseKind::Profiles, started, message),
                Vec::new(),
            ),
        };

        let recent = self
            .run_phase(PhaseKind::RecentPrices, self.collect_recent_prices(&saved))
            .await;
        let impact = self
            .run_phase(PhaseKind::ImpactIndex, self.import_impact_index())
            .await;
        let foreign = self
            .run_phase(PhaseKind::ForeignFlow, self.import_foreign_flow())
            .await;
        let indicators = self
            .run_phase(
                PhaseKind::Indicators,
                self.refresh_indicators(&identifiers, self.config.indicator_timeframe),
            )
            .await;

        Ok(run.finish(vec![profiles, recent, impact, foreign, indicators]))
    }

    /// Run only the indicator phase.
    ///
    /// # Errors
    ///
    /// Only if the identifier list cannot be loaded.
    pub async fn run_indicator_refresh(&self) -> Result<PipelineSummary, CollectorError> {
        let identifiers = self.collaborators.identifiers.load().await?;
        let run = RunClock::start(RunKind::IndicatorRefresh, identifiers.len());

        let indicators = self
            .run_phase(
                PhaseKind::Indicators,
                self.refresh_indicators(&identifiers, self.config.indicator_timeframe),
            )
            .await;

        Ok(run.finish(vec![indicators]))
    }

    /// Terminate the worker pool if it was started.
    pub async fn shutdown(&self) {
        if let Some(pool) = self.pool.get() {
            let pool = Arc::clone(pool);
            if tokio::task::spawn_blocking(move || pool.terminate()).await.is_err() {
                error!("pool termination task panicked");
            }
        }
    }

    async fn run_phase<F>(&self, phase: PhaseKind, work: F) -> PhaseSummary
    where
        F: Future<Output = Result<PhaseSummary, CollectorError>>,
    {
        let started = Instant::now();
        contain(phase, work)
            .await
            .unwrap_or_else(|message| PhaseSummary::aborted(phase, started, message))
    }

    async fn pool(&self) -> Result<Arc<ProfilePool>, CollectorError> {
        let pool = self
            .pool
            .get_or_try_init(|| async {
                let config = self.pool_config.clone();
                let executor = FetchAndPersist::new(
                    Arc::clone(&self.collaborators.profiles),
                    Arc::clone(&self.collaborators.profile_sink),
                    self.retry,
                );
                // Probing units blocks; keep it off the async workers.
                let pool =
                    tokio::task::spawn_blocking(move || WorkerPool::initialize(config, executor))
                        .await
                    .map_err(|e| CollectorError::Phase(format!("pool start task failed: {e}")))??;
                Ok::<_, CollectorError>(Arc::new(pool))
            })
            .await?;
        Ok(Arc::clone(pool))
    }

    async fn collect_profiles(
        &self,
        identifiers: &[String],
    ) -> Result<(PhaseSummary, Vec<String>), CollectorError> {
        let started = Instant::now();
        info!(phase = %PhaseKind::Profiles, total = identifiers.len(), "phase started");

        let pool = self.pool().await?;
        let result = pool.process_all(identifiers.iter().cloned()).await;

        let mut tally = Tally {
            succeeded: result.success_count(),
            records: result.success_count(),
            ..Tally::default()
        };
        for failure in &result.failures {
            tally.fail(failure.identifier.clone(), &failure.error);
        }

        let saved = result.succeeded_identifiers();
        let details = serde_json::json!({
            "workers_used": result.workers_used,
            "pool_duration_ms": duration_ms(result.duration),
        });
        Ok((
            PhaseSummary::completed(PhaseKind::Profiles, started, tally, details),
            saved,
        ))
    }

    async fn collect_recent_prices(
        &self,
        identifiers: &[String],
    ) -> Result<PhaseSummary, CollectorError> {
        if identifiers.is_empty() {
            return Ok(PhaseSummary::skipped(
                PhaseKind::RecentPrices,
                "no identifiers saved in phase 1",
            ));
        }

        let started = Instant::now();
        let window = self.config.recent_window;
        info!(phase = %PhaseKind::RecentPrices, total = identifiers.len(), window, "phase started");

        let mut tally = Tally::default();
        let mut point_errors = 0_usize;

        for (index, identifier) in identifiers.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.recent_delay()).await;
            }

            let request = SeriesRequest::recent(identifier.clone(), window);
            let source = &self.collaborators.prices;
            let req = &request;
            let points = match self.retry.run(identifier, move || source.fetch(req)).await {
                Ok(points) => points,
                Err(err) => {
                    warn!(identifier = %identifier, error = %err, "recent prices failed");
                    tally.fail(identifier.clone(), err);
                    continue;
                }
            };

            let mut saved = 0;
            for point in points {
                let date = point.date;
                match self.collaborators.price_sink.upsert(point).await {
                    Ok(_) => saved += 1,
                    Err(err) => {
                        point_errors += 1;
                        warn!(
                            identifier = %identifier,
                            date,
                            error = %err,
                            "price point not saved"
                        );
                    }
                }
            }
            debug!(identifier = %identifier, saved, "recent prices saved");
            tally.succeeded += 1;
            tally.records += saved;
        }

        let details = serde_json::json!({
            "window": window,
            "point_errors": point_errors,
        });
        Ok(PhaseSummary::completed(PhaseKind::RecentPrices, started, tally, details))
    }

    async fn import_impact_index(&self) -> Result<PhaseSummary, CollectorError> {
        let started = Instant::now();
        info!(phase = %PhaseKind::ImpactIndex, "phase started");

        let source = &self.collaborators.impact;
        let entries = self.retry.run("impact_index", move || source.fetch(&())).await?;
        let statistics = ImpactStatistics::from_entries(&entries);
        let saved = self.collaborators.impact_sink.upsert_many(entries).await?;

        let tally = Tally {
            succeeded: saved,
            records: saved,
            ..Tally::default()
        };
        let details = serde_json::to_value(&statistics)?;
        Ok(PhaseSummary::completed(PhaseKind::ImpactIndex, started, tally, details))
    }

    async fn import_foreign_flow(&self) -> Result<PhaseSummary, CollectorError> {
        let started = Instant::now();
        info!(phase = %PhaseKind::ForeignFlow, "phase started");

        let source = &self.collaborators.foreign_flow;
        let entries = self.retry.run("foreign_flow", move || source.fetch(&())).await?;
        let net_buyers = entries.iter().filter(|e| e.net_value() > 0.0).count();
        let net_sellers = entries.iter().filter(|e| e.net_value() < 0.0).count();
        let net_value: f64 = entries.iter().map(ForeignFlowEntry::net_value).sum();
        let saved = self.collaborators.foreign_flow_sink.upsert_many(entries).await?;

        let tally = Tally {
            succeeded: saved,
            records: saved,
            ..Tally::default()
        };
        let details = serde_json::json!({
            "net_buyers": net_buyers,
            "net_sellers": net_sellers,
            "net_value": net_value,
        });
        Ok(PhaseSummary::completed(PhaseKind::ForeignFlow, started, tally, details))
    }

    async fn refresh_indicators(
        &self,
        identifiers: &[String],
        timeframe: IndicatorTimeframe,
    ) -> Result<PhaseSummary, CollectorError> {
        let started = Instant::now();
        let lanes = self.config.indicator_lanes.max(1);
        let lane_len = identifiers.len().div_ceil(lanes).max(1);
        info!(
            phase = %PhaseKind::Indicators,
            total = identifiers.len(),
            timeframe = %timeframe,
            lanes,
            lane_len,
            "phase started"
        );

        let outcomes = join_all(
            identifiers
                .chunks(lane_len)
                .enumerate()
                .map(|(lane, ids)| self.indicator_lane(lane, ids, timeframe)),
        )
        .await;

        let mut tally = Tally::default();
        for (identifier, outcome) in outcomes.into_iter().flatten() {
            match outcome {
                IndicatorOutcome::Saved => {
                    tally.succeeded += 1;
                    tally.records += 1;
                }
                IndicatorOutcome::Skipped => tally.skipped += 1,
                IndicatorOutcome::Failed(error) => tally.fail(identifier, error),
            }
        }

        let details = serde_json::json!({ "timeframe": timeframe, "lanes": lanes });
        Ok(PhaseSummary::completed(PhaseKind::Indicators, started, tally, details))
    }

    /// One lane: its identifiers in order, pausing between them.
    async fn indicator_lane(
        &self,
        lane: usize,
        identifiers: &[String],
        timeframe: IndicatorTimeframe,
    ) -> Vec<(String, IndicatorOutcome)> {
        let mut outcomes = Vec::with_capacity(identifiers.len());
        for (index, identifier) in identifiers.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.indicator_lane_delay()).await;
            }
            let outcome = self.refresh_one(identifier, timeframe).await;
            outcomes.push((identifier.clone(), outcome));
        }
        debug!(lane, done = outcomes.len(), "indicator lane done");
        outcomes
    }

    async fn refresh_one(
        &self,
        identifier: &str,
        timeframe: IndicatorTimeframe,
    ) -> IndicatorOutcome {
        let request = IndicatorRequest {
            identifier: identifier.to_string(),
            timeframe,
        };
        let source = &self.collaborators.indicators;
        let req = &request;

        match self.retry.run(identifier, move || source.fetch(req)).await {
            Ok(Some(snapshot)) if snapshot.has_content() => {
                match self.collaborators.indicator_sink.upsert(snapshot.truncated()).await {
                    Ok(_) => IndicatorOutcome::Saved,
                    Err(err) => IndicatorOutcome::Failed(err.to_string()),
                }
            }
            Ok(_) => {
                debug!(identifier, timeframe = %timeframe, "no indicator data, skipping");
                IndicatorOutcome::Skipped
            }
            Err(err) => IndicatorOutcome::Failed(err.to_string()),
        }
    }
}

/// Await `work`, turning an error or a panic into a message.
async fn contain<T, F>(phase: PhaseKind, work: F) -> Result<T, String>
where
    F: Future<Output = Result<T, CollectorError>>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            error!(phase = %phase, error = %err, "phase failed");
            Err(err.to_string())
        }
        Err(payload) => {
            let message = format!("phase panicked: {}", panic_message(payload.as_ref()));
            error!(phase = %phase, error = %message, "phase failed");
            Err(message)
        }
    }
}

struct RunClock {
    run_id: Uuid,
    kind: RunKind,
    started_at: DateTime<Utc>,
    started: Instant,
    total_identifiers: usize,
}

impl RunClock {
    fn start(kind: RunKind, total_identifiers: usize) -> Self {
        let run_id = Uuid::new_v4();
        info!(%run_id, ?kind, total_identifiers, "pipeline run started");
        Self {
            run_id,
            kind,
            started_at: Utc::now(),
            started: Instant::now(),
            total_identifiers,
        }
    }

    fn finish(self, phases: Vec<PhaseSummary>) -> PipelineSummary {
        let summary = PipelineSummary {
            run_id: self.run_id,
            kind: self.kind,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_ms: duration_ms(self.started.elapsed()),
            total_identifiers: self.total_identifiers,
            phases,
        };

        for phase in &summary.phases {
            info!(
                run_id = %summary.run_id,
                phase = %phase.phase,
                status = ?phase.status,
                succeeded = phase.succeeded,
                failed = phase.failed,
                skipped = phase.skipped,
                records = phase.records,
                duration_ms = phase.duration_ms,
                "phase finished"
            );
        }
        info!(
            run_id = %summary.run_id,
            duration_ms = summary.duration_ms,
            total_failed = summary.total_failed(),
            "pipeline run finished"
        );
        if let Ok(json) = serde_json::to_string(&summary) {
            debug!(summary = %json, "pipeline summary");
        }
        summary
    }
}
