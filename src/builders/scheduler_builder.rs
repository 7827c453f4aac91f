//! Construct pipelines and schedulers from a [`CollectorConfig`].

use std::sync::Arc;

use crate::config::CollectorConfig;
use crate::core::{CollectionScheduler, Collaborators, CollectorError, Pipeline, RetryPolicy};
use crate::infra::http::HttpSources;
use crate::infra::{InMemorySink, JsonFileIdentifiers};
use crate::models::{
    ForeignFlowEntry, ImpactEntry, IndicatorSnapshot, InstrumentProfile, PricePoint,
};

/// Validate `config` and build a pipeline over `collaborators`.
///
/// # Errors
///
/// `CollectorError::Config` if the configuration is invalid.
pub fn build_pipeline(
    config: &CollectorConfig,
    collaborators: Collaborators,
) -> Result<Pipeline, CollectorError> {
    config
        .validate()
        .map_err(|e| CollectorError::Config(format!("config invalid: {e}")))?;

    Ok(Pipeline::new(
        config.pipeline.clone(),
        config.pool.clone(),
        RetryPolicy::from(&config.retry),
        collaborators,
    ))
}

/// Validate `config` and build a scheduler with every configured trigger.
/// Triggers are not started.
///
/// # Errors
///
/// `CollectorError::Config` if the configuration or a trigger is invalid.
pub fn build_scheduler(
    config: &CollectorConfig,
    collaborators: Collaborators,
) -> Result<CollectionScheduler, CollectorError> {
    let pipeline = build_pipeline(config, collaborators)?;
    let tz = config.tz().map_err(CollectorError::Config)?;
    CollectionScheduler::new(Arc::new(pipeline), &config.triggers, tz)
}

/// In-memory stores backing every sink.
#[derive(Clone, Default)]
pub struct MemoryStores {
    /// Phase 1 records.
    pub profiles: Arc<InMemorySink<InstrumentProfile>>,
    /// Phase 2 records.
    pub prices: Arc<InMemorySink<PricePoint>>,
    /// Phase 3 records.
    pub impact: Arc<InMemorySink<ImpactEntry>>,
    /// Phase 4 records.
    pub foreign_flow: Arc<InMemorySink<ForeignFlowEntry>>,
    /// Phase 5 records.
    pub indicators: Arc<InMemorySink<IndicatorSnapshot>>,
}

impl MemoryStores {
    /// Record counts per dataset, in phase order.
    #[must_use]
    pub fn counts(&self) -> [(&'static str, usize); 5] {
        [
            ("profiles", self.profiles.len()),
            ("recent_prices", self.prices.len()),
            ("impact_index", self.impact.len()),
            ("foreign_flow", self.foreign_flow.len()),
            ("indicators", self.indicators.len()),
        ]
    }
}

/// Collaborators reading from the configured HTTP endpoints and the
/// identifier file, writing into fresh in-memory stores.
///
/// # Errors
///
/// `CollectorError::Http` if an HTTP client cannot be built.
pub fn http_collaborators(
    config: &CollectorConfig,
) -> Result<(Collaborators, MemoryStores), CollectorError> {
    let sources = HttpSources::from_config(&config.sources)?;
    let stores = MemoryStores::default();

    let collaborators = Collaborators {
        identifiers: Arc::new(JsonFileIdentifiers::new(&config.identifiers_file)),
        profiles: Arc::new(sources.profiles),
        profile_sink: stores.profiles.clone(),
        prices: Arc::new(sources.prices),
        price_sink: stores.prices.clone(),
        impact: Arc::new(sources.impact),
        impact_sink: stores.impact.clone(),
        foreign_flow: Arc::new(sources.foreign_flow),
        foreign_flow_sink: stores.foreign_flow.clone(),
        indicators: Arc::new(sources.indicators),
        indicator_sink: stores.indicators.clone(),
    };
    Ok((collaborators, stores))
}
