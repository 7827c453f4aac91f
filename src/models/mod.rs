//! Domain records collected by the pipeline.
//!
//! Every record has a natural key ([`Keyed`]) so sinks can upsert with
//! last-write-wins semantics.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Natural key used for idempotent upserts.
pub trait Keyed {
    /// Key identifying the record within its dataset.
    fn key(&self) -> String;
}

/// Company profile fetched per identifier in phase 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentProfile {
    /// Instrument symbol.
    pub ticker: String,
    /// Local-language name.
    #[serde(default)]
    pub name_vi: Option<String>,
    /// English name.
    #[serde(default)]
    pub name_en: Option<String>,
    /// Industry group label.
    #[serde(default)]
    pub industry: Option<String>,
    /// Economic sector label.
    #[serde(default)]
    pub sector: Option<String>,
    /// Listing exchange.
    #[serde(default)]
    pub exchange: Option<String>,
    /// Company website.
    #[serde(default)]
    pub website: Option<String>,
    /// When the profile was fetched.
    #[serde(default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
}

impl InstrumentProfile {
    /// Profile with only the symbol set.
    #[must_use]
    pub fn bare(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            name_vi: None,
            name_en: None,
            industry: None,
            sector: None,
            exchange: None,
            website: None,
            fetched_at: Utc::now(),
        }
    }
}

impl Keyed for InstrumentProfile {
    fn key(&self) -> String {
        self.ticker.clone()
    }
}

/// Whether a series belongs to a stock or a market index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Listed equity.
    Stock,
    /// Market index.
    Index,
}

/// Request for the most recent window of a price series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    /// Instrument symbol.
    pub identifier: String,
    /// Page number, 0-based.
    pub page: u32,
    /// Points per page.
    pub size: u32,
}

impl SeriesRequest {
    /// First page of `size` points for `identifier`.
    #[must_use]
    pub fn recent(identifier: impl Into<String>, size: u32) -> Self {
        Self {
            identifier: identifier.into(),
            page: 0,
            size,
        }
    }

    /// Index series use a different query shape.
    #[must_use]
    pub fn kind(&self) -> InstrumentKind {
        if self.identifier == "VNINDEX" {
            InstrumentKind::Index
        } else {
            InstrumentKind::Stock
        }
    }
}

/// One daily price point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Instrument symbol.
    pub ticker: String,
    /// Session date as unix seconds.
    pub date: i64,
    /// Opening price.
    pub open: f64,
    /// Session high.
    pub high: f64,
    /// Session low.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Traded volume.
    #[serde(default)]
    pub volume: f64,
    /// Stock or index.
    pub kind: InstrumentKind,
}

impl Keyed for PricePoint {
    fn key(&self) -> String {
        format!("{}:{}", self.ticker, self.date)
    }
}

/// Impact-index row from the first bulk dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactEntry {
    /// Instrument symbol, upper-cased.
    pub symbol: String,
    /// Contribution to the market index.
    pub impact_index: f64,
}

impl Keyed for ImpactEntry {
    fn key(&self) -> String {
        self.symbol.clone()
    }
}

/// Foreign investor flow row from the second bulk dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignFlowEntry {
    /// Instrument symbol, upper-cased.
    pub symbol: String,
    /// Shares bought by foreign investors.
    pub buy_volume: f64,
    /// Value bought by foreign investors.
    pub buy_value: f64,
    /// Shares sold by foreign investors.
    pub sell_volume: f64,
    /// Value sold by foreign investors.
    pub sell_value: f64,
}

impl ForeignFlowEntry {
    /// Buy value minus sell value.
    #[must_use]
    pub fn net_value(&self) -> f64 {
        self.buy_value - self.sell_value
    }
}

impl Keyed for ForeignFlowEntry {
    fn key(&self) -> String {
        self.symbol.clone()
    }
}

/// Summary statistics over an impact dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactStatistics {
    /// Rows.
    pub count: usize,
    /// Rows with a positive impact.
    pub positive: usize,
    /// Rows with a negative impact.
    pub negative: usize,
    /// Rows with zero impact.
    pub neutral: usize,
    /// Largest impact, 0 for an empty set.
    pub max: f64,
    /// Smallest impact, 0 for an empty set.
    pub min: f64,
    /// Mean impact, 0 for an empty set.
    pub average: f64,
}

impl ImpactStatistics {
    /// Compute statistics for `entries`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_entries(entries: &[ImpactEntry]) -> Self {
        if entries.is_empty() {
            return Self::default();
        }

        let mut stats = Self {
            count: entries.len(),
            max: f64::MIN,
            min: f64::MAX,
            ..Self::default()
        };
        let mut total = 0.0;
        for entry in entries {
            let value = entry.impact_index;
            if value > 0.0 {
                stats.positive += 1;
            } else if value < 0.0 {
                stats.negative += 1;
            } else {
                stats.neutral += 1;
            }
            stats.max = stats.max.max(value);
            stats.min = stats.min.min(value);
            total += value;
        }
        stats.average = total / entries.len() as f64;
        stats
    }
}

/// Timeframe of a technical indicator snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndicatorTimeframe {
    /// Hourly indicators, refreshed during trading hours.
    OneHour,
    /// Daily indicators.
    OneDay,
    /// Weekly indicators.
    OneWeek,
}

impl IndicatorTimeframe {
    /// All timeframes the indicator source supports.
    pub const ALL: [Self; 3] = [Self::OneHour, Self::OneDay, Self::OneWeek];

    /// Wire name used in request paths.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneHour => "ONE_HOUR",
            Self::OneDay => "ONE_DAY",
            Self::OneWeek => "ONE_WEEK",
        }
    }
}

impl fmt::Display for IndicatorTimeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndicatorTimeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown timeframe `{s}`"))
    }
}

/// Request for one indicator snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorRequest {
    /// Instrument symbol.
    pub identifier: String,
    /// Timeframe to fetch.
    pub timeframe: IndicatorTimeframe,
}

/// One named indicator line (moving average or oscillator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorLine {
    /// Indicator name.
    pub name: String,
    /// Latest value.
    #[serde(default)]
    pub value: Option<f64>,
    /// Buy / sell / neutral rating.
    #[serde(default)]
    pub rating: Option<String>,
}

/// Technical indicator snapshot for one identifier and timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    /// Instrument symbol.
    pub ticker: String,
    /// Timeframe of the snapshot.
    pub timeframe: IndicatorTimeframe,
    /// Source server time, if reported.
    #[serde(default)]
    pub server_time: Option<DateTime<Utc>>,
    /// Moving-average gauge.
    #[serde(default)]
    pub gauge_moving_average: Option<serde_json::Value>,
    /// Oscillator gauge.
    #[serde(default)]
    pub gauge_oscillator: Option<serde_json::Value>,
    /// Overall gauge.
    #[serde(default)]
    pub gauge_summary: Option<serde_json::Value>,
    /// Pivot levels.
    #[serde(default)]
    pub pivot: Option<serde_json::Value>,
    /// Moving-average lines.
    #[serde(default)]
    pub moving_averages: Vec<IndicatorLine>,
    /// Oscillator lines.
    #[serde(default)]
    pub oscillators: Vec<IndicatorLine>,
}

const MAX_INDICATOR_NAME: usize = 90;
const MAX_INDICATOR_RATING: usize = 25;

impl IndicatorSnapshot {
    /// True if any of moving averages, oscillators or pivot carry data.
    #[must_use]
    pub fn has_content(&self) -> bool {
        let has_pivot = self
            .pivot
            .as_ref()
            .is_some_and(|p| p.as_object().is_some_and(|o| !o.is_empty()));
        !self.moving_averages.is_empty() || !self.oscillators.is_empty() || has_pivot
    }

    /// Clip indicator names and ratings to the stored column widths.
    #[must_use]
    pub fn truncated(mut self) -> Self {
        for line in self.moving_averages.iter_mut().chain(self.oscillators.iter_mut()) {
            line.name = line.name.chars().take(MAX_INDICATOR_NAME).collect();
            if let Some(rating) = line.rating.as_mut() {
                *rating = rating.chars().take(MAX_INDICATOR_RATING).collect();
            }
        }
        self
    }
}

impl Keyed for IndicatorSnapshot {
    fn key(&self) -> String {
        format!("{}:{}", self.ticker, self.timeframe)
    }
}
