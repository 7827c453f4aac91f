//! Collector configuration: pipeline tuning, triggers, sources and the
//! environment loader.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{RetryConfig, WorkerPoolConfig};
use crate::core::trigger::{TriggerExpression, TriggerKind};
use crate::models::IndicatorTimeframe;

/// Phase tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Points requested per identifier in the recent-series phase.
    pub recent_window: u32,
    /// Pause between two identifiers in the recent-series phase, in milliseconds.
    pub recent_delay_ms: u64,
    /// Independent lanes the indicator phase splits the identifiers into.
    pub indicator_lanes: usize,
    /// Pause between two identifiers of the same lane, in milliseconds.
    pub indicator_lane_delay_ms: u64,
    /// Timeframe refreshed by the indicator phase.
    pub indicator_timeframe: IndicatorTimeframe,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recent_window: 5,
            recent_delay_ms: 200,
            indicator_lanes: 128,
            indicator_lane_delay_ms: 100,
            indicator_timeframe: IndicatorTimeframe::OneHour,
        }
    }
}

impl PipelineConfig {
    /// Recent-series delay as a `Duration`.
    #[must_use]
    pub const fn recent_delay(&self) -> Duration {
        Duration::from_millis(self.recent_delay_ms)
    }

    /// Indicator lane delay as a `Duration`.
    #[must_use]
    pub const fn indicator_lane_delay(&self) -> Duration {
        Duration::from_millis(self.indicator_lane_delay_ms)
    }

    /// Validate phase tuning.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.recent_window == 0 {
            return Err("recent_window must be greater than 0".into());
        }
        if self.indicator_lanes == 0 {
            return Err("indicator_lanes must be greater than 0".into());
        }
        Ok(())
    }
}

/// One named trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Unique trigger name.
    pub name: String,
    /// Cron expression, five to seven fields.
    pub expression: String,
    /// What the trigger runs.
    pub kind: TriggerKind,
}

impl TriggerConfig {
    /// Build a trigger entry.
    pub fn new(name: impl Into<String>, expression: impl Into<String>, kind: TriggerKind) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            kind,
        }
    }
}

/// A spreadsheet range read through the values API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetConfig {
    /// Spreadsheet id.
    pub spreadsheet_id: String,
    /// A1 range including the header row.
    pub range: String,
}

/// Remote endpoints and request timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the profile endpoint; the identifier is appended.
    pub profile_base_url: String,
    /// Path suffix after the identifier.
    pub profile_endpoint: String,
    /// Base URL of the price history endpoint.
    pub price_base_url: String,
    /// Base URL of the spreadsheet values API.
    pub sheets_base_url: String,
    /// API key for the spreadsheet values API.
    pub sheets_api_key: String,
    /// Impact-index dataset.
    pub impact_sheet: SheetConfig,
    /// Foreign-flow dataset.
    pub foreign_flow_sheet: SheetConfig,
    /// Base URL of the technical indicator endpoint.
    pub indicator_base_url: String,
    /// Timeout for per-identifier requests, in milliseconds.
    pub request_timeout_ms: u64,
    /// Timeout for spreadsheet downloads, in milliseconds.
    pub sheet_timeout_ms: u64,
}

const DEFAULT_SPREADSHEET_ID: &str = "1ekb2bYAQJZbtmqMUzsagb4uWBdtkAzTq3kuIMHQ22RI";

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            profile_base_url: "https://simplize.vn/_next/data/n0EN5WraCn9Bbeck4Eik9/co-phieu"
                .into(),
            profile_endpoint: "/ho-so-doanh-nghiep.json".into(),
            price_base_url: "https://api2.simplize.vn/api/historical/quote/prices".into(),
            sheets_base_url: "https://sheets.googleapis.com/v4/spreadsheets".into(),
            sheets_api_key: String::new(),
            impact_sheet: SheetConfig {
                spreadsheet_id: DEFAULT_SPREADSHEET_ID.into(),
                range: "CoPhieuAnhHuong!A1:Z1605".into(),
            },
            foreign_flow_sheet: SheetConfig {
                spreadsheet_id: DEFAULT_SPREADSHEET_ID.into(),
                range: "ChartMuaBan!A1:Z1605".into(),
            },
            indicator_base_url: "https://iq.vietcap.com.vn/api/iq-insight-service/v1/company"
                .into(),
            request_timeout_ms: 15_000,
            sheet_timeout_ms: 30_000,
        }
    }
}

/// Root configuration of the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Worker pool settings.
    pub pool: WorkerPoolConfig,
    /// Retry settings for remote fetches.
    pub retry: RetryConfig,
    /// Phase tuning.
    pub pipeline: PipelineConfig,
    /// Triggers registered on `start()`.
    pub triggers: Vec<TriggerConfig>,
    /// IANA timezone the triggers are evaluated in.
    pub timezone: String,
    /// JSON array of identifiers, read at the start of every run.
    pub identifiers_file: PathBuf,
    /// Remote endpoints.
    pub sources: SourceConfig,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            pool: WorkerPoolConfig::default(),
            retry: RetryConfig::default(),
            pipeline: PipelineConfig::default(),
            triggers: default_triggers("0 8 * * *", "0 20 * * *", "*/30 9-15 * * Mon-Fri"),
            timezone: "Asia/Ho_Chi_Minh".into(),
            identifiers_file: PathBuf::from("tickers.json"),
            sources: SourceConfig::default(),
        }
    }
}

fn default_triggers(morning: &str, evening: &str, technical: &str) -> Vec<TriggerConfig> {
    vec![
        TriggerConfig::new("morning", morning, TriggerKind::FullPipeline),
        TriggerConfig::new("evening", evening, TriggerKind::FullPipeline),
        TriggerConfig::new("technical", technical, TriggerKind::IndicatorRefresh),
    ]
}

impl CollectorConfig {
    /// Parsed timezone.
    ///
    /// # Errors
    ///
    /// Returns a message if the name is not a known IANA zone.
    pub fn tz(&self) -> Result<chrono_tz::Tz, String> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| format!("unknown timezone `{}`: {e}", self.timezone))
    }

    /// Validate every section, each trigger expression and the timezone.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        self.pool.validate().map_err(|e| format!("pool invalid: {e}"))?;
        self.retry.validate().map_err(|e| format!("retry invalid: {e}"))?;
        self.pipeline
            .validate()
            .map_err(|e| format!("pipeline invalid: {e}"))?;
        self.tz()?;

        let mut names = std::collections::HashSet::new();
        for trigger in &self.triggers {
            if !names.insert(trigger.name.as_str()) {
                return Err(format!("duplicate trigger name `{}`", trigger.name));
            }
            TriggerExpression::parse(&trigger.expression)
                .map_err(|e| format!("trigger `{}` invalid: {e}", trigger.name))?;
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a message on parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the process environment, loading `.env`
    /// first if present.
    ///
    /// # Errors
    ///
    /// Returns a message if a variable is set but unparseable, or if the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`CollectorConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let mut cfg = Self {
            pool: defaults
                .pool
                .clone()
                .with_worker_count(parsed(&lookup, "WORKER_COUNT", defaults.pool.worker_count)?),
            retry: RetryConfig {
                max_attempts: parsed(&lookup, "MAX_RETRY_ATTEMPTS", defaults.retry.max_attempts)?,
                delay_ms: parsed(&lookup, "RETRY_DELAY_MS", defaults.retry.delay_ms)?,
            },
            triggers: default_triggers(
                &text("CRON_SCHEDULE_MORNING", "0 8 * * *"),
                &text("CRON_SCHEDULE_EVENING", "0 20 * * *"),
                &text("CRON_SCHEDULE_TECHNICAL", "*/30 9-15 * * Mon-Fri"),
            ),
            timezone: text("SCHEDULER_TIMEZONE", &defaults.timezone),
            identifiers_file: lookup("TICKERS_FILE")
                .map_or(defaults.identifiers_file.clone(), PathBuf::from),
            ..defaults
        };

        cfg.pipeline.indicator_timeframe = parsed(
            &lookup,
            "TECHNICAL_TIMEFRAME",
            cfg.pipeline.indicator_timeframe,
        )?;
        if let Some(base) = lookup("SIMPLIZE_API_BASE_URL") {
            cfg.sources.profile_base_url = base;
        }
        if let Some(endpoint) = lookup("SIMPLIZE_API_ENDPOINT") {
            cfg.sources.profile_endpoint = endpoint;
        }
        if let Some(key) = lookup("SHEETS_API_KEY") {
            cfg.sources.sheets_api_key = key;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| format!("{key}={raw}: {e}")),
        _ => Ok(default),
    }
}
