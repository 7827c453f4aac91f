//! reqwest-backed remote sources.
//!
//! Each source issues one GET per fetch and maps the response body into the
//! domain model. Retries are applied by the caller. Body parsing lives in
//! free functions so it can be exercised without a network.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::{SheetConfig, SourceConfig};
use crate::core::{CollectorError, RemoteSource};
use crate::infra::sheets::{parse_foreign_flow_rows, parse_impact_rows, SheetValues};
use crate::models::{
    ForeignFlowEntry, ImpactEntry, IndicatorLine, IndicatorRequest, IndicatorSnapshot,
    IndicatorTimeframe, InstrumentKind, InstrumentProfile, PricePoint, SeriesRequest,
};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Build a JSON client with the given per-request timeout.
///
/// # Errors
///
/// `CollectorError::Http` if the TLS backend cannot be initialised.
pub fn build_client(timeout: Duration) -> Result<Client, CollectorError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        header::HeaderValue::from_static("en-US,en;q=0.9,vi;q=0.8"),
    );

    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .build()?)
}

async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<T, CollectorError> {
    debug!(url, "GET");
    let response = client.get(url).query(query).send().await?;
    let response = response.error_for_status()?;
    Ok(response.json::<T>().await?)
}

/// Status envelope used by the price and indicator services.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    /// Service status code, independent of the HTTP status.
    #[serde(default)]
    pub status: Option<u16>,
    /// Payload, present when `status` is 200.
    #[serde(default)]
    pub data: Option<T>,
    /// Total records available, for paged endpoints.
    #[serde(default)]
    pub total: Option<u64>,
    /// Server clock at response time.
    #[serde(default)]
    pub server_date_time: Option<String>,
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileSummary {
    ticker: Option<String>,
    name_vi: Option<String>,
    name: Option<String>,
    name_en: Option<String>,
    industry_activity: Option<String>,
    bc_economic_sector_name: Option<String>,
    stock_exchange: Option<String>,
    website: Option<String>,
}

/// Map a profile page body (`pageProps.summary`) into a profile.
///
/// # Errors
///
/// `InvalidPayload` if the summary is missing or malformed.
pub fn parse_profile(identifier: &str, body: &Value) -> Result<InstrumentProfile, CollectorError> {
    let summary = body
        .pointer("/pageProps/summary")
        .filter(|s| s.is_object())
        .ok_or_else(|| {
            CollectorError::InvalidPayload(format!("{identifier}: no profile summary in response"))
        })?;
    let summary: ProfileSummary = serde_json::from_value(summary.clone())
        .map_err(|e| CollectorError::InvalidPayload(format!("{identifier}: {e}")))?;

    let ticker = summary.ticker.unwrap_or_else(|| identifier.to_string());
    let mut profile = InstrumentProfile::bare(ticker);
    profile.name_vi = summary.name_vi.or(summary.name);
    profile.name_en = summary.name_en;
    profile.industry = summary.industry_activity;
    profile.sector = summary.bc_economic_sector_name;
    profile.exchange = summary.stock_exchange;
    profile.website = summary.website;
    Ok(profile)
}

/// Company profile pages, one per identifier.
pub struct ProfileSource {
    client: Client,
    base_url: String,
    endpoint: String,
}

impl ProfileSource {
    /// Source for `{base_url}/{identifier}{endpoint}`.
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl RemoteSource<str, InstrumentProfile> for ProfileSource {
    async fn fetch(&self, identifier: &str) -> Result<InstrumentProfile, CollectorError> {
        let url = format!("{}/{identifier}{}", self.base_url, self.endpoint);
        let body: Value = get_json(&self.client, &url, &[]).await?;
        parse_profile(identifier, &body)
    }
}

// ---------------------------------------------------------------------------
// Prices
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceWire {
    date: i64,
    #[serde(default)]
    price_open: Option<f64>,
    #[serde(default)]
    price_high: Option<f64>,
    #[serde(default)]
    price_low: Option<f64>,
    #[serde(default)]
    price_close: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

/// Map a price envelope into points for `request`.
///
/// # Errors
///
/// `InvalidPayload` unless the envelope status is 200 with a data array.
pub fn parse_prices(
    request: &SeriesRequest,
    body: Envelope<Vec<Value>>,
) -> Result<Vec<PricePoint>, CollectorError> {
    let rows = match (body.status, body.data) {
        (Some(200), Some(rows)) => rows,
        (status, _) => {
            return Err(CollectorError::InvalidPayload(format!(
                "{}: unexpected price response status {status:?}",
                request.identifier
            )))
        }
    };

    let kind = request.kind();
    rows.into_iter()
        .map(|row| {
            let wire: PriceWire = serde_json::from_value(row).map_err(|e| {
                CollectorError::InvalidPayload(format!("{}: {e}", request.identifier))
            })?;
            Ok(PricePoint {
                ticker: request.identifier.clone(),
                date: wire.date,
                open: wire.price_open.unwrap_or_default(),
                high: wire.price_high.unwrap_or_default(),
                low: wire.price_low.unwrap_or_default(),
                close: wire.price_close.unwrap_or_default(),
                volume: wire.volume.unwrap_or_default(),
                kind,
            })
        })
        .collect()
}

/// Paged daily price series.
pub struct PriceSource {
    client: Client,
    base_url: String,
}

impl PriceSource {
    /// Source for `{base_url}/{identifier}?page=..&size=..`.
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl RemoteSource<SeriesRequest, Vec<PricePoint>> for PriceSource {
    async fn fetch(&self, request: &SeriesRequest) -> Result<Vec<PricePoint>, CollectorError> {
        let url = format!("{}/{}", self.base_url, request.identifier);
        let mut query = vec![
            ("page", request.page.to_string()),
            ("size", request.size.to_string()),
        ];
        if request.kind() == InstrumentKind::Index {
            query.push(("type", "index".to_string()));
            query.push(("domestic", "true".to_string()));
        }

        let body: Envelope<Vec<Value>> = get_json(&self.client, &url, &query).await?;
        parse_prices(request, body)
    }
}

// ---------------------------------------------------------------------------
// Spreadsheets
// ---------------------------------------------------------------------------

struct SheetReader {
    client: Client,
    url: String,
    api_key: String,
}

impl SheetReader {
    fn new(client: Client, base_url: &str, api_key: &str, sheet: &SheetConfig) -> Self {
        Self {
            client,
            url: format!("{base_url}/{}/values/{}", sheet.spreadsheet_id, sheet.range),
            api_key: api_key.to_string(),
        }
    }

    async fn rows(&self) -> Result<Vec<Vec<Value>>, CollectorError> {
        let query = [("key", self.api_key.clone())];
        let body: SheetValues = get_json(&self.client, &self.url, &query).await?;
        body.values.ok_or_else(|| {
            CollectorError::InvalidPayload(format!("no values in sheet range {}", self.url))
        })
    }
}

/// Impact-index spreadsheet.
pub struct ImpactSheetSource(SheetReader);

impl ImpactSheetSource {
    /// Read `sheet` through the values endpoint at `base_url`.
    #[must_use]
    pub fn new(client: Client, base_url: &str, api_key: &str, sheet: &SheetConfig) -> Self {
        Self(SheetReader::new(client, base_url, api_key, sheet))
    }
}

#[async_trait]
impl RemoteSource<(), Vec<ImpactEntry>> for ImpactSheetSource {
    async fn fetch(&self, _: &()) -> Result<Vec<ImpactEntry>, CollectorError> {
        Ok(parse_impact_rows(&self.0.rows().await?))
    }
}

/// Foreign-flow spreadsheet.
pub struct ForeignFlowSheetSource(SheetReader);

impl ForeignFlowSheetSource {
    /// Read `sheet` through the values endpoint at `base_url`.
    #[must_use]
    pub fn new(client: Client, base_url: &str, api_key: &str, sheet: &SheetConfig) -> Self {
        Self(SheetReader::new(client, base_url, api_key, sheet))
    }
}

#[async_trait]
impl RemoteSource<(), Vec<ForeignFlowEntry>> for ForeignFlowSheetSource {
    async fn fetch(&self, _: &()) -> Result<Vec<ForeignFlowEntry>, CollectorError> {
        Ok(parse_foreign_flow_rows(&self.0.rows().await?))
    }
}

// ---------------------------------------------------------------------------
// Indicators
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TechnicalWire {
    #[serde(default)]
    moving_averages: Option<Vec<LineWire>>,
    #[serde(default)]
    oscillators: Option<Vec<LineWire>>,
    #[serde(default)]
    pivot: Option<Value>,
    #[serde(default)]
    gauge_moving_average: Option<Value>,
    #[serde(default)]
    gauge_oscillator: Option<Value>,
    #[serde(default)]
    gauge_summary: Option<Value>,
    #[serde(default)]
    time_frame: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LineWire {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    rating: Option<String>,
}

impl From<LineWire> for IndicatorLine {
    fn from(wire: LineWire) -> Self {
        Self {
            name: wire.name.unwrap_or_else(|| "unknown".to_string()),
            value: wire.value.as_ref().and_then(|v| {
                v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            }),
            rating: wire.rating,
        }
    }
}

fn lines(wire: Option<Vec<LineWire>>) -> Vec<IndicatorLine> {
    wire.unwrap_or_default().into_iter().map(Into::into).collect()
}

/// Map an indicator envelope into a snapshot.
///
/// A service status of 404 means there is no data for the identifier and
/// yields `Ok(None)`.
///
/// # Errors
///
/// `InvalidPayload` for any other non-200 status or a malformed body.
pub fn parse_indicators(
    request: &IndicatorRequest,
    body: Envelope<Value>,
) -> Result<Option<IndicatorSnapshot>, CollectorError> {
    let data = match (body.status, body.data) {
        (Some(404), _) => return Ok(None),
        (Some(200), Some(data)) => data,
        (status, _) => {
            return Err(CollectorError::InvalidPayload(format!(
                "{}: unexpected indicator response status {status:?}",
                request.identifier
            )))
        }
    };

    let wire: TechnicalWire = serde_json::from_value(data)
        .map_err(|e| CollectorError::InvalidPayload(format!("{}: {e}", request.identifier)))?;
    let timeframe = wire
        .time_frame
        .as_deref()
        .and_then(|tf| tf.parse::<IndicatorTimeframe>().ok())
        .unwrap_or(request.timeframe);
    let server_time = body
        .server_date_time
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    Ok(Some(IndicatorSnapshot {
        ticker: request.identifier.clone(),
        timeframe,
        server_time,
        gauge_moving_average: wire.gauge_moving_average,
        gauge_oscillator: wire.gauge_oscillator,
        gauge_summary: wire.gauge_summary,
        pivot: wire.pivot,
        moving_averages: lines(wire.moving_averages),
        oscillators: lines(wire.oscillators),
    }))
}

/// Technical indicator snapshots per identifier and timeframe.
pub struct IndicatorSource {
    client: Client,
    base_url: String,
}

impl IndicatorSource {
    /// Source for `{base_url}/{identifier}/technical/{timeframe}`.
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl RemoteSource<IndicatorRequest, Option<IndicatorSnapshot>> for IndicatorSource {
    async fn fetch(
        &self,
        request: &IndicatorRequest,
    ) -> Result<Option<IndicatorSnapshot>, CollectorError> {
        let url = format!(
            "{}/{}/technical/{}",
            self.base_url, request.identifier, request.timeframe
        );
        let body: Envelope<Value> = get_json(&self.client, &url, &[]).await?;
        parse_indicators(request, body)
    }
}

/// All HTTP sources built from one source configuration.
pub struct HttpSources {
    /// Profile pages.
    pub profiles: ProfileSource,
    /// Price series.
    pub prices: PriceSource,
    /// Impact-index sheet.
    pub impact: ImpactSheetSource,
    /// Foreign-flow sheet.
    pub foreign_flow: ForeignFlowSheetSource,
    /// Indicator snapshots.
    pub indicators: IndicatorSource,
}

impl HttpSources {
    /// Build every source. Sheet reads use the longer sheet timeout.
    ///
    /// # Errors
    ///
    /// `CollectorError::Http` if a client cannot be built.
    pub fn from_config(config: &SourceConfig) -> Result<Self, CollectorError> {
        let api = build_client(Duration::from_millis(config.request_timeout_ms))?;
        let sheets = build_client(Duration::from_millis(config.sheet_timeout_ms))?;

        Ok(Self {
            profiles: ProfileSource::new(
                api.clone(),
                &config.profile_base_url,
                &config.profile_endpoint,
            ),
            prices: PriceSource::new(api.clone(), &config.price_base_url),
            impact: ImpactSheetSource::new(
                sheets.clone(),
                &config.sheets_base_url,
                &config.sheets_api_key,
                &config.impact_sheet,
            ),
            foreign_flow: ForeignFlowSheetSource::new(
                sheets,
                &config.sheets_base_url,
                &config.sheets_api_key,
                &config.foreign_flow_sheet,
            ),
            indicators: IndicatorSource::new(api, &config.indicator_base_url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope<T: DeserializeOwned + Default>(value: Value) -> Envelope<T> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_profile() {
        let body = json!({
            "pageProps": {
                "summary": {
                    "ticker": "VNM",
                    "name": "Vinamilk",
                    "nameEn": "Vietnam Dairy Products",
                    "stockExchange": "HOSE",
                    "marketCap": 1.5e14
                }
            }
        });

        let profile = parse_profile("VNM", &body).unwrap();
        assert_eq!(profile.ticker, "VNM");
        assert_eq!(profile.name_vi.as_deref(), Some("Vinamilk"));
        assert_eq!(profile.exchange.as_deref(), Some("HOSE"));
        assert!(profile.website.is_none());
    }

    #[test]
    fn test_parse_profile_without_summary() {
        let err = parse_profile("XYZ", &json!({"pageProps": {}})).unwrap_err();
        assert!(matches!(err, CollectorError::InvalidPayload(_)));
    }

    #[test]
    fn test_parse_prices_for_index() {
        let request = SeriesRequest::recent("VNINDEX", 5);
        let body = envelope(json!({
            "status": 200,
            "total": 2,
            "data": [
                {
                    "date": 1_700_000_000,
                    "priceOpen": 1.0,
                    "priceHigh": 2.0,
                    "priceLow": 0.5,
                    "priceClose": 1.5,
                    "volume": 10.0
                },
                {"date": 1_700_086_400, "priceClose": 1.6}
            ]
        }));

        let points = parse_prices(&request, body).unwrap();
        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| p.kind == InstrumentKind::Index && p.ticker == "VNINDEX"));
        assert_eq!(points[1].open, 0.0);
        assert_eq!(points[1].close, 1.6);
    }

    #[test]
    fn test_parse_prices_rejects_bad_status() {
        let request = SeriesRequest::recent("VNM", 5);
        let body = envelope(json!({"status": 500, "data": []}));
        assert!(parse_prices(&request, body).is_err());
    }

    #[test]
    fn test_parse_indicators() {
        let request = IndicatorRequest {
            identifier: "FPT".into(),
            timeframe: IndicatorTimeframe::OneHour,
        };
        let body = envelope(json!({
            "status": 200,
            "serverDateTime": "2024-05-02T03:00:00Z",
            "data": {
                "timeFrame": "ONE_HOUR",
                "movingAverages": [{"name": "EMA10", "value": 101.5, "rating": "BUY"}],
                "oscillators": [{"value": "55.2"}],
                "pivot": {"classic": {"r1": 1.0}},
                "gaugeSummary": {"rating": "BUY"}
            }
        }));

        let snapshot = parse_indicators(&request, body).unwrap().unwrap();
        assert!(snapshot.has_content());
        assert_eq!(snapshot.moving_averages[0].value, Some(101.5));
        assert_eq!(snapshot.oscillators[0].name, "unknown");
        assert_eq!(snapshot.oscillators[0].value, Some(55.2));
        assert!(snapshot.server_time.is_some());
    }

    #[test]
    fn test_parse_indicators_not_found_is_none() {
        let request = IndicatorRequest {
            identifier: "ABC".into(),
            timeframe: IndicatorTimeframe::OneDay,
        };
        let body = envelope(json!({"status": 404}));
        assert!(parse_indicators(&request, body).unwrap().is_none());
    }
}
