// =============================================================================
// Tiingo FX REST API Client
// =============================================================================
//
// SECURITY: The API token is sent as an `Authorization: Token ...` header and
// is never logged or serialized. Only the public hourly price endpoint is
// used:
//
//   GET /tiingo/fx/{ticker}/prices?resampleFreq=1hour&startDate=..&endDate=..
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::{ForecastError, ForecastResult};
use crate::market_data::PriceSource;
use crate::types::Bar;

/// Default upstream host.
pub const DEFAULT_BASE_URL: &str = "https://api.tiingo.com";

/// Resample frequency requested from Tiingo; the whole pipeline is hourly.
const RESAMPLE_FREQ: &str = "1hour";

/// Date format accepted by the `startDate` / `endDate` parameters.
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One element of the price endpoint's JSON array.
#[derive(Debug, Deserialize)]
struct TiingoPrice {
    date: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    /// FX feeds usually omit volume.
    #[serde(default)]
    volume: Option<f64>,
}

impl From<TiingoPrice> for Bar {
    fn from(p: TiingoPrice) -> Self {
        Bar::new(p.date, p.open, p.high, p.low, p.close, p.volume.unwrap_or(0.0))
    }
}

/// Tiingo FX price client for a single ticker.
#[derive(Clone)]
pub struct TiingoClient {
    ticker: String,
    base_url: String,
    client: reqwest::Client,
}

impl TiingoClient {
    /// Create a new `TiingoClient`.
    ///
    /// # Arguments
    /// * `api_key` — Tiingo API token (sent as a header, never in the URL).
    /// * `ticker`  — FX pair, e.g. "EURUSD". Lower-cased for the URL.
    pub fn new(api_key: impl Into<String>, ticker: impl Into<String>) -> ForecastResult<Self> {
        Self::with_base_url(api_key, ticker, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        ticker: impl Into<String>,
        base_url: impl Into<String>,
    ) -> ForecastResult<Self> {
        let api_key = api_key.into();

        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        match HeaderValue::from_str(&format!("Token {api_key}")) {
            Ok(val) => {
                default_headers.insert(AUTHORIZATION, val);
            }
            Err(_) => warn!("Tiingo API key contains invalid header characters, sending no token"),
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "TiingoClient initialised");

        Ok(Self {
            ticker: ticker.into().to_lowercase(),
            base_url,
            client,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    /// Full URL of the price endpoint for `[start, end]`.
    fn prices_url(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        format!(
            "{}/tiingo/fx/{}/prices?resampleFreq={}&startDate={}&endDate={}",
            self.base_url,
            self.ticker,
            RESAMPLE_FREQ,
            start.format(DATE_FORMAT),
            end.format(DATE_FORMAT),
        )
    }

    /// GET /tiingo/fx/{ticker}/prices — hourly bars in `[start, end]`.
    #[instrument(skip(self), name = "tiingo::get_prices")]
    pub async fn get_prices(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ForecastResult<Vec<Bar>> {
        let url = self.prices_url(start, end);

        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ForecastError::UpstreamUnavailable {
                reason: format!("Tiingo GET prices returned {status}: {body}"),
            });
        }

        let raw: Vec<TiingoPrice> = resp.json().await?;
        let bars = normalise_bars(raw.into_iter().map(Bar::from).collect());

        debug!(ticker = %self.ticker, count = bars.len(), "prices fetched");
        if bars.is_empty() {
            return Err(ForecastError::EmptyResult { start, end });
        }
        Ok(bars)
    }
}

/// Sort ascending and drop repeated timestamps, keeping the first occurrence.
fn normalise_bars(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.timestamp);
    let before = bars.len();
    bars.dedup_by_key(|b| b.timestamp);
    if bars.len() != before {
        warn!(dropped = before - bars.len(), "duplicate timestamps in upstream payload");
    }
    bars
}

#[async_trait]
impl PriceSource for TiingoClient {
    async fn fetch_bars(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ForecastResult<Vec<Bar>> {
        self.get_prices(start, end).await
    }

    fn name(&self) -> &str {
        "tiingo"
    }
}

impl std::fmt::Debug for TiingoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiingoClient")
            .field("api_key", &"<redacted>")
            .field("ticker", &self.ticker)
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
