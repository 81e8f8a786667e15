// =============================================================================
// Market data seam
// =============================================================================
//
// The core never talks to a concrete provider. Bootstrapping and polling go
// through `PriceSource`, which the Tiingo client implements in production and
// an in-memory feed implements in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ForecastResult;
use crate::types::Bar;

/// A time-indexed source of hourly OHLCV bars for one symbol.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch the bars whose timestamps fall in `[start, end]`, ascending.
    ///
    /// Returns `EmptyResult` when the provider answers successfully with no
    /// records, and `UpstreamUnavailable` on transport errors or a non-success
    /// status.
    async fn fetch_bars(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ForecastResult<Vec<Bar>>;

    /// Human-readable name used in logs.
    fn name(&self) -> &str;
}
