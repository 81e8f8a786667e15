// =============================================================================
// Historical Bootstrapper
// =============================================================================
//
// Fetches W + warm-up hours of raw bars ending at the target time, runs the
// indicator engine once over the whole range, keeps the last W fully defined
// rows and writes them (plus the carry state) as the initial record store.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{ForecastError, ForecastResult};
use crate::indicators::compute_with_state;
use crate::market_data::PriceSource;
use crate::record_store::RecordStore;
use crate::types::Bar;

/// What a bootstrap run fetched and kept.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub fetched: usize,
    pub computed: usize,
    pub retained: usize,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
}

/// Fetch history from `source` and initialize `store`.
///
/// The store is only touched when the whole run succeeds.
#[instrument(skip(source, store), fields(provider = source.name()))]
pub async fn bootstrap(
    source: &dyn PriceSource,
    store: &mut RecordStore,
    end: DateTime<Utc>,
    window: usize,
    warmup_hours: i64,
) -> ForecastResult<BootstrapReport> {
    let start = end - Duration::hours(window as i64 + warmup_hours);
    info!(%start, %end, "fetching bootstrap history");

    let bars = source.fetch_bars(start, end).await?;
    if bars.is_empty() {
        return Err(ForecastError::EmptyResult { start, end });
    }
    bootstrap_from_bars(&bars, store, window)
}

/// Initialize `store` from an already-fetched bar sequence.
pub fn bootstrap_from_bars(
    bars: &[Bar],
    store: &mut RecordStore,
    window: usize,
) -> ForecastResult<BootstrapReport> {
    if window == 0 {
        return Err(ForecastError::InsufficientWindow {
            expected: 1,
            actual: 0,
        });
    }

    let (rows, state) = compute_with_state(bars)?;
    let computed = rows.len();
    if computed < window {
        warn!(
            fetched = bars.len(),
            computed,
            window,
            "not enough history to fill the window"
        );
        return Err(ForecastError::InsufficientWindow {
            expected: window,
            actual: computed,
        });
    }

    let retained: Vec<_> = rows[computed - window..].to_vec();
    let report = BootstrapReport {
        fetched: bars.len(),
        computed,
        retained: retained.len(),
        first: retained[0].timestamp,
        last: retained[retained.len() - 1].timestamp,
    };

    let bars_seen = state.bars_seen();
    store.replace(retained, Some(state))?;
    info!(
        bars_seen,
        fetched = report.fetched,
        computed = report.computed,
        retained = report.retained,
        last = %report.last,
        "bootstrap complete"
    );
    Ok(report)
}
