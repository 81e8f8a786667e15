// =============================================================================
// Incremental Updater
// =============================================================================
//
// Appends exactly one row per new bar. The new row's indicators are computed
// by stepping the store's carry state, which is the same arithmetic the
// bootstrapper would have run over the extended history. Without a carry
// state the updater replays the stored bars plus the new one and keeps the
// last row. Existing rows are never rewritten.
//
// Polling asks for the first bar after the latest stored hour, up to now, so
// hours the provider never publishes (weekends, outages) are skipped instead
// of being requested forever.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{ForecastError, ForecastResult};
use crate::indicators::compute_with_state;
use crate::market_data::PriceSource;
use crate::record_store::RecordStore;
use crate::types::{Bar, IndicatorRow};

/// Result of offering one bar to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "record", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// A new row was computed and appended.
    Appended(IndicatorRow),
    /// The timestamp is already stored; nothing changed.
    AlreadyPresent(IndicatorRow),
}

/// Compute and append the row for `bar`.
pub fn apply_bar(store: &mut RecordStore, bar: Bar) -> ForecastResult<UpdateOutcome> {
    if let Some(existing) = store.get(bar.timestamp) {
        info!(timestamp = %bar.timestamp, "bar already stored, skipping");
        return Ok(UpdateOutcome::AlreadyPresent(*existing));
    }
    let Some(latest) = store.latest_timestamp() else {
        return Err(ForecastError::store("record store is empty, bootstrap it first"));
    };
    if bar.timestamp <= latest {
        return Err(ForecastError::OutOfOrderTimestamp {
            incoming: bar.timestamp,
            latest,
        });
    }

    let (row, state) = match store.carry() {
        Some(carry) => {
            let mut state = carry.clone();
            let row = state.step(&bar)?;
            (row, state)
        }
        None => {
            warn!(rows = store.len(), "no indicator state, replaying stored bars");
            let mut bars: Vec<Bar> = store.rows().iter().map(IndicatorRow::bar).collect();
            bars.push(bar);
            let (rows, state) = compute_with_state(&bars)?;
            let row = rows.last().copied().filter(|r| r.timestamp == bar.timestamp);
            (row, state)
        }
    };

    let row = row.ok_or_else(|| {
        ForecastError::store(format!(
            "indicators for {} are still warming up",
            bar.timestamp
        ))
    })?;

    let bars_seen = state.bars_seen();
    store.append(row, Some(state))?;
    info!(
        timestamp = %row.timestamp,
        close = row.close,
        rows = store.len(),
        bars_seen,
        "row appended"
    );
    Ok(UpdateOutcome::Appended(row))
}

/// Fetch the bar stamped `target`, falling back to the newest bar returned.
pub async fn fetch_bar(source: &dyn PriceSource, target: DateTime<Utc>) -> ForecastResult<Bar> {
    let bars = source.fetch_bars(target, target).await?;
    bars.iter()
        .find(|b| b.timestamp == target)
        .or_else(|| bars.last())
        .copied()
        .ok_or(ForecastError::EmptyResult {
            start: target,
            end: target,
        })
}

/// Fetch the earliest bar strictly after `latest`, looking up to `now`.
#[instrument(skip(source), fields(provider = source.name()))]
pub async fn fetch_next_bar(
    source: &dyn PriceSource,
    latest: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ForecastResult<Bar> {
    let start = latest + Duration::hours(1);
    let end = now.max(start);
    let bars = source.fetch_bars(start, end).await?;
    let bar = bars
        .into_iter()
        .find(|b| b.timestamp > latest)
        .ok_or(ForecastError::EmptyResult { start, end })?;

    let skipped = (bar.timestamp - start).num_hours();
    if skipped > 0 {
        warn!(from = %start, to = %bar.timestamp, hours = skipped, "upstream gap skipped");
    }
    Ok(bar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::compute_rows;
    use crate::indicators::testing::synthetic_bars;
    use crate::market_data::testing::StaticFeed;
    use crate::pipeline::bootstrap::bootstrap_from_bars;
    use crate::types::WINDOW_SIZE;

    fn bootstrapped(bars: &[Bar]) -> RecordStore {
        let mut store = RecordStore::in_memory();
        bootstrap_from_bars(bars, &mut store, WINDOW_SIZE).unwrap();
        store
    }

    #[test]
    fn incremental_row_matches_full_bootstrap() {
        let bars = synthetic_bars(131);
        let full = compute_rows(&bars).unwrap();

        let mut store = bootstrapped(&bars[..130]);
        let outcome = apply_bar(&mut store, bars[130]).unwrap();
        let UpdateOutcome::Appended(row) = outcome else {
            panic!("expected an append");
        };

        let expected = full.last().unwrap();
        assert_eq!(row.timestamp, expected.timestamp);
        for (a, b) in row.features().iter().zip(expected.features().iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn many_updates_stay_consistent_with_bulk() {
        let bars = synthetic_bars(200);
        let full = compute_rows(&bars).unwrap();
        let mut store = bootstrapped(&bars[..130]);
        for bar in &bars[130..] {
            apply_bar(&mut store, *bar).unwrap();
        }
        assert_eq!(store.len(), WINDOW_SIZE + 70);
        assert_eq!(store.rows(), &full[full.len() - store.len()..]);
    }

    #[test]
    fn append_leaves_prior_rows_untouched() {
        let bars = synthetic_bars(131);
        let mut store = bootstrapped(&bars[..130]);
        let before = store.rows().to_vec();
        let rsi_before = before.last().unwrap().rsi;

        apply_bar(&mut store, bars[130]).unwrap();
        assert_eq!(store.len(), WINDOW_SIZE + 1);
        assert_eq!(&store.rows()[..WINDOW_SIZE], before.as_slice());
        assert_eq!(store.rows()[WINDOW_SIZE - 1].rsi.to_bits(), rsi_before.to_bits());
    }

    #[test]
    fn stored_timestamp_is_idempotent() {
        let bars = synthetic_bars(131);
        let mut store = bootstrapped(&bars[..130]);
        apply_bar(&mut store, bars[130]).unwrap();

        let again = apply_bar(&mut store, bars[130]).unwrap();
        assert!(matches!(again, UpdateOutcome::AlreadyPresent(_)));
        let older = apply_bar(&mut store, bars[100]).unwrap();
        assert!(matches!(older, UpdateOutcome::AlreadyPresent(_)));
        assert_eq!(store.len(), WINDOW_SIZE + 1);
    }

    #[test]
    fn unknown_older_bar_is_out_of_order() {
        let bars = synthetic_bars(131);
        let mut store = bootstrapped(&bars[..130]);
        let mut stale = bars[129];
        stale.timestamp = bars[129].timestamp - chrono::Duration::minutes(30);

        let err = apply_bar(&mut store, stale).unwrap_err();
        assert_eq!(err.kind(), "OutOfOrderTimestamp");
        assert_eq!(store.len(), WINDOW_SIZE);
    }

    #[test]
    fn replay_without_carry_state() {
        let bars = synthetic_bars(131);
        let mut store = RecordStore::in_memory();
        let seeded = compute_rows(&bars[..130]).unwrap();
        store
            .replace(seeded[seeded.len() - WINDOW_SIZE..].to_vec(), None)
            .unwrap();

        let outcome = apply_bar(&mut store, bars[130]).unwrap();
        assert!(matches!(outcome, UpdateOutcome::Appended(_)));
        assert_eq!(store.len(), WINDOW_SIZE + 1);
        assert!(store.carry().is_some());

        // Replay over the stored bars only, as the table on disk would allow.
        let mut stored_bars: Vec<Bar> = store.rows()[..WINDOW_SIZE].iter().map(|r| r.bar()).collect();
        stored_bars.push(bars[130]);
        let replayed = compute_rows(&stored_bars).unwrap();
        assert_eq!(store.latest(), replayed.last());
    }

    #[test]
    fn empty_store_requires_bootstrap() {
        let mut store = RecordStore::in_memory();
        let err = apply_bar(&mut store, synthetic_bars(1)[0]).unwrap_err();
        assert_eq!(err.kind(), "Store");
    }

    #[tokio::test]
    async fn fetch_bar_prefers_exact_hour() {
        let bars = synthetic_bars(132);
        let feed = StaticFeed::new(bars.clone());

        let bar = fetch_bar(&feed, bars[130].timestamp).await.unwrap();
        assert_eq!(bar, bars[130]);
    }

    #[tokio::test]
    async fn next_bar_skips_missing_hours() {
        let bars = synthetic_bars(140);
        // Hours 130..135 were never published.
        let published: Vec<Bar> = bars[..130].iter().chain(&bars[135..]).copied().collect();
        let feed = StaticFeed::new(published);
        let mut store = bootstrapped(&bars[..130]);
        let latest = store.latest_timestamp().unwrap();

        let bar = fetch_next_bar(&feed, latest, bars[139].timestamp).await.unwrap();
        assert_eq!(bar.timestamp, bars[135].timestamp);

        let outcome = apply_bar(&mut store, bar).unwrap();
        assert!(matches!(outcome, UpdateOutcome::Appended(_)));
        assert_eq!(store.latest_timestamp(), Some(bars[135].timestamp));
    }

    #[tokio::test]
    async fn nothing_after_latest_is_empty_result() {
        let bars = synthetic_bars(130);
        let feed = StaticFeed::new(bars.clone());
        let latest = bars[129].timestamp;

        let err = fetch_next_bar(&feed, latest, latest + Duration::hours(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "EmptyResult");
    }

    #[tokio::test]
    async fn clock_behind_store_still_queries_next_hour() {
        let bars = synthetic_bars(131);
        let feed = StaticFeed::new(bars.clone());

        let bar = fetch_next_bar(&feed, bars[129].timestamp, bars[0].timestamp).await.unwrap();
        assert_eq!(bar, bars[130]);
    }
}
