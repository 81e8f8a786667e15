// =============================================================================
// Indicator Engine — bars in, model-ready rows out
// =============================================================================
//
// The engine is a single streaming state machine. Bulk computation folds the
// step over every bar; incremental computation resumes the same step from a
// saved `IndicatorState`. Both paths execute identical floating-point
// operations in identical order, which is what keeps the bootstrap and
// update paths bit-for-bit consistent.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ema::EmaState;
use super::macd::MacdState;
use super::rsi::RsiState;
use crate::error::{ForecastError, ForecastResult};
use crate::types::{Bar, IndicatorRow};

pub const RSI_PERIOD: usize = 14;
pub const EMA_SHORT_SPAN: usize = 30;
pub const EMA_LONG_SPAN: usize = 120;

/// Carry state of the indicator computation after the last consumed bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorState {
    macd: MacdState,
    rsi: RsiState,
    ema_short: EmaState,
    ema_long: EmaState,
    last_timestamp: Option<DateTime<Utc>>,
    bars_seen: u64,
}

impl Default for IndicatorState {
    fn default() -> Self {
        Self {
            macd: MacdState::default(),
            rsi: RsiState::new(RSI_PERIOD),
            ema_short: EmaState::new(EMA_SHORT_SPAN),
            ema_long: EmaState::new(EMA_LONG_SPAN),
            last_timestamp: None,
            bars_seen: 0,
        }
    }
}

impl IndicatorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp of the last bar folded into this state.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    pub fn bars_seen(&self) -> u64 {
        self.bars_seen
    }

    /// Advance the state by one bar.
    ///
    /// Returns `Ok(None)` while the slowest-defined indicator (RSI) is still
    /// warming up. The bar must be finite and strictly newer than the last
    /// one consumed; on error the state is left unchanged.
    pub fn step(&mut self, bar: &Bar) -> ForecastResult<Option<IndicatorRow>> {
        if !bar.is_finite() {
            return Err(ForecastError::MalformedBar {
                reason: format!("non-finite value in bar at {}", bar.timestamp),
            });
        }
        if let Some(latest) = self.last_timestamp {
            if bar.timestamp <= latest {
                return Err(ForecastError::OutOfOrderTimestamp {
                    incoming: bar.timestamp,
                    latest,
                });
            }
        }

        let macd = self.macd.update(bar.close);
        let rsi = self.rsi.update(bar.close);
        let ema_30 = self.ema_short.update(bar.close);
        let ema_120 = self.ema_long.update(bar.close);
        self.last_timestamp = Some(bar.timestamp);
        self.bars_seen += 1;

        Ok(rsi.map(|rsi| IndicatorRow {
            timestamp: bar.timestamp,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            macd: macd.macd,
            signal: macd.signal,
            histogram: macd.histogram,
            rsi,
            ema_30,
            ema_120,
        }))
    }
}

/// Run the engine over `bars` from scratch, returning the fully defined rows
/// and the carry state after the last bar.
pub fn compute_with_state(bars: &[Bar]) -> ForecastResult<(Vec<IndicatorRow>, IndicatorState)> {
    let mut state = IndicatorState::new();
    let mut rows = Vec::with_capacity(bars.len().saturating_sub(RSI_PERIOD));
    for bar in bars {
        if let Some(row) = state.step(bar)? {
            rows.push(row);
        }
    }
    Ok((rows, state))
}

/// Run the engine over `bars` and keep only the fully defined rows.
#[cfg(test)]
pub fn compute_rows(bars: &[Bar]) -> ForecastResult<Vec<IndicatorRow>> {
    compute_with_state(bars).map(|(rows, _)| rows)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::ema::calculate_ema;
    use crate::indicators::testing::synthetic_bars;

    #[test]
    fn warm_up_rows_are_dropped() {
        let bars = synthetic_bars(130);
        let rows = compute_rows(&bars).unwrap();
        assert_eq!(rows.len(), 130 - RSI_PERIOD);
        assert_eq!(rows[0].timestamp, bars[RSI_PERIOD].timestamp);
        assert!(rows.iter().all(IndicatorRow::is_complete));
    }

    #[test]
    fn determinism_bit_for_bit() {
        let bars = synthetic_bars(200);
        let a = compute_rows(&bars).unwrap();
        let b = compute_rows(&bars).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            for (fx, fy) in x.features().iter().zip(y.features().iter()) {
                assert_eq!(fx.to_bits(), fy.to_bits());
            }
        }
    }

    #[test]
    fn causality_prefix_reproduces_rows() {
        let bars = synthetic_bars(160);
        let full = compute_rows(&bars).unwrap();
        for k in [15, 40, 100, 159] {
            let prefix = compute_rows(&bars[..k]).unwrap();
            assert_eq!(prefix.as_slice(), &full[..prefix.len()], "prefix {k}");
        }
    }

    #[test]
    fn resumed_state_matches_bulk() {
        let bars = synthetic_bars(150);
        let full = compute_rows(&bars).unwrap();

        let (_, mut state) = compute_with_state(&bars[..149]).unwrap();
        let next = state.step(&bars[149]).unwrap().unwrap();
        assert_eq!(&next, full.last().unwrap());
    }

    #[test]
    fn macd_matches_ema_difference() {
        let bars = synthetic_bars(130);
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let e12 = calculate_ema(&closes, 12);
        let e26 = calculate_ema(&closes, 26);
        let e120 = calculate_ema(&closes, 120);
        let rows = compute_rows(&bars).unwrap();
        let last = rows.last().unwrap();
        assert!((last.macd - (e12[129] - e26[129])).abs() < 1e-9);
        assert_eq!(last.ema_120.to_bits(), e120[129].to_bits());
    }

    #[test]
    fn out_of_order_bar_is_rejected_without_mutation() {
        let bars = synthetic_bars(20);
        let (_, mut state) = compute_with_state(&bars).unwrap();
        let before = state.clone();
        let err = state.step(&bars[5]).unwrap_err();
        assert_eq!(err.kind(), "OutOfOrderTimestamp");
        assert_eq!(state, before);
    }

    #[test]
    fn non_finite_bar_is_rejected() {
        let mut bars = synthetic_bars(20);
        bars[3].close = f64::NAN;
        let err = compute_rows(&bars).unwrap_err();
        assert_eq!(err.kind(), "MalformedBar");
    }
}
