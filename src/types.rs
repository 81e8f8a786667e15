// =============================================================================
// Shared types used across the forecaster
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of trailing rows the sequence model consumes.
pub const WINDOW_SIZE: usize = 60;

/// Model input columns, in the order the feature scaler was fitted on.
///
/// Timestamp and `volume` are excluded. The current hour's `close` is an
/// input; the target is the next hour's close.
pub const FEATURE_COLUMNS: [&str; 10] = [
    "open",
    "high",
    "low",
    "close",
    "MACD",
    "Signal",
    "Histogram",
    "RSI",
    "EMA 30",
    "EMA 120",
];

/// One hourly OHLCV observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// All price and volume fields are finite numbers.
    pub fn is_finite(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// A bar extended with the indicator set the model was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRow {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub rsi: f64,
    pub ema_30: f64,
    pub ema_120: f64,
}

impl IndicatorRow {
    /// The raw bar this row was computed from.
    pub fn bar(&self) -> Bar {
        Bar::new(
            self.timestamp,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
        )
    }

    /// Feature vector in [`FEATURE_COLUMNS`] order.
    pub fn features(&self) -> [f64; FEATURE_COLUMNS.len()] {
        [
            self.open,
            self.high,
            self.low,
            self.close,
            self.macd,
            self.signal,
            self.histogram,
            self.rsi,
            self.ema_30,
            self.ema_120,
        ]
    }

    /// Every raw and computed field is defined.
    pub fn is_complete(&self) -> bool {
        self.bar().is_finite() && self.features().iter().all(|v| v.is_finite())
    }
}

/// A single next-hour close forecast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub predicted_close: f64,
    /// Timestamp of the newest row in the consumed window.
    pub window_end: DateTime<Utc>,
    /// The hour being forecast.
    pub target_time: DateTime<Utc>,
    pub rows_used: usize,
}
