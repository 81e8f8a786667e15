// =============================================================================
// Relative Strength Index (RSI) — simple rolling averages
// =============================================================================
//
// Step 1 — Compute price changes (deltas) from consecutive closes.
// Step 2 — Over the trailing `period` deltas, average the gains and the
//          absolute losses with a plain arithmetic mean (no Wilder
//          smoothing).
// Step 3 — RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS)
//
// The value is undefined until `period` deltas exist, i.e. for the first
// `period` closes.
// =============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Streaming RSI over a fixed trailing window of deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsiState {
    pub period: usize,
    prev_close: Option<f64>,
    deltas: VecDeque<f64>,
}

impl RsiState {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            prev_close: None,
            deltas: VecDeque::with_capacity(period + 1),
        }
    }

    /// Feed the next close. Returns `None` while the window is still filling.
    pub fn update(&mut self, close: f64) -> Option<f64> {
        let prev = self.prev_close.replace(close)?;
        self.deltas.push_back(close - prev);
        while self.deltas.len() > self.period {
            self.deltas.pop_front();
        }
        if self.deltas.len() < self.period {
            return None;
        }

        let (sum_gain, sum_loss) = self.deltas.iter().fold((0.0_f64, 0.0_f64), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else if d < 0.0 {
                (g, l - d)
            } else {
                (g, l)
            }
        });

        let period_f = self.period as f64;
        rsi_from_averages(sum_gain / period_f, sum_loss / period_f)
    }
}

/// Compute the RSI series for `closes`.
///
/// The returned vector has one value per close starting at index `period`.
///
/// # Edge cases
/// - `closes.len() < period + 1` => empty vec
/// - no losses in the window => 100.0
/// - no movement at all in the window => 50.0
#[cfg(test)]
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let mut state = RsiState::new(period);
    closes.iter().filter_map(|&c| state.update(c)).collect()
}

/// Convert average gain / average loss into an RSI value in [0, 100].
///
/// - If both averages are zero, RSI is 50.0 (no movement).
/// - If average loss is zero (only gains), RSI is 100.0.
/// - Returns `None` when the result is non-finite.
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    if rsi.is_finite() {
        Some(rsi)
    } else {
        None
    }
}
