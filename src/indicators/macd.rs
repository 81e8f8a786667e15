// =============================================================================
// Moving Average Convergence Divergence (MACD 12/26/9)
// =============================================================================
//
//   MACD      = EMA_fast(close) - EMA_slow(close)
//   Signal    = EMA_signal(MACD)
//   Histogram = MACD - Signal
// =============================================================================

use serde::{Deserialize, Serialize};

use super::ema::EmaState;

pub const FAST_SPAN: usize = 12;
pub const SLOW_SPAN: usize = 26;
pub const SIGNAL_SPAN: usize = 9;

/// One MACD observation, with the two underlying EMAs kept for inspection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacdState {
    fast: EmaState,
    slow: EmaState,
    signal: EmaState,
}

impl Default for MacdState {
    fn default() -> Self {
        Self::new(FAST_SPAN, SLOW_SPAN, SIGNAL_SPAN)
    }
}

impl MacdState {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: EmaState::new(fast),
            slow: EmaState::new(slow),
            signal: EmaState::new(signal),
        }
    }

    pub fn update(&mut self, close: f64) -> MacdPoint {
        let ema_fast = self.fast.update(close);
        let ema_slow = self.slow.update(close);
        let macd = ema_fast - ema_slow;
        let signal = self.signal.update(macd);
        MacdPoint {
            ema_fast,
            ema_slow,
            macd,
            signal,
            histogram: macd - signal,
        }
    }
}

/// MACD(12, 26, 9) for every close. Defined from the first bar.
#[cfg(test)]
pub fn calculate_macd(closes: &[f64]) -> Vec<MacdPoint> {
    let mut state = MacdState::default();
    closes.iter().map(|&c| state.update(c)).collect()
}
