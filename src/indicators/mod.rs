// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, causal implementations of the indicator set the forecasting model was
// trained on: MACD(12, 26, 9), RSI(14), EMA(30) and EMA(120). Each indicator
// is a small streaming accumulator. The whole-series functions are folds over
// the same accumulators and back the tests.

pub mod ema;
pub mod engine;
pub mod macd;
pub mod rsi;

pub use engine::{compute_with_state, IndicatorState};

#[cfg(test)]
pub use engine::compute_rows;
