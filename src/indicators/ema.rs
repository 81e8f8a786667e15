// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// EMA gives more weight to recent prices, making it more responsive to new
// information than the Simple Moving Average (SMA).
//
// Formula:
//   alpha  = 2 / (span + 1)
//   EMA_0  = x_0
//   EMA_t  = x_t * alpha + EMA_{t-1} * (1 - alpha)
//
// The series is seeded with the first observation rather than an SMA, so an
// EMA is defined from the very first bar and every value depends only on the
// current and earlier inputs.
// =============================================================================

use serde::{Deserialize, Serialize};

/// Streaming EMA accumulator.
///
/// [`calculate_ema`] is a fold of [`EmaState::update`], so a series computed
/// in bulk and one continued bar-by-bar from a saved state are bit-identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmaState {
    pub span: usize,
    alpha: f64,
    value: Option<f64>,
}

impl EmaState {
    /// Create an empty accumulator. `span` must be at least 1.
    pub fn new(span: usize) -> Self {
        let span = span.max(1);
        Self {
            span,
            alpha: 2.0 / (span as f64 + 1.0),
            value: None,
        }
    }

    /// Feed the next observation and return the updated EMA.
    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            None => x,
            Some(prev) => x * self.alpha + prev * (1.0 - self.alpha),
        };
        self.value = Some(next);
        next
    }
}

/// Compute the EMA series for `values` with the given `span`.
///
/// The output has the same length as the input; element `i` depends on
/// `values[..=i]` only.
///
/// # Edge cases
/// - empty input => empty vec
/// - `span == 0` is treated as `span == 1` (the EMA equals the input)
#[cfg(test)]
pub fn calculate_ema(values: &[f64], span: usize) -> Vec<f64> {
    let mut state = EmaState::new(span);
    values.iter().map(|&x| state.update(x)).collect()
}
