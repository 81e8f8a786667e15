// =============================================================================
// Prediction Engine
// =============================================================================
//
// Consumes the trailing window of the record store and produces one
// next-hour close forecast:
//
//   1. validate exactly W complete, ascending rows
//   2. stack the rows into a W x F matrix and scale it column-wise
//   3. run the sequence model over the scaled matrix
//   4. invert the normalized output through the target scaler
//
// The model and both scalers are loaded once into an `ArtifactContext` and
// shared read-only behind the three capability traits below.
// =============================================================================

pub mod lstm;
pub mod scaler;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use ndarray::{Array2, ArrayView2};
use tracing::{debug, info};

use crate::error::{ForecastError, ForecastResult};
use crate::record_store::RecordStore;
use crate::types::{Forecast, IndicatorRow, FEATURE_COLUMNS, WINDOW_SIZE};

pub use lstm::LstmModel;
pub use scaler::MinMaxScaler;

/// Maps raw feature rows into the model's normalized space.
pub trait FeatureTransform: Send + Sync {
    fn width(&self) -> usize;
    fn apply(&self, raw: ArrayView2<f64>) -> ForecastResult<Array2<f64>>;
}

/// Maps a normalized model output back to price scale.
pub trait TargetTransform: Send + Sync {
    fn invert(&self, normalized: f64) -> f64;
}

/// A pretrained model reducing a T x F sequence to one scalar.
pub trait SequenceModel: Send + Sync {
    fn input_size(&self) -> usize;
    fn sequence_len(&self) -> usize;
    fn infer(&self, window: ArrayView2<f64>) -> ForecastResult<f64>;
}

/// Locations of the three artifacts on disk.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub feature_scaler: PathBuf,
    pub target_scaler: PathBuf,
}

/// Process-wide, read-only inference context built once at startup.
pub struct ArtifactContext {
    feature_scaler: Arc<dyn FeatureTransform>,
    target_scaler: Arc<dyn TargetTransform>,
    model: Arc<dyn SequenceModel>,
    window_size: usize,
}

impl ArtifactContext {
    /// Assemble a context from already-loaded artifacts, checking that their
    /// shapes agree with the fixed feature layout.
    pub fn new(
        feature_scaler: Arc<dyn FeatureTransform>,
        target_scaler: Arc<dyn TargetTransform>,
        model: Arc<dyn SequenceModel>,
    ) -> ForecastResult<Self> {
        let features = FEATURE_COLUMNS.len();
        if feature_scaler.width() != features {
            return Err(ForecastError::artifact(
                "feature scaler",
                format!("fitted on {} columns, pipeline emits {features}", feature_scaler.width()),
            ));
        }
        if model.input_size() != features {
            return Err(ForecastError::artifact(
                "model",
                format!("expects {} inputs, pipeline emits {features}", model.input_size()),
            ));
        }
        if model.sequence_len() != WINDOW_SIZE {
            return Err(ForecastError::artifact(
                "model",
                format!(
                    "trained on {} time steps, window is {WINDOW_SIZE}",
                    model.sequence_len()
                ),
            ));
        }

        Ok(Self {
            feature_scaler,
            target_scaler,
            model,
            window_size: WINDOW_SIZE,
        })
    }

    /// Load the JSON artifacts at `paths`.
    pub fn load(paths: &ArtifactPaths) -> ForecastResult<Self> {
        let feature_scaler = MinMaxScaler::load(&paths.feature_scaler)?;
        if !feature_scaler.feature_names().is_empty()
            && feature_scaler.feature_names().iter().map(String::as_str).ne(FEATURE_COLUMNS)
        {
            return Err(ForecastError::artifact(
                paths.feature_scaler.display().to_string(),
                format!(
                    "column order {:?} does not match {:?}",
                    feature_scaler.feature_names(),
                    FEATURE_COLUMNS
                ),
            ));
        }

        let target_scaler = MinMaxScaler::load(&paths.target_scaler)?;
        if target_scaler.width() != 1 {
            return Err(ForecastError::artifact(
                paths.target_scaler.display().to_string(),
                format!("target scaler has {} columns, expected 1", target_scaler.width()),
            ));
        }

        let model = LstmModel::load(&paths.model)?;
        info!(
            model = %paths.model.display(),
            layers = model.num_layers(),
            hidden = model.hidden_size(),
            sequence = model.sequence_len(),
            "prediction artifacts loaded"
        );

        Self::new(Arc::new(feature_scaler), Arc::new(target_scaler), Arc::new(model))
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

impl std::fmt::Debug for ArtifactContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactContext")
            .field("features", &self.feature_scaler.width())
            .field("window_size", &self.window_size)
            .finish()
    }
}

/// Stateless forecaster over a shared [`ArtifactContext`].
#[derive(Debug, Clone)]
pub struct PredictionEngine {
    ctx: Arc<ArtifactContext>,
}

impl PredictionEngine {
    pub fn new(ctx: Arc<ArtifactContext>) -> Self {
        Self { ctx }
    }

    pub fn window_size(&self) -> usize {
        self.ctx.window_size
    }

    /// Forecast from the store's trailing window.
    pub fn predict_from_store(&self, store: &RecordStore) -> ForecastResult<Forecast> {
        self.predict(store.last_rows(self.ctx.window_size))
    }

    /// Forecast the close of the hour after the last row of `window`.
    pub fn predict(&self, window: &[IndicatorRow]) -> ForecastResult<Forecast> {
        validate_window(window, self.ctx.window_size)?;

        let raw = feature_matrix(window)?;
        let scaled = self.ctx.feature_scaler.apply(raw.view())?;

        let normalized = self.ctx.model.infer(scaled.view())?;
        let predicted_close = self.ctx.target_scaler.invert(normalized);
        if !predicted_close.is_finite() {
            return Err(ForecastError::InvalidWindow {
                reason: "forecast is not a finite number".into(),
            });
        }

        let window_end = window[window.len() - 1].timestamp;
        debug!(%window_end, normalized, predicted_close, "forecast computed");

        Ok(Forecast {
            predicted_close,
            window_end,
            target_time: window_end + Duration::hours(1),
            rows_used: window.len(),
        })
    }
}

/// Row-major W x F matrix of the rows' features.
fn feature_matrix(window: &[IndicatorRow]) -> ForecastResult<Array2<f64>> {
    let flat: Vec<f64> = window.iter().flat_map(|row| row.features()).collect();
    Array2::from_shape_vec((window.len(), FEATURE_COLUMNS.len()), flat).map_err(|e| {
        ForecastError::InvalidWindow {
            reason: format!("cannot shape feature matrix: {e}"),
        }
    })
}

/// Exactly `size` complete rows in strictly ascending timestamp order.
pub fn validate_window(window: &[IndicatorRow], size: usize) -> ForecastResult<()> {
    if window.len() < size {
        return Err(ForecastError::InsufficientWindow {
            expected: size,
            actual: window.len(),
        });
    }
    if window.len() != size {
        return Err(ForecastError::InvalidWindow {
            reason: format!("expected {size} rows, got {}", window.len()),
        });
    }
    if let Some(bad) = window.iter().find(|r| !r.is_complete()) {
        return Err(ForecastError::InvalidWindow {
            reason: format!("row at {} has undefined values", bad.timestamp),
        });
    }
    if window.windows(2).any(|p| p[1].timestamp <= p[0].timestamp) {
        return Err(ForecastError::InvalidWindow {
            reason: "rows are not in strictly ascending timestamp order".into(),
        });
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
pub mod testing {
    use std::sync::Arc;

    use super::lstm::tests::uniform_artifact;
    use super::scaler::ScalerArtifact;
    use super::*;

    /// Context whose model always outputs `normalized`, with a target scaler
    /// mapping [0, 1] onto [1.0, 1.2].
    pub fn constant_context(normalized: f64) -> ArtifactContext {
        let features = FEATURE_COLUMNS.len();
        let feature_scaler = MinMaxScaler::from_artifact(
            "features",
            ScalerArtifact {
                data_min: vec![0.0; features],
                data_max: vec![100.0; features],
                feature_range: (0.0, 1.0),
                feature_names: Vec::new(),
            },
        )
        .unwrap();
        let target_scaler = MinMaxScaler::from_artifact(
            "target",
            ScalerArtifact {
                data_min: vec![1.0],
                data_max: vec![1.2],
                feature_range: (0.0, 1.0),
                feature_names: Vec::new(),
            },
        )
        .unwrap();
        let model = LstmModel::from_artifact(
            "model",
            uniform_artifact(features, 8, 2, WINDOW_SIZE, 0.0, 0.0, normalized),
        )
        .unwrap();
        ArtifactContext::new(Arc::new(feature_scaler), Arc::new(target_scaler), Arc::new(model))
            .unwrap()
    }
}
