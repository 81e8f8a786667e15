// =============================================================================
// Min-max scaler — fitted offline, applied read-only at inference time
// =============================================================================
//
// Mirrors the behaviour of a fitted scikit-learn `MinMaxScaler`:
//
//   scale = (range_max - range_min) / (data_max - data_min)
//   min   = range_min - data_min * scale
//   x'    = x * scale + min
//   x     = (x' - min) / scale
//
// A column whose training range was zero gets a scale of 1 so constant
// columns pass through shifted rather than producing infinities. `scale` and
// `min` are broadcast across every row of a W x F window.
// =============================================================================

use std::path::Path;

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::{FeatureTransform, TargetTransform};
use crate::error::{ForecastError, ForecastResult};

fn default_feature_range() -> (f64, f64) {
    (0.0, 1.0)
}

/// Serialized form of a fitted scaler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub data_min: Vec<f64>,
    pub data_max: Vec<f64>,
    #[serde(default = "default_feature_range")]
    pub feature_range: (f64, f64),
    /// Column names the scaler was fitted on, when recorded.
    #[serde(default)]
    pub feature_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MinMaxScaler {
    scale: Array1<f64>,
    min: Array1<f64>,
    feature_names: Vec<String>,
}

impl MinMaxScaler {
    pub fn from_artifact(name: &str, artifact: ScalerArtifact) -> ForecastResult<Self> {
        let width = artifact.data_min.len();
        if width == 0 || artifact.data_max.len() != width {
            return Err(ForecastError::artifact(
                name,
                format!(
                    "data_min has {} columns, data_max has {}",
                    width,
                    artifact.data_max.len()
                ),
            ));
        }
        if !artifact.feature_names.is_empty() && artifact.feature_names.len() != width {
            return Err(ForecastError::artifact(
                name,
                format!(
                    "{} feature names for {} columns",
                    artifact.feature_names.len(),
                    width
                ),
            ));
        }

        let (lo, hi) = artifact.feature_range;
        if !(lo.is_finite() && hi.is_finite() && hi > lo) {
            return Err(ForecastError::artifact(
                name,
                format!("invalid feature_range ({lo}, {hi})"),
            ));
        }

        let mut scale = Vec::with_capacity(width);
        let mut min = Vec::with_capacity(width);
        for (&dmin, &dmax) in artifact.data_min.iter().zip(artifact.data_max.iter()) {
            if !(dmin.is_finite() && dmax.is_finite()) || dmax < dmin {
                return Err(ForecastError::artifact(
                    name,
                    format!("invalid column range [{dmin}, {dmax}]"),
                ));
            }
            let range = dmax - dmin;
            let s = if range == 0.0 { 1.0 } else { (hi - lo) / range };
            scale.push(s);
            min.push(lo - dmin * s);
        }

        Ok(Self {
            scale: Array1::from(scale),
            min: Array1::from(min),
            feature_names: artifact.feature_names,
        })
    }

    /// Read a JSON scaler artifact from disk.
    pub fn load(path: impl AsRef<Path>) -> ForecastResult<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| ForecastError::artifact(&name, e))?;
        let artifact: ScalerArtifact =
            serde_json::from_str(&content).map_err(|e| ForecastError::artifact(&name, e))?;
        Self::from_artifact(&name, artifact)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }
}

impl FeatureTransform for MinMaxScaler {
    fn width(&self) -> usize {
        self.scale.len()
    }

    fn apply(&self, raw: ArrayView2<f64>) -> ForecastResult<Array2<f64>> {
        if raw.ncols() != self.scale.len() {
            return Err(ForecastError::InvalidWindow {
                reason: format!(
                    "rows have {} features, scaler expects {}",
                    raw.ncols(),
                    self.scale.len()
                ),
            });
        }
        Ok(&raw * &self.scale + &self.min)
    }
}

impl TargetTransform for MinMaxScaler {
    /// Inverts the first column; target scalers are fitted on one column.
    fn invert(&self, normalized: f64) -> f64 {
        (normalized - self.min[0]) / self.scale[0]
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn artifact(min: Vec<f64>, max: Vec<f64>) -> ScalerArtifact {
        ScalerArtifact {
            data_min: min,
            data_max: max,
            feature_range: (0.0, 1.0),
            feature_names: Vec::new(),
        }
    }

    #[test]
    fn transform_maps_training_range_to_unit_interval() {
        let s = MinMaxScaler::from_artifact("t", artifact(vec![1.0, 10.0], vec![2.0, 30.0])).unwrap();
        let out = s.apply(array![[1.5, 30.0], [1.0, 20.0]].view()).unwrap();
        assert!((out[[0, 0]] - 0.5).abs() < 1e-12);
        assert!((out[[0, 1]] - 1.0).abs() < 1e-12);
        assert!(out[[1, 0]].abs() < 1e-12);
        assert!((out[[1, 1]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn zero_range_column_uses_unit_scale() {
        let s = MinMaxScaler::from_artifact("t", artifact(vec![0.0], vec![0.0])).unwrap();
        assert_eq!(s.apply(array![[0.0], [2.0]].view()).unwrap(), array![[0.0], [2.0]]);
    }

    #[test]
    fn invert_recovers_price() {
        let s = MinMaxScaler::from_artifact("t", artifact(vec![1.0], vec![1.2])).unwrap();
        let n = s.apply(array![[1.13]].view()).unwrap()[[0, 0]];
        assert!((s.invert(n) - 1.13).abs() < 1e-12);
        assert!((s.invert(0.5) - 1.1).abs() < 1e-12);
    }

    #[test]
    fn custom_feature_range() {
        let mut a = artifact(vec![0.0], vec![10.0]);
        a.feature_range = (-1.0, 1.0);
        let s = MinMaxScaler::from_artifact("t", a).unwrap();
        assert!(s.apply(array![[5.0]].view()).unwrap()[[0, 0]].abs() < 1e-12);
    }

    #[test]
    fn mismatched_shapes_fail_to_load() {
        let err = MinMaxScaler::from_artifact("t", artifact(vec![0.0, 1.0], vec![1.0])).unwrap_err();
        assert_eq!(err.kind(), "ArtifactLoadFailure");
    }

    #[test]
    fn wrong_row_width_is_rejected() {
        let s = MinMaxScaler::from_artifact("t", artifact(vec![0.0], vec![1.0])).unwrap();
        let err = s.apply(array![[0.1, 0.2]].view()).unwrap_err();
        assert_eq!(err.kind(), "InvalidWindow");
    }

    #[test]
    fn missing_file_is_artifact_failure() {
        let err = MinMaxScaler::load("/definitely/not/here.json").unwrap_err();
        assert_eq!(err.kind(), "ArtifactLoadFailure");
    }
}
