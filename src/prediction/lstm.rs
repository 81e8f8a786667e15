// =============================================================================
// Stacked LSTM — inference-only forward pass
// =============================================================================
//
// Weights use the PyTorch `nn.LSTM` state-dict layout: per layer
// `weight_ih` (4H x I), `weight_hh` (4H x H), `bias_ih` (4H), `bias_hh` (4H),
// gate blocks ordered input, forget, cell, output. A linear head maps the
// last time step's top-layer hidden state to one output.
//
//   i = σ(W_ii x + b_ii + W_hi h + b_hi)
//   f = σ(W_if x + b_if + W_hf h + b_hf)
//   g = tanh(W_ig x + b_ig + W_hg h + b_hg)
//   o = σ(W_io x + b_io + W_ho h + b_ho)
//   c' = f * c + i * g
//   h' = o * tanh(c')
//
// Hidden and cell states start at zero for every window.
// =============================================================================

use std::path::Path;

use ndarray::{s, Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::SequenceModel;
use crate::error::{ForecastError, ForecastResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmLayerWeights {
    pub weight_ih: Vec<Vec<f64>>,
    pub weight_hh: Vec<Vec<f64>>,
    pub bias_ih: Vec<f64>,
    pub bias_hh: Vec<f64>,
}

/// Serialized form of the trained sequence model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmArtifact {
    /// Number of time steps the model was trained on.
    pub sequence_length: usize,
    pub layers: Vec<LstmLayerWeights>,
    pub fc_weight: Vec<Vec<f64>>,
    pub fc_bias: Vec<f64>,
}

#[derive(Debug, Clone)]
struct LstmLayer {
    input_size: usize,
    hidden_size: usize,
    /// 4H x I
    weight_ih: Array2<f64>,
    /// 4H x H
    weight_hh: Array2<f64>,
    /// `bias_ih + bias_hh`, folded once at load time.
    bias: Array1<f64>,
}

impl LstmLayer {
    /// Run the layer over a whole T x I sequence and return the T x H hidden
    /// states.
    fn forward(&self, inputs: ArrayView2<f64>) -> Array2<f64> {
        let hs = self.hidden_size;
        let mut h = Array1::<f64>::zeros(hs);
        let mut c = Array1::<f64>::zeros(hs);
        let mut outputs = Array2::<f64>::zeros((inputs.nrows(), hs));

        for (t, x) in inputs.outer_iter().enumerate() {
            let gates = self.weight_ih.dot(&x) + self.weight_hh.dot(&h) + &self.bias;

            let i = gates.slice(s![..hs]).mapv(sigmoid);
            let f = gates.slice(s![hs..2 * hs]).mapv(sigmoid);
            let g = gates.slice(s![2 * hs..3 * hs]).mapv(f64::tanh);
            let o = gates.slice(s![3 * hs..]).mapv(sigmoid);

            c = &f * &c + &i * &g;
            h = &o * &c.mapv(f64::tanh);
            outputs.row_mut(t).assign(&h);
        }
        outputs
    }
}

/// Stacked LSTM with a single-output linear head.
#[derive(Debug, Clone)]
pub struct LstmModel {
    sequence_length: usize,
    layers: Vec<LstmLayer>,
    fc_weight: Array1<f64>,
    fc_bias: f64,
}

impl LstmModel {
    pub fn from_artifact(name: &str, artifact: LstmArtifact) -> ForecastResult<Self> {
        let fail = |reason: String| ForecastError::artifact(name, reason);

        if artifact.sequence_length == 0 {
            return Err(fail("sequence_length must be positive".into()));
        }
        if artifact.layers.is_empty() {
            return Err(fail("model has no LSTM layers".into()));
        }

        let mut layers = Vec::with_capacity(artifact.layers.len());
        let mut expected_input: Option<usize> = None;
        for (idx, w) in artifact.layers.into_iter().enumerate() {
            let gate_rows = w.weight_hh.len();
            if gate_rows == 0 || gate_rows % 4 != 0 {
                return Err(fail(format!("layer {idx}: weight_hh has {gate_rows} rows")));
            }
            let hidden_size = gate_rows / 4;
            let input_size = w.weight_ih.first().map_or(0, Vec::len);

            if let Some(expected) = expected_input {
                if input_size != expected {
                    return Err(fail(format!(
                        "layer {idx}: input size {input_size}, previous layer emits {expected}"
                    )));
                }
            }
            if input_size == 0
                || w.weight_ih.len() != gate_rows
                || w.bias_ih.len() != gate_rows
                || w.bias_hh.len() != gate_rows
            {
                return Err(fail(format!("layer {idx}: inconsistent weight shapes")));
            }
            let weight_ih = to_matrix(w.weight_ih, input_size)
                .ok_or_else(|| fail(format!("layer {idx}: ragged weight_ih")))?;
            let weight_hh = to_matrix(w.weight_hh, hidden_size)
                .ok_or_else(|| fail(format!("layer {idx}: ragged weight_hh")))?;

            layers.push(LstmLayer {
                input_size,
                hidden_size,
                weight_ih,
                weight_hh,
                bias: Array1::from(w.bias_ih) + Array1::from(w.bias_hh),
            });
            expected_input = Some(hidden_size);
        }

        let top_hidden = expected_input.unwrap_or(0);
        if artifact.fc_weight.len() != 1 || artifact.fc_bias.len() != 1 {
            return Err(fail(format!(
                "linear head must have exactly one output, found {}",
                artifact.fc_weight.len()
            )));
        }
        let fc_weight = Array1::from(artifact.fc_weight.into_iter().next().unwrap_or_default());
        if fc_weight.len() != top_hidden {
            return Err(fail(format!(
                "linear head expects {} inputs, top layer emits {top_hidden}",
                fc_weight.len()
            )));
        }

        Ok(Self {
            sequence_length: artifact.sequence_length,
            layers,
            fc_weight,
            fc_bias: artifact.fc_bias[0],
        })
    }

    /// Read a JSON model artifact from disk.
    pub fn load(path: impl AsRef<Path>) -> ForecastResult<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| ForecastError::artifact(&name, e))?;
        let artifact: LstmArtifact =
            serde_json::from_str(&content).map_err(|e| ForecastError::artifact(&name, e))?;
        Self::from_artifact(&name, artifact)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn hidden_size(&self) -> usize {
        self.layers.last().map_or(0, |l| l.hidden_size)
    }
}

impl SequenceModel for LstmModel {
    fn input_size(&self) -> usize {
        self.layers.first().map_or(0, |l| l.input_size)
    }

    fn sequence_len(&self) -> usize {
        self.sequence_length
    }

    fn infer(&self, window: ArrayView2<f64>) -> ForecastResult<f64> {
        if window.nrows() != self.sequence_length {
            return Err(ForecastError::InvalidWindow {
                reason: format!(
                    "model expects {} time steps, got {}",
                    self.sequence_length,
                    window.nrows()
                ),
            });
        }
        if window.ncols() != self.input_size() {
            return Err(ForecastError::InvalidWindow {
                reason: format!(
                    "model expects {} features per step, got {}",
                    self.input_size(),
                    window.ncols()
                ),
            });
        }

        let mut sequence = window.to_owned();
        for layer in &self.layers {
            sequence = layer.forward(sequence.view());
        }
        let last = sequence.row(sequence.nrows() - 1);

        let out = self.fc_weight.dot(&last) + self.fc_bias;
        if !out.is_finite() {
            return Err(ForecastError::InvalidWindow {
                reason: "model produced a non-finite output".into(),
            });
        }
        Ok(out)
    }
}

/// Row-major nested vectors to a matrix with `cols` columns.
fn to_matrix(rows: Vec<Vec<f64>>, cols: usize) -> Option<Array2<f64>> {
    if rows.iter().any(|r| r.len() != cols) {
        return None;
    }
    let n = rows.len();
    Array2::from_shape_vec((n, cols), rows.into_iter().flatten().collect()).ok()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
