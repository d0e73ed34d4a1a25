//! Model collaborator contract and the reference MLP
//!
//! The commitment scheme only ever sees a model through the traits in this
//! module:
//! - [`ParameterView`]: ordered linear weight matrices with scalar reads
//! - [`Inference`]: pure batch forward pass used by the canary suite
//! - [`ParameterViewMut`]: mutable parameter access for the attack battery
//!
//! [`Mlp`] is a small dense network implementing all three, used by the CLI
//! and the test suites.

use crate::errors::{HpnmError, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// One scalar parameter inside a named weight matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coordinate {
    pub layer: String,
    pub row: usize,
    pub col: usize,
}

impl Coordinate {
    pub fn new(layer: impl Into<String>, row: usize, col: usize) -> Self {
        Self {
            layer: layer.into(),
            row,
            col,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}, {}]", self.layer, self.row, self.col)
    }
}

/// Row-major `f32` matrix. Vectors are stored as `n × 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TensorRepr", into = "TensorRepr")]
pub struct Tensor {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TensorRepr {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl TryFrom<TensorRepr> for Tensor {
    type Error = String;

    fn try_from(repr: TensorRepr) -> std::result::Result<Self, Self::Error> {
        Tensor::from_vec(repr.rows, repr.cols, repr.data).map_err(|e| e.to_string())
    }
}

impl From<Tensor> for TensorRepr {
    fn from(t: Tensor) -> Self {
        TensorRepr {
            rows: t.rows,
            cols: t.cols,
            data: t.data,
        }
    }
}

impl Tensor {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// A 1-D parameter of `len` entries (column index is always 0).
    pub fn vector(len: usize) -> Self {
        Self::zeros(len, 1)
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(HpnmError::config(format!(
                "tensor data has {} entries, shape {}x{} needs {}",
                data.len(),
                rows,
                cols,
                rows * cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, row: usize, col: usize) -> Option<&mut f32> {
        if row < self.rows && col < self.cols {
            Some(&mut self.data[row * self.cols + col])
        } else {
            None
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

/// Read access to a model's linear weights.
pub trait ParameterView {
    /// Every linear layer's weight matrix in discovery order. The last entry
    /// is the output layer.
    fn linear_weights(&self) -> Vec<(&str, &Tensor)>;

    fn weight(&self, layer: &str) -> Option<&Tensor> {
        self.linear_weights()
            .into_iter()
            .find(|(name, _)| *name == layer)
            .map(|(_, w)| w)
    }

    /// Read one scalar, failing if the coordinate is outside the live model.
    fn scalar(&self, layer: &str, row: usize, col: usize) -> Result<f32> {
        self.weight(layer)
            .and_then(|w| w.get(row, col))
            .ok_or_else(|| HpnmError::InvalidCoordinate {
                layer: layer.to_string(),
                row,
                col,
            })
    }
}

/// Pure batch inference. Implementations must not mutate model state.
pub trait Inference {
    fn infer(&self, batch: &[Vec<f32>]) -> Result<Vec<Vec<f32>>>;
}

/// Which tensor of a layer a mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Weight,
    Bias,
}

/// Addresses one parameter tensor (weight or bias) of a named layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamSlot {
    pub layer: String,
    pub kind: ParamKind,
}

/// Mutable parameter access, used by adversarial tooling only.
pub trait ParameterViewMut: ParameterView {
    /// Every trainable tensor, weights and biases alike.
    fn parameter_slots(&self) -> Vec<ParamSlot>;

    fn parameter_mut(&mut self, slot: &ParamSlot) -> Option<&mut Tensor>;

    fn parameter(&self, slot: &ParamSlot) -> Option<&Tensor>;
}

/// Fully connected layer; `weight` is `out × in`, `bias` is `out × 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DenseLayer {
    pub name: String,
    pub weight: Tensor,
    pub bias: Tensor,
}

impl DenseLayer {
    pub fn in_features(&self) -> usize {
        self.weight.shape().1
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape().0
    }

    /// `W·x + b` for a single sample.
    pub fn affine(&self, x: &[f32]) -> Vec<f32> {
        let (rows, cols) = self.weight.shape();
        let w = self.weight.as_slice();
        let b = self.bias.as_slice();
        (0..rows)
            .map(|r| {
                let row = &w[r * cols..(r + 1) * cols];
                row.iter().zip(x).fold(b[r], |acc, (wi, xi)| acc + wi * xi)
            })
            .collect()
    }
}

/// Dense network with ReLU between layers and a linear output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MlpRepr", into = "MlpRepr")]
pub struct Mlp {
    layers: Vec<DenseLayer>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct MlpRepr {
    layers: Vec<DenseLayer>,
}

impl TryFrom<MlpRepr> for Mlp {
    type Error = String;

    fn try_from(repr: MlpRepr) -> std::result::Result<Self, Self::Error> {
        Mlp::from_layers(repr.layers).map_err(|e| e.to_string())
    }
}

impl From<Mlp> for MlpRepr {
    fn from(m: Mlp) -> Self {
        MlpRepr { layers: m.layers }
    }
}

impl Mlp {
    /// Build a network for `widths = [in, hidden.., out]` with layers named
    /// `fc1, fc2, …` and weights drawn uniformly from `±1/sqrt(fan_in)`.
    pub fn new(widths: &[usize], seed: u64) -> Result<Self> {
        if widths.len() < 2 || widths.iter().any(|&w| w == 0) {
            return Err(HpnmError::config(format!(
                "invalid layer widths {:?}: need at least two non-zero widths",
                widths
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let layers = widths
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                let (fan_in, fan_out) = (pair[0], pair[1]);
                let bound = 1.0 / (fan_in as f32).sqrt();
                let mut weight = Tensor::zeros(fan_out, fan_in);
                let mut bias = Tensor::vector(fan_out);
                for v in weight.as_mut_slice() {
                    *v = rng.gen_range(-bound..bound);
                }
                for v in bias.as_mut_slice() {
                    *v = rng.gen_range(-bound..bound);
                }
                DenseLayer {
                    name: format!("fc{}", i + 1),
                    weight,
                    bias,
                }
            })
            .collect();
        Ok(Self { layers })
    }

    /// Assemble a network from explicit layers, checking that shapes chain.
    pub fn from_layers(layers: Vec<DenseLayer>) -> Result<Self> {
        if layers.is_empty() {
            return Err(HpnmError::config("network needs at least one layer"));
        }
        for (i, layer) in layers.iter().enumerate() {
            if layer.bias.shape() != (layer.out_features(), 1) {
                return Err(HpnmError::config(format!(
                    "layer {} bias shape {:?} does not match {} outputs",
                    layer.name,
                    layer.bias.shape(),
                    layer.out_features()
                )));
            }
            if i > 0 && layers[i - 1].out_features() != layer.in_features() {
                return Err(HpnmError::config(format!(
                    "layer {} expects {} inputs but {} produces {}",
                    layer.name,
                    layer.in_features(),
                    layers[i - 1].name,
                    layers[i - 1].out_features()
                )));
            }
            if layers[..i].iter().any(|prev| prev.name == layer.name) {
                return Err(HpnmError::config(format!(
                    "duplicate layer name {}",
                    layer.name
                )));
            }
        }
        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [DenseLayer] {
        &mut self.layers
    }

    pub fn input_width(&self) -> usize {
        self.layers[0].in_features()
    }

    pub fn output_width(&self) -> usize {
        self.layers[self.layers.len() - 1].out_features()
    }

    /// Forward pass for one sample.
    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        let last = self.layers.len() - 1;
        self.layers
            .iter()
            .enumerate()
            .fold(x.to_vec(), |a, (i, layer)| {
                let z = layer.affine(&a);
                if i == last {
                    z
                } else {
                    z.into_iter().map(|v| v.max(0.0)).collect()
                }
            })
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HpnmError::MissingArtifact {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| HpnmError::malformed("model.json", e.to_string()))
    }
}

impl ParameterView for Mlp {
    fn linear_weights(&self) -> Vec<(&str, &Tensor)> {
        self.layers
            .iter()
            .map(|l| (l.name.as_str(), &l.weight))
            .collect()
    }

    fn weight(&self, layer: &str) -> Option<&Tensor> {
        self.layers.iter().find(|l| l.name == layer).map(|l| &l.weight)
    }
}

impl Inference for Mlp {
    fn infer(&self, batch: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        let width = self.input_width();
        batch
            .iter()
            .map(|x| {
                if x.len() != width {
                    return Err(HpnmError::config(format!(
                        "input has {} features, model expects {}",
                        x.len(),
                        width
                    )));
                }
                Ok(self.forward(x))
            })
            .collect()
    }
}

impl ParameterViewMut for Mlp {
    fn parameter_slots(&self) -> Vec<ParamSlot> {
        self.layers
            .iter()
            .flat_map(|l| {
                [ParamKind::Weight, ParamKind::Bias].map(|kind| ParamSlot {
                    layer: l.name.clone(),
                    kind,
                })
            })
            .collect()
    }

    fn parameter_mut(&mut self, slot: &ParamSlot) -> Option<&mut Tensor> {
        let layer = self.layers.iter_mut().find(|l| l.name == slot.layer)?;
        Some(match slot.kind {
            ParamKind::Weight => &mut layer.weight,
            ParamKind::Bias => &mut layer.bias,
        })
    }

    fn parameter(&self, slot: &ParamSlot) -> Option<&Tensor> {
        let layer = self.layers.iter().find(|l| l.name == slot.layer)?;
        Some(match slot.kind {
            ParamKind::Weight => &layer.weight,
            ParamKind::Bias => &layer.bias,
        })
    }
}
