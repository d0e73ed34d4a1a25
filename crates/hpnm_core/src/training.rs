//! Seeded trainer for the reference MLP
//!
//! Mini-batch Adam on mean squared error. Used to produce a "clean" model to
//! lock; the commitment scheme itself never depends on how weights were
//! obtained.

use crate::canary::linspace;
use crate::errors::{HpnmError, Result};
use crate::model::Mlp;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Supervised samples; `inputs[i]` maps to `targets[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub inputs: Vec<Vec<f32>>,
    pub targets: Vec<Vec<f32>>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// `y = 2x + 1 + 0.05·noise` on `n` evenly spaced points in `[-1, 1]`.
pub fn make_regression_data(n: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let xs = linspace(-1.0, 1.0, n);
    let targets = xs
        .iter()
        .map(|&x| {
            let noise: f32 = StandardNormal.sample(&mut rng);
            vec![2.0 * x + 1.0 + 0.05 * noise]
        })
        .collect();
    Dataset {
        inputs: xs.into_iter().map(|x| vec![x]).collect(),
        targets,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    pub epochs: usize,
    pub learning_rate: f32,
    pub batch_size: usize,
    pub seed: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 500,
            learning_rate: 1e-2,
            batch_size: 16,
            seed: 0,
        }
    }
}

struct AdamState {
    m: Vec<f32>,
    v: Vec<f32>,
}

impl AdamState {
    fn new(len: usize) -> Self {
        Self {
            m: vec![0.0; len],
            v: vec![0.0; len],
        }
    }

    fn step(&mut self, params: &mut [f32], grads: &[f32], lr: f32, t: i32) {
        const BETA1: f32 = 0.9;
        const BETA2: f32 = 0.999;
        const EPS: f32 = 1e-8;
        let c1 = 1.0 - BETA1.powi(t);
        let c2 = 1.0 - BETA2.powi(t);
        for i in 0..params.len() {
            let g = grads[i];
            self.m[i] = BETA1 * self.m[i] + (1.0 - BETA1) * g;
            self.v[i] = BETA2 * self.v[i] + (1.0 - BETA2) * g * g;
            let m_hat = self.m[i] / c1;
            let v_hat = self.v[i] / c2;
            params[i] -= lr * m_hat / (v_hat.sqrt() + EPS);
        }
    }
}

/// Mean squared error of `model` over `data`.
pub fn mse(model: &Mlp, data: &Dataset) -> f32 {
    let (sum, count) = data
        .inputs
        .iter()
        .zip(&data.targets)
        .flat_map(|(x, y)| {
            let out = model.forward(x);
            out.into_iter()
                .zip(y.clone())
                .map(|(o, t)| (o - t) * (o - t))
                .collect::<Vec<_>>()
        })
        .fold((0.0f32, 0usize), |(s, n), e| (s + e, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Train in place and return the final full-dataset MSE.
pub fn train(model: &mut Mlp, data: &Dataset, params: &TrainingParams) -> Result<f32> {
    if data.is_empty() || data.inputs.len() != data.targets.len() {
        return Err(HpnmError::config("training data is empty or misaligned"));
    }
    if params.batch_size == 0 || !(params.learning_rate > 0.0) {
        return Err(HpnmError::config(
            "batch size and learning rate must be positive",
        ));
    }
    let in_width = model.input_width();
    let out_width = model.output_width();
    if data.inputs.iter().any(|x| x.len() != in_width)
        || data.targets.iter().any(|y| y.len() != out_width)
    {
        return Err(HpnmError::config("training data width does not match model"));
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut weight_opt: Vec<AdamState> = model
        .layers()
        .iter()
        .map(|l| AdamState::new(l.weight.len()))
        .collect();
    let mut bias_opt: Vec<AdamState> = model
        .layers()
        .iter()
        .map(|l| AdamState::new(l.bias.len()))
        .collect();

    let mut order: Vec<usize> = (0..data.len()).collect();
    let mut t = 0i32;
    for epoch in 0..params.epochs {
        order.shuffle(&mut rng);
        for batch in order.chunks(params.batch_size) {
            let (w_grads, b_grads) = batch_gradients(model, data, batch);
            t = t.saturating_add(1);
            for (i, layer) in model.layers_mut().iter_mut().enumerate() {
                weight_opt[i].step(layer.weight.as_mut_slice(), &w_grads[i], params.learning_rate, t);
                bias_opt[i].step(layer.bias.as_mut_slice(), &b_grads[i], params.learning_rate, t);
            }
        }
        if epoch % 100 == 0 {
            debug!(epoch, loss = mse(model, data), "Training progress");
        }
    }

    let loss = mse(model, data);
    info!(epochs = params.epochs, loss, "Training finished");
    Ok(loss)
}

/// Backpropagate MSE (mean over batch and outputs) for one mini-batch.
fn batch_gradients(model: &Mlp, data: &Dataset, batch: &[usize]) -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
    let layers = model.layers();
    let depth = layers.len();
    let mut w_grads: Vec<Vec<f32>> = layers.iter().map(|l| vec![0.0; l.weight.len()]).collect();
    let mut b_grads: Vec<Vec<f32>> = layers.iter().map(|l| vec![0.0; l.bias.len()]).collect();
    let scale = 2.0 / (batch.len() * model.output_width()) as f32;

    for &idx in batch {
        // activations[0] is the input; pre[l] is layer l's affine output
        let mut activations = vec![data.inputs[idx].clone()];
        let mut pre = Vec::with_capacity(depth);
        for (l, layer) in layers.iter().enumerate() {
            let z = layer.affine(&activations[l]);
            let a = if l + 1 == depth {
                z.clone()
            } else {
                z.iter().map(|v| v.max(0.0)).collect()
            };
            pre.push(z);
            activations.push(a);
        }

        let mut delta: Vec<f32> = activations[depth]
            .iter()
            .zip(&data.targets[idx])
            .map(|(o, t)| scale * (o - t))
            .collect();

        for l in (0..depth).rev() {
            let cols = layers[l].in_features();
            let input = &activations[l];
            for (r, d) in delta.iter().enumerate() {
                b_grads[l][r] += d;
                for c in 0..cols {
                    w_grads[l][r * cols + c] += d * input[c];
                }
            }
            if l > 0 {
                let w = layers[l].weight.as_slice();
                delta = (0..cols)
                    .map(|c| {
                        let back: f32 = delta
                            .iter()
                            .enumerate()
                            .map(|(r, d)| w[r * cols + c] * d)
                            .sum();
                        if pre[l - 1][c] > 0.0 {
                            back
                        } else {
                            0.0
                        }
                    })
                    .collect();
            }
        }
    }
    (w_grads, b_grads)
}
