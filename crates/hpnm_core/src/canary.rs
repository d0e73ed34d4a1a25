//! Behavioral canaries
//!
//! Fixed inputs with expected outputs and an absolute tolerance. Catches
//! drift that never touches a sampled coordinate.

use crate::errors::{HpnmError, Result};
use crate::model::Inference;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

fn default_atol() -> f64 {
    1e-3
}

/// Outcome of one canary evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanaryReport {
    pub passed: bool,
    pub max_abs_error: f64,
}

/// Input/expected-output pairs with an absolute error tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CanaryRepr", into = "CanaryRepr")]
pub struct CanarySuite {
    inputs: Vec<Vec<f32>>,
    expected: Vec<Vec<f32>>,
    atol: f64,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CanaryRepr {
    inputs: Vec<Vec<f32>>,
    expected: Vec<Vec<f32>>,
    #[serde(default = "default_atol")]
    atol: f64,
}

impl TryFrom<CanaryRepr> for CanarySuite {
    type Error = HpnmError;

    fn try_from(r: CanaryRepr) -> Result<Self> {
        CanarySuite::new(r.inputs, r.expected, r.atol)
    }
}

impl From<CanarySuite> for CanaryRepr {
    fn from(s: CanarySuite) -> Self {
        CanaryRepr {
            inputs: s.inputs,
            expected: s.expected,
            atol: s.atol,
        }
    }
}

impl CanarySuite {
    pub fn new(inputs: Vec<Vec<f32>>, expected: Vec<Vec<f32>>, atol: f64) -> Result<Self> {
        if inputs.is_empty() {
            return Err(HpnmError::config("canary suite needs at least one input"));
        }
        if inputs.len() != expected.len() {
            return Err(HpnmError::config(format!(
                "{} canary inputs but {} expected outputs",
                inputs.len(),
                expected.len()
            )));
        }
        if !atol.is_finite() || atol < 0.0 {
            return Err(HpnmError::config(format!(
                "canary tolerance must be a non-negative number, got {}",
                atol
            )));
        }
        Ok(Self {
            inputs,
            expected,
            atol,
        })
    }

    /// Suite for the analytic relation `y = 2x + 1` on `n` evenly spaced
    /// points in `[low, high]`, tolerance `5e-2`.
    pub fn make_reference_suite(n: usize, low: f32, high: f32) -> Result<Self> {
        let xs = linspace(low, high, n);
        let inputs: Vec<Vec<f32>> = xs.iter().map(|&x| vec![x]).collect();
        let expected = xs.iter().map(|&x| vec![2.0 * x + 1.0]).collect();
        Self::new(inputs, expected, 5e-2)
    }

    /// Suite whose expectations are a clean model's own outputs.
    pub fn capture<M: Inference + ?Sized>(
        model: &M,
        inputs: Vec<Vec<f32>>,
        atol: f64,
    ) -> Result<Self> {
        let expected = model.infer(&inputs)?;
        Self::new(inputs, expected, atol)
    }

    /// Same canaries under a different tolerance.
    pub fn with_atol(self, atol: f64) -> Result<Self> {
        Self::new(self.inputs, self.expected, atol)
    }

    pub fn inputs(&self) -> &[Vec<f32>] {
        &self.inputs
    }

    pub fn expected(&self) -> &[Vec<f32>] {
        &self.expected
    }

    pub fn atol(&self) -> f64 {
        self.atol
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Run every canary and report the largest elementwise absolute error.
    pub fn evaluate<M: Inference + ?Sized>(&self, model: &M) -> Result<CanaryReport> {
        let outputs = model.infer(&self.inputs)?;
        let mut max_abs_error = 0.0f64;
        for (i, (out, exp)) in outputs.iter().zip(&self.expected).enumerate() {
            if out.len() != exp.len() {
                return Err(HpnmError::config(format!(
                    "canary {} produced {} outputs, expected {}",
                    i,
                    out.len(),
                    exp.len()
                )));
            }
            for (o, e) in out.iter().zip(exp) {
                let err = (f64::from(*o) - f64::from(*e)).abs();
                // NaN outputs must fail the suite
                if err.is_nan() {
                    max_abs_error = f64::INFINITY;
                } else {
                    max_abs_error = max_abs_error.max(err);
                }
            }
        }
        let passed = max_abs_error <= self.atol;
        if passed {
            debug!(max_abs_error, atol = self.atol, "Canaries passed");
        } else {
            warn!(max_abs_error, atol = self.atol, "Canaries exceeded tolerance");
        }
        Ok(CanaryReport {
            passed,
            max_abs_error,
        })
    }
}

/// `n` evenly spaced values from `low` to `high` inclusive.
pub fn linspace(low: f32, high: f32, n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![low],
        _ => {
            let step = (high - low) / (n - 1) as f32;
            (0..n)
                .map(|i| if i == n - 1 { high } else { low + step * i as f32 })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DenseLayer, Mlp, Tensor};

    /// Computes exactly `2x + 1` on `[-1, 1]`.
    fn exact_net() -> Mlp {
        Mlp::from_layers(vec![
            DenseLayer {
                name: "fc1".into(),
                weight: Tensor::from_vec(1, 1, vec![1.0]).unwrap(),
                bias: Tensor::from_vec(1, 1, vec![1.0]).unwrap(),
            },
            DenseLayer {
                name: "fc2".into(),
                weight: Tensor::from_vec(1, 1, vec![2.0]).unwrap(),
                bias: Tensor::from_vec(1, 1, vec![-1.0]).unwrap(),
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_reference_suite_shape() {
        let suite = CanarySuite::make_reference_suite(16, -1.0, 1.0).unwrap();
        assert_eq!(suite.len(), 16);
        assert_eq!(suite.inputs()[0], vec![-1.0]);
        assert_eq!(suite.inputs()[15], vec![1.0]);
        assert_eq!(suite.expected()[15], vec![3.0]);
        assert_eq!(suite.atol(), 5e-2);
    }

    #[test]
    fn test_exact_model_passes_reference_suite() {
        let suite = CanarySuite::make_reference_suite(16, -1.0, 1.0).unwrap();
        let report = suite.evaluate(&exact_net()).unwrap();
        assert!(report.passed);
        assert!(report.max_abs_error < 1e-5);
    }

    #[test]
    fn test_drift_beyond_tolerance_fails() {
        let suite = CanarySuite::make_reference_suite(16, -1.0, 1.0).unwrap();
        let mut net = exact_net();
        *net.layers_mut()[1].bias.get_mut(0, 0).unwrap() += 0.1;
        let report = suite.evaluate(&net).unwrap();
        assert!(!report.passed);
        assert!((report.max_abs_error - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_drift_within_tolerance_passes() {
        let suite = CanarySuite::make_reference_suite(16, -1.0, 1.0).unwrap();
        let mut net = exact_net();
        *net.layers_mut()[1].bias.get_mut(0, 0).unwrap() += 0.01;
        assert!(suite.evaluate(&net).unwrap().passed);
    }

    #[test]
    fn test_captured_suite_has_zero_error() {
        let net = Mlp::new(&[1, 10, 1], 4).unwrap();
        let inputs = linspace(-1.0, 1.0, 8).into_iter().map(|x| vec![x]).collect();
        let suite = CanarySuite::capture(&net, inputs, 0.0).unwrap();
        let report = suite.evaluate(&net).unwrap();
        assert!(report.passed);
        assert_eq!(report.max_abs_error, 0.0);
    }

    #[test]
    fn test_with_atol_keeps_canaries() {
        let suite = CanarySuite::make_reference_suite(4, -1.0, 1.0).unwrap();
        let loose = suite.clone().with_atol(0.5).unwrap();
        assert_eq!(loose.inputs(), suite.inputs());
        assert_eq!(loose.atol(), 0.5);
        assert!(suite.with_atol(-0.1).is_err());
    }

    #[test]
    fn test_invalid_suites_rejected() {
        assert!(CanarySuite::new(vec![], vec![], 0.1).is_err());
        assert!(CanarySuite::new(vec![vec![1.0]], vec![], 0.1).is_err());
        assert!(CanarySuite::new(vec![vec![1.0]], vec![vec![1.0]], -1.0).is_err());
        assert!(CanarySuite::new(vec![vec![1.0]], vec![vec![1.0]], f64::NAN).is_err());
    }

    #[test]
    fn test_output_width_mismatch_is_error() {
        let suite = CanarySuite::new(vec![vec![0.0]], vec![vec![1.0, 2.0]], 0.1).unwrap();
        assert!(suite.evaluate(&exact_net()).is_err());
    }

    #[test]
    fn test_json_defaults_and_schema() {
        let suite: CanarySuite =
            serde_json::from_str(r#"{"inputs":[[0.0]],"expected":[[1.0]]}"#).unwrap();
        assert_eq!(suite.atol(), 1e-3);
        assert!(serde_json::from_str::<CanarySuite>(
            r#"{"inputs":[[0.0]],"expected":[[1.0]],"atol":0.1,"extra":true}"#
        )
        .is_err());
        assert!(serde_json::from_str::<CanarySuite>(r#"{"inputs":[[0.0]],"expected":[]}"#).is_err());
    }

    #[test]
    fn test_linspace_endpoints() {
        assert_eq!(linspace(-1.0, 1.0, 3), vec![-1.0, 0.0, 1.0]);
        assert_eq!(linspace(0.0, 1.0, 1), vec![0.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }
}
