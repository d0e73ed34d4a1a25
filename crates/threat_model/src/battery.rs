//! Named attacks and their dispatcher

use crate::attacks::{adaptive, at_rest, low_rank, rank1, sparse_random, targeted_layer};
use crate::report::AttackReport;
use crate::{AttackError, Result};
use hpnm_core::{CanarySuite, Inference, ParameterViewMut};
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Attacks selectable by name from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AttackKind {
    #[default]
    None,
    /// A few `+0.01` weight edits per layer
    AtRest,
    /// The at-rest edit applied to a model already loaded in memory
    Runtime,
    /// Rank-1 update of every weight matrix
    LowRank,
    /// Sparse random perturbation over weights and biases
    RandomSmall,
    /// Bulk edits confined to the input layer, away from the core master
    UnmonitoredBulk,
    /// Canary-aware single-scalar search
    Adaptive,
    /// Sparse, rank-1, bulk and adaptive in sequence
    FullSuite,
}

impl AttackKind {
    pub const ALL: [AttackKind; 8] = [
        AttackKind::None,
        AttackKind::AtRest,
        AttackKind::Runtime,
        AttackKind::LowRank,
        AttackKind::RandomSmall,
        AttackKind::UnmonitoredBulk,
        AttackKind::Adaptive,
        AttackKind::FullSuite,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AttackKind::None => "none",
            AttackKind::AtRest => "at-rest",
            AttackKind::Runtime => "runtime",
            AttackKind::LowRank => "low-rank",
            AttackKind::RandomSmall => "random-small",
            AttackKind::UnmonitoredBulk => "unmonitored-bulk",
            AttackKind::Adaptive => "adaptive",
            AttackKind::FullSuite => "full-suite",
        }
    }
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AttackKind {
    type Err = AttackError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.replace('_', "-");
        AttackKind::ALL
            .into_iter()
            .find(|k| k.name() == wanted)
            .ok_or_else(|| AttackError::UnknownAttack(s.to_string()))
    }
}

/// Knobs shared by the named attacks.
#[derive(Debug, Clone, PartialEq)]
pub struct AttackOptions {
    /// Scalar budget for sparse and bulk attacks
    pub m: usize,
    /// Magnitude for rank-1 and sparse perturbations
    pub scale: f32,
    /// Adaptive search attempts
    pub attempts: usize,
    /// Adaptive step size
    pub step: f32,
}

impl Default for AttackOptions {
    fn default() -> Self {
        Self {
            m: 20,
            scale: 0.01,
            attempts: 5000,
            step: 0.01,
        }
    }
}

fn first_and_last_layer<M: ParameterViewMut + ?Sized>(model: &M) -> Result<(String, String)> {
    let layers = model.linear_weights();
    match (layers.first(), layers.last()) {
        (Some((first, _)), Some((last, _))) => Ok((first.to_string(), last.to_string())),
        _ => Err(AttackError::NoParameters),
    }
}

/// Apply `kind` to `model`. The canary suite is only consulted by the
/// adaptive search.
pub fn run_attack<M, R>(
    kind: AttackKind,
    model: &mut M,
    rng: &mut R,
    options: &AttackOptions,
    canaries: &CanarySuite,
) -> Result<AttackReport>
where
    M: ParameterViewMut + Inference + ?Sized,
    R: Rng + ?Sized,
{
    let (input_layer, output_layer) = first_and_last_layer(&*model)?;
    let report = match kind {
        AttackKind::None => AttackReport::default(),
        AttackKind::AtRest | AttackKind::Runtime => at_rest(model, rng, options.m)?,
        AttackKind::LowRank => low_rank(model, rng, options.scale)?,
        AttackKind::RandomSmall => sparse_random(model, rng, options.m, options.scale)?,
        AttackKind::UnmonitoredBulk => {
            targeted_layer(model, rng, &input_layer, (options.m / 2).max(1), 0.02)?
        }
        AttackKind::Adaptive => adaptive(model, rng, canaries, options.attempts, options.step)?,
        AttackKind::FullSuite => {
            let mut report = sparse_random(model, rng, options.m, options.scale)?;
            report.extend(rank1(model, rng, &output_layer, options.scale)?);
            report.extend(targeted_layer(
                model,
                rng,
                &input_layer,
                (options.m / 2).max(1),
                0.02,
            )?);
            report.extend(adaptive(model, rng, canaries, options.attempts, options.step)?);
            report
        }
    };
    if kind != AttackKind::None {
        info!(attack = %kind, changed = report.len(), "Applied attack");
    }
    Ok(report)
}
