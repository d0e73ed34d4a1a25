//! Mutation strategies
//!
//! Every attack draws from the caller's RNG, so a seeded `StdRng` replays
//! the same mutation. Only scalar changes that actually altered a value are
//! recorded.

use crate::report::{AttackReport, Perturbation};
use crate::{AttackError, Result};
use hpnm_core::{CanarySuite, Inference, ParamKind, ParamSlot, ParameterViewMut};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use tracing::{debug, info};

fn normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    StandardNormal.sample(rng)
}

/// Add `delta` to one scalar. Returns the perturbation if the stored value
/// changed.
fn nudge<M: ParameterViewMut + ?Sized>(
    model: &mut M,
    slot: &ParamSlot,
    row: usize,
    col: usize,
    delta: f32,
) -> Option<Perturbation> {
    let cell = model.parameter_mut(slot)?.get_mut(row, col)?;
    let before = *cell;
    *cell += delta;
    if *cell == before {
        return None;
    }
    Some(Perturbation {
        slot: slot.clone(),
        row,
        col,
        delta: *cell - before,
    })
}

fn weight_slot(layer: &str) -> ParamSlot {
    ParamSlot {
        layer: layer.to_string(),
        kind: ParamKind::Weight,
    }
}

fn layer_names<M: ParameterViewMut + ?Sized>(model: &M) -> Vec<String> {
    model
        .linear_weights()
        .into_iter()
        .map(|(name, _)| name.to_string())
        .collect()
}

fn weight_shape<M: ParameterViewMut + ?Sized>(model: &M, layer: &str) -> Result<(usize, usize)> {
    model
        .weight(layer)
        .map(|w| w.shape())
        .ok_or_else(|| AttackError::UnknownLayer(layer.to_string()))
}

/// Pick a uniformly random slot and a uniformly random index inside it.
fn random_site<M, R>(model: &M, slots: &[ParamSlot], rng: &mut R) -> Option<(ParamSlot, usize, usize)>
where
    M: ParameterViewMut + ?Sized,
    R: Rng + ?Sized,
{
    let slot = &slots[rng.gen_range(0..slots.len())];
    let (rows, cols) = model.parameter(slot)?.shape();
    if rows == 0 || cols == 0 {
        return None;
    }
    Some((slot.clone(), rng.gen_range(0..rows), rng.gen_range(0..cols)))
}

/// Sparse uniform perturbation: `count` scalars drawn across every weight
/// and bias, each shifted by `scale·N(0, 1)`.
pub fn sparse_random<M, R>(model: &mut M, rng: &mut R, count: usize, scale: f32) -> Result<AttackReport>
where
    M: ParameterViewMut + ?Sized,
    R: Rng + ?Sized,
{
    let slots = model.parameter_slots();
    if slots.is_empty() {
        return Err(AttackError::NoParameters);
    }
    let mut report = AttackReport::default();
    for _ in 0..count {
        let Some((slot, row, col)) = random_site(&*model, &slots, rng) else {
            continue;
        };
        let delta = normal(rng) * scale;
        report.perturbations.extend(nudge(model, &slot, row, col, delta));
    }
    debug!(count, changed = report.len(), "Applied sparse random perturbation");
    Ok(report)
}

/// At-rest file tamper: `max(1, m / 4)` weights of every linear layer
/// shifted by `+0.01`.
pub fn at_rest<M, R>(model: &mut M, rng: &mut R, m: usize) -> Result<AttackReport>
where
    M: ParameterViewMut + ?Sized,
    R: Rng + ?Sized,
{
    let layers = layer_names(&*model);
    if layers.is_empty() {
        return Err(AttackError::NoParameters);
    }
    let mut report = AttackReport::default();
    for layer in &layers {
        report.extend(targeted_layer(model, rng, layer, (m / 4).max(1), 0.01)?);
    }
    Ok(report)
}

/// Rank-1 update `W += scale·u·vᵗ` of one weight matrix, with `u` and `v`
/// standard normal.
pub fn rank1<M, R>(model: &mut M, rng: &mut R, layer: &str, scale: f32) -> Result<AttackReport>
where
    M: ParameterViewMut + ?Sized,
    R: Rng + ?Sized,
{
    let (rows, cols) = weight_shape(&*model, layer)?;
    let u: Vec<f32> = (0..rows).map(|_| normal(rng)).collect();
    let v: Vec<f32> = (0..cols).map(|_| normal(rng)).collect();
    let slot = weight_slot(layer);

    let mut report = AttackReport::default();
    for (r, ur) in u.iter().enumerate() {
        for (c, vc) in v.iter().enumerate() {
            report
                .perturbations
                .extend(nudge(model, &slot, r, c, scale * ur * vc));
        }
    }
    debug!(layer, scale, changed = report.len(), "Applied rank-1 perturbation");
    Ok(report)
}

/// Independent rank-1 update on every linear layer.
pub fn low_rank<M, R>(model: &mut M, rng: &mut R, scale: f32) -> Result<AttackReport>
where
    M: ParameterViewMut + ?Sized,
    R: Rng + ?Sized,
{
    let mut report = AttackReport::default();
    for layer in layer_names(&*model) {
        report.extend(rank1(model, rng, &layer, scale)?);
    }
    Ok(report)
}

/// Bulk perturbation confined to one named layer: `count` random weights
/// shifted by `delta`.
pub fn targeted_layer<M, R>(
    model: &mut M,
    rng: &mut R,
    layer: &str,
    count: usize,
    delta: f32,
) -> Result<AttackReport>
where
    M: ParameterViewMut + ?Sized,
    R: Rng + ?Sized,
{
    let (rows, cols) = weight_shape(&*model, layer)?;
    let slot = weight_slot(layer);
    let mut report = AttackReport::default();
    if rows == 0 || cols == 0 {
        return Ok(report);
    }
    for _ in 0..count {
        let (r, c) = (rng.gen_range(0..rows), rng.gen_range(0..cols));
        report.perturbations.extend(nudge(model, &slot, r, c, delta));
    }
    debug!(layer, count, delta, "Applied targeted layer perturbation");
    Ok(report)
}

/// Canary-aware search: try `attempts` single-scalar changes of size
/// `step·N(0, 1)` and keep each one only while `canaries` still pass.
///
/// Models an adversary who can probe behavior but cannot recompute the
/// commitments. The model ends in a state that passes `canaries` provided it
/// passed them before the search.
pub fn adaptive<M, R>(
    model: &mut M,
    rng: &mut R,
    canaries: &CanarySuite,
    attempts: usize,
    step: f32,
) -> Result<AttackReport>
where
    M: ParameterViewMut + Inference + ?Sized,
    R: Rng + ?Sized,
{
    let slots = model.parameter_slots();
    if slots.is_empty() {
        return Err(AttackError::NoParameters);
    }
    let mut report = AttackReport::default();
    for _ in 0..attempts {
        let Some((slot, row, col)) = random_site(&*model, &slots, rng) else {
            continue;
        };
        let Some(original) = model.parameter(&slot).and_then(|t| t.get(row, col)) else {
            continue;
        };
        let delta = normal(rng) * step;
        let Some(change) = nudge(model, &slot, row, col, delta) else {
            continue;
        };

        if canaries.evaluate(&*model)?.passed {
            report.perturbations.push(change);
        } else {
            // restore the stored value itself; `x + d - d` need not equal `x`
            if let Some(cell) = model.parameter_mut(&slot).and_then(|t| t.get_mut(row, col)) {
                *cell = original;
            }
            report.reverted += 1;
        }
    }
    info!(
        attempts,
        kept = report.len(),
        reverted = report.reverted,
        "Adaptive attack finished"
    );
    Ok(report)
}
