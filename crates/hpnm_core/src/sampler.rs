//! Deterministic coordinate sampling
//!
//! All randomness used by placement flows through one seeded generator so a
//! placement can be reproduced bit for bit from `(topology, num_parity, seed,
//! density)`.

use crate::errors::{HpnmError, Result};
use crate::model::Coordinate;
use rand::{rngs::StdRng, seq::index, Rng, SeedableRng};

/// Smallest number of coordinates committed by one parity node.
pub const MIN_FAN_IN: usize = 2;
/// Largest number of coordinates committed by one parity node.
pub const MAX_FAN_IN: usize = 10;

/// Seeded source for coordinate selection and fan-in draws.
#[derive(Debug, Clone)]
pub struct DeterministicSampler {
    rng: StdRng,
}

impl DeterministicSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draw a reproducible subset of `coordinates`.
    ///
    /// `coordinates` must already be in a fixed enumeration order (layer
    /// discovery order, then row-major). The result is in sampled order.
    pub fn sample(
        &mut self,
        coordinates: &[Coordinate],
        density: f64,
        target_count: usize,
    ) -> Result<Vec<Coordinate>> {
        if coordinates.is_empty() {
            return Err(HpnmError::config("cannot sample from an empty coordinate set"));
        }
        let amount = effective_target(coordinates.len(), density, target_count)?;
        Ok(index::sample(&mut self.rng, coordinates.len(), amount)
            .into_iter()
            .map(|i| coordinates[i].clone())
            .collect())
    }

    /// Fan-in for the next parity node when `remaining` coordinates are left
    /// in the current layer. Uniform in `[2, min(10, remaining)]`.
    pub fn fan_in(&mut self, remaining: usize) -> usize {
        let upper = remaining.min(MAX_FAN_IN).max(MIN_FAN_IN);
        self.rng.gen_range(MIN_FAN_IN..=upper)
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

/// `min(target_count, max(1, floor(len * density)))`, after validating the
/// density and target.
pub fn effective_target(len: usize, density: f64, target_count: usize) -> Result<usize> {
    if !density.is_finite() || density <= 0.0 || density > 1.0 {
        return Err(HpnmError::config(format!(
            "density must be in (0, 1], got {}",
            density
        )));
    }
    if target_count == 0 {
        return Err(HpnmError::config("target count must be positive"));
    }
    let by_density = ((len as f64) * density).floor() as usize;
    Ok(target_count.min(by_density.max(1)))
}

/// One-shot form of [`DeterministicSampler::sample`].
pub fn sample(
    seed: u64,
    coordinates: &[Coordinate],
    density: f64,
    target_count: usize,
) -> Result<Vec<Coordinate>> {
    DeterministicSampler::new(seed).sample(coordinates, density, target_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(layer: &str, rows: usize, cols: usize) -> Vec<Coordinate> {
        (0..rows)
            .flat_map(|r| (0..cols).map(move |c| Coordinate::new(layer, r, c)))
            .collect()
    }

    #[test]
    fn test_sample_is_reproducible() {
        let coords = grid("fc1", 8, 8);
        let a = sample(42, &coords, 0.5, 20).unwrap();
        let b = sample(42, &coords, 0.5, 20).unwrap();
        let c = sample(43, &coords, 0.5, 20).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn test_sample_has_no_duplicates() {
        let coords = grid("fc1", 5, 5);
        let mut picked = sample(1, &coords, 1.0, 25).unwrap();
        picked.sort();
        picked.dedup();
        assert_eq!(picked.len(), 25);
    }

    #[test]
    fn test_effective_target() {
        assert_eq!(effective_target(20, 0.5, 100).unwrap(), 10);
        assert_eq!(effective_target(20, 0.5, 4).unwrap(), 4);
        assert_eq!(effective_target(3, 0.1, 10).unwrap(), 1);
        assert!(effective_target(10, 0.0, 5).is_err());
        assert!(effective_target(10, 1.5, 5).is_err());
        assert!(effective_target(10, f64::NAN, 5).is_err());
        assert!(effective_target(10, 0.5, 0).is_err());
    }

    #[test]
    fn test_empty_catalogue_is_rejected() {
        assert!(matches!(
            sample(0, &[], 0.5, 10),
            Err(HpnmError::Configuration(_))
        ));
    }

    #[test]
    fn test_fan_in_bounds() {
        let mut sampler = DeterministicSampler::new(9);
        for remaining in 2..40 {
            let f = sampler.fan_in(remaining);
            assert!(f >= MIN_FAN_IN);
            assert!(f <= MAX_FAN_IN.min(remaining));
        }
        assert_eq!(sampler.fan_in(2), 2);
    }
}
