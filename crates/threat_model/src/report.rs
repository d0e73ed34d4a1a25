//! Bookkeeping for applied perturbations

use hpnm_core::{Coordinate, ParamKind, ParamSlot, Placement};

/// One scalar change that actually altered a parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Perturbation {
    pub slot: ParamSlot,
    pub row: usize,
    pub col: usize,
    pub delta: f32,
}

impl Perturbation {
    /// Weight coordinate touched, if this perturbation hit a weight.
    pub fn weight_coordinate(&self) -> Option<Coordinate> {
        match self.slot.kind {
            ParamKind::Weight => Some(Coordinate::new(self.slot.layer.clone(), self.row, self.col)),
            ParamKind::Bias => None,
        }
    }
}

/// Everything an attack changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttackReport {
    pub perturbations: Vec<Perturbation>,
    /// Attempts the adaptive search reverted
    pub reverted: usize,
}

impl AttackReport {
    pub fn len(&self) -> usize {
        self.perturbations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perturbations.is_empty()
    }

    pub fn extend(&mut self, other: AttackReport) {
        self.perturbations.extend(other.perturbations);
        self.reverted += other.reverted;
    }

    /// Perturbations landing on coordinates monitored by `placement`.
    pub fn monitored_hits<'a>(
        &'a self,
        placement: &'a Placement,
    ) -> impl Iterator<Item = &'a Perturbation> + 'a {
        let covered = placement.covered_coordinates();
        self.perturbations.iter().filter(move |p| {
            p.weight_coordinate()
                .map(|c| covered.contains(&c))
                .unwrap_or(false)
        })
    }

    pub fn touches_monitored(&self, placement: &Placement) -> bool {
        self.monitored_hits(placement).next().is_some()
    }
}
