//! Parity-node placement
//!
//! Samples weight coordinates, cuts them into parity nodes with small random
//! fan-in, and assigns every parity node to one of two fixed masters:
//! `MN_core` for the output layer and `MN_edge` for everything else.

use crate::errors::{HpnmError, Result};
use crate::model::{Coordinate, ParameterView};
use crate::sampler::{DeterministicSampler, MAX_FAN_IN, MIN_FAN_IN};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// Id of the master covering the output layer's parity nodes.
pub const CORE_MASTER_ID: &str = "MN_core";
/// Id of the master covering every other parity node.
pub const EDGE_MASTER_ID: &str = "MN_edge";

/// A group of coordinates in one layer whose summed value is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParityNodeSpec {
    pub id: String,
    pub layer_name: String,
    pub indices: Vec<(usize, usize)>,
}

impl ParityNodeSpec {
    pub fn fan_in(&self) -> usize {
        self.indices.len()
    }

    pub fn coordinates(&self) -> impl Iterator<Item = Coordinate> + '_ {
        self.indices
            .iter()
            .map(move |&(row, col)| Coordinate::new(self.layer_name.clone(), row, col))
    }
}

/// A set of parity nodes committed under one keyed HMAC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MasterSpec {
    pub id: String,
    pub pn_ids: Vec<String>,
}

/// Immutable placement result: parity nodes, masters and the fixed pair.
///
/// Every constructor (including deserialization) runs the structural
/// checks in [`Placement::from_parts`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PlacementRepr", into = "PlacementRepr")]
pub struct Placement {
    pn_specs: Vec<ParityNodeSpec>,
    mn_specs: Vec<MasterSpec>,
    fixed_core: String,
    fixed_edge: String,
    /// Parity node id to position in `pn_specs`
    pn_index: HashMap<String, usize>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlacementRepr {
    pn_specs: Vec<ParityNodeSpec>,
    mn_specs: Vec<MasterSpec>,
    fixed_core: String,
    fixed_edge: String,
}

impl TryFrom<PlacementRepr> for Placement {
    type Error = HpnmError;

    fn try_from(r: PlacementRepr) -> Result<Self> {
        Placement::from_parts(r.pn_specs, r.mn_specs, r.fixed_core, r.fixed_edge)
    }
}

impl From<Placement> for PlacementRepr {
    fn from(p: Placement) -> Self {
        PlacementRepr {
            pn_specs: p.pn_specs,
            mn_specs: p.mn_specs,
            fixed_core: p.fixed_core,
            fixed_edge: p.fixed_edge,
        }
    }
}

impl Placement {
    /// Assemble a placement, rejecting anything that breaks the parity-node
    /// or fixed-master invariants.
    pub fn from_parts(
        pn_specs: Vec<ParityNodeSpec>,
        mn_specs: Vec<MasterSpec>,
        fixed_core: String,
        fixed_edge: String,
    ) -> Result<Self> {
        let invalid = |reason: String| HpnmError::malformed("placement", reason);

        if pn_specs.is_empty() {
            return Err(invalid("no parity nodes".into()));
        }
        let mut pn_ids = HashSet::new();
        for spec in &pn_specs {
            if spec.id.is_empty() || spec.layer_name.is_empty() {
                return Err(invalid("parity node with empty id or layer".into()));
            }
            if !pn_ids.insert(spec.id.as_str()) {
                return Err(invalid(format!("duplicate parity node id {}", spec.id)));
            }
            if !(MIN_FAN_IN..=MAX_FAN_IN).contains(&spec.fan_in()) {
                return Err(invalid(format!(
                    "parity node {} has fan-in {}, expected {}..={}",
                    spec.id,
                    spec.fan_in(),
                    MIN_FAN_IN,
                    MAX_FAN_IN
                )));
            }
        }

        let mut mn_ids = HashSet::new();
        for master in &mn_specs {
            if !mn_ids.insert(master.id.as_str()) {
                return Err(invalid(format!("duplicate master id {}", master.id)));
            }
            let mut seen = HashSet::new();
            for pid in &master.pn_ids {
                if !pn_ids.contains(pid.as_str()) {
                    return Err(invalid(format!(
                        "master {} references unknown parity node {}",
                        master.id, pid
                    )));
                }
                if !seen.insert(pid.as_str()) {
                    return Err(invalid(format!(
                        "master {} lists parity node {} twice",
                        master.id, pid
                    )));
                }
            }
        }

        if fixed_core == fixed_edge {
            return Err(invalid("fixed core and edge masters must differ".into()));
        }
        let find = |id: &str| mn_specs.iter().find(|m| m.id == id);
        let core = find(&fixed_core)
            .ok_or_else(|| invalid(format!("fixed core master {} not defined", fixed_core)))?;
        let edge = find(&fixed_edge)
            .ok_or_else(|| invalid(format!("fixed edge master {} not defined", fixed_edge)))?;
        if core.pn_ids.is_empty() {
            return Err(invalid("fixed core master is empty".into()));
        }

        let core_set: HashSet<&str> = core.pn_ids.iter().map(String::as_str).collect();
        if let Some(shared) = edge.pn_ids.iter().find(|p| core_set.contains(p.as_str())) {
            return Err(invalid(format!(
                "parity node {} belongs to both fixed masters",
                shared
            )));
        }
        if core.pn_ids.len() + edge.pn_ids.len() != pn_ids.len() {
            return Err(invalid(
                "fixed masters do not cover every parity node".into(),
            ));
        }

        let pn_index = pn_specs
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.id.clone(), i))
            .collect();
        Ok(Self {
            pn_specs,
            mn_specs,
            fixed_core,
            fixed_edge,
            pn_index,
        })
    }

    pub fn pn_specs(&self) -> &[ParityNodeSpec] {
        &self.pn_specs
    }

    pub fn mn_specs(&self) -> &[MasterSpec] {
        &self.mn_specs
    }

    pub fn fixed_core(&self) -> &str {
        &self.fixed_core
    }

    pub fn fixed_edge(&self) -> &str {
        &self.fixed_edge
    }

    pub fn pn_spec(&self, id: &str) -> Option<&ParityNodeSpec> {
        self.pn_index.get(id).map(|&i| &self.pn_specs[i])
    }

    pub fn master(&self, id: &str) -> Option<&MasterSpec> {
        self.mn_specs.iter().find(|m| m.id == id)
    }

    /// The `(core, edge)` pair checked by the fast path.
    pub fn fixed_masters(&self) -> [&MasterSpec; 2] {
        // from_parts guarantees both exist
        let core = self
            .master(&self.fixed_core)
            .unwrap_or(&self.mn_specs[0]);
        let edge = self
            .master(&self.fixed_edge)
            .unwrap_or(&self.mn_specs[0]);
        [core, edge]
    }

    /// Every monitored coordinate.
    pub fn covered_coordinates(&self) -> BTreeSet<Coordinate> {
        self.pn_specs.iter().flat_map(|s| s.coordinates()).collect()
    }

    /// The parity node committing `coord`, if it is monitored.
    pub fn parity_node_for(&self, coord: &Coordinate) -> Option<&ParityNodeSpec> {
        self.pn_specs.iter().find(|s| {
            s.layer_name == coord.layer && s.indices.contains(&(coord.row, coord.col))
        })
    }

    /// Add a master beyond the fixed pair. Fast checks ignore it; full checks
    /// and the root commitment cover it.
    pub fn with_auxiliary_master(mut self, master: MasterSpec) -> Result<Self> {
        self.mn_specs.push(master);
        Self::from_parts(self.pn_specs, self.mn_specs, self.fixed_core, self.fixed_edge)
    }

    /// Confirm every index still addresses a scalar in the live model.
    pub fn validate_against<V: ParameterView + ?Sized>(&self, view: &V) -> Result<()> {
        let shapes: HashMap<&str, (usize, usize)> = view
            .linear_weights()
            .into_iter()
            .map(|(name, w)| (name, w.shape()))
            .collect();
        for spec in &self.pn_specs {
            let shape = shapes.get(spec.layer_name.as_str()).copied();
            for &(row, col) in &spec.indices {
                match shape {
                    Some((rows, cols)) if row < rows && col < cols => {}
                    _ => {
                        return Err(HpnmError::InvalidCoordinate {
                            layer: spec.layer_name.clone(),
                            row,
                            col,
                        })
                    }
                }
            }
        }
        Ok(())
    }
}

/// Every linear weight coordinate in layer discovery order, then row-major.
pub fn enumerate_coordinates<V: ParameterView + ?Sized>(view: &V) -> Vec<Coordinate> {
    view.linear_weights()
        .into_iter()
        .flat_map(|(name, w)| {
            let (rows, cols) = w.shape();
            (0..rows).flat_map(move |r| (0..cols).map(move |c| Coordinate::new(name, r, c)))
        })
        .collect()
}

/// Place parity nodes and the two fixed masters on `view`.
///
/// The result is a pure function of the model topology and
/// `(num_parity, seed, density)`.
pub fn place<V: ParameterView + ?Sized>(
    view: &V,
    num_parity: usize,
    seed: u64,
    density: f64,
) -> Result<Placement> {
    let layers = view.linear_weights();
    let catalogue = enumerate_coordinates(view);
    if catalogue.is_empty() {
        return Err(HpnmError::NoTargets);
    }

    let mut sampler = DeterministicSampler::new(seed);
    let picks = sampler.sample(&catalogue, density, num_parity)?;

    let mut pn_specs = Vec::new();
    for (layer, _) in &layers {
        let idxs: Vec<(usize, usize)> = picks
            .iter()
            .filter(|c| c.layer == *layer)
            .map(|c| (c.row, c.col))
            .collect();

        let mut i = 0;
        while idxs.len() - i >= MIN_FAN_IN {
            let remaining = idxs.len() - i;
            let mut fan_in = sampler.fan_in(remaining);
            // never strand a single coordinate at the end of the layer
            if remaining - fan_in == 1 {
                if fan_in < MAX_FAN_IN {
                    fan_in += 1;
                } else {
                    fan_in -= 1;
                }
            }
            pn_specs.push(ParityNodeSpec {
                id: format!("PN{}", pn_specs.len() + 1),
                layer_name: layer.to_string(),
                indices: idxs[i..i + fan_in].to_vec(),
            });
            i += fan_in;
        }
        if i < idxs.len() {
            debug!(layer = %layer, "single sampled coordinate left unmonitored");
        }
    }

    if pn_specs.is_empty() {
        return Err(HpnmError::config(format!(
            "{} sampled coordinate(s) cannot form a parity node; raise density or num_parity",
            picks.len()
        )));
    }

    let out_layer = layers
        .last()
        .map(|(name, _)| name.to_string())
        .unwrap_or_default();
    let (mut core, mut edge): (Vec<String>, Vec<String>) = (Vec::new(), Vec::new());
    for spec in &pn_specs {
        if spec.layer_name == out_layer {
            core.push(spec.id.clone());
        } else {
            edge.push(spec.id.clone());
        }
    }
    if core.is_empty() {
        let first = edge.remove(0);
        debug!(pn = %first, "no parity node on output layer, using first as core");
        core.push(first);
    }

    info!(
        sampled = picks.len(),
        parity_nodes = pn_specs.len(),
        core = core.len(),
        edge = edge.len(),
        "Placed parity nodes"
    );

    Placement::from_parts(
        pn_specs,
        vec![
            MasterSpec {
                id: CORE_MASTER_ID.to_string(),
                pn_ids: core,
            },
            MasterSpec {
                id: EDGE_MASTER_ID.to_string(),
                pn_ids: edge,
            },
        ],
        CORE_MASTER_ID.to_string(),
        EDGE_MASTER_ID.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Mlp, Tensor};

    struct NoLayers;

    impl ParameterView for NoLayers {
        fn linear_weights(&self) -> Vec<(&str, &Tensor)> {
            Vec::new()
        }
    }

    #[test]
    fn test_no_targets() {
        assert!(matches!(place(&NoLayers, 10, 0, 0.5), Err(HpnmError::NoTargets)));
    }

    #[test]
    fn test_placement_shape() {
        let net = Mlp::new(&[4, 8, 2], 1).unwrap();
        let p = place(&net, 20, 0, 0.5).unwrap();
        let total: usize = p.pn_specs().iter().map(|s| s.fan_in()).sum();
        assert!(total >= 19 && total <= 20);
        for (i, spec) in p.pn_specs().iter().enumerate() {
            assert_eq!(spec.id, format!("PN{}", i + 1));
            assert!((MIN_FAN_IN..=MAX_FAN_IN).contains(&spec.fan_in()));
        }
        assert_eq!(p.fixed_core(), CORE_MASTER_ID);
        assert_eq!(p.fixed_edge(), EDGE_MASTER_ID);
        p.validate_against(&net).unwrap();
    }

    #[test]
    fn test_core_master_holds_output_layer() {
        let net = Mlp::new(&[4, 8, 2], 1).unwrap();
        let p = place(&net, 48, 3, 1.0).unwrap();
        let [core, edge] = p.fixed_masters();
        for pid in &core.pn_ids {
            assert_eq!(p.pn_spec(pid).unwrap().layer_name, "fc2");
        }
        for pid in &edge.pn_ids {
            assert_eq!(p.pn_spec(pid).unwrap().layer_name, "fc1");
        }
        // density 1.0 monitors every weight
        assert_eq!(p.covered_coordinates().len(), 48);
    }

    #[test]
    fn test_core_fallback_when_output_layer_unsampled() {
        // fc2 has a single weight, which can never form a parity node
        let net = Mlp::new(&[6, 1, 1], 2).unwrap();
        let p = place(&net, 7, 0, 1.0).unwrap();
        let [core, edge] = p.fixed_masters();
        assert_eq!(core.pn_ids, vec!["PN1".to_string()]);
        assert!(!edge.pn_ids.contains(&"PN1".to_string()));
    }

    #[test]
    fn test_too_sparse_sample_is_configuration_error() {
        let net = Mlp::new(&[1, 10, 1], 0).unwrap();
        assert!(matches!(
            place(&net, 1, 0, 0.5),
            Err(HpnmError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let net = Mlp::new(&[1, 10, 1], 0).unwrap();
        assert!(place(&net, 0, 0, 0.5).is_err());
        assert!(place(&net, 10, 0, 0.0).is_err());
        assert!(place(&net, 10, 0, 2.0).is_err());
    }

    #[test]
    fn test_from_parts_rejects_broken_partition() {
        let pn = |id: &str| ParityNodeSpec {
            id: id.into(),
            layer_name: "fc1".into(),
            indices: vec![(0, 0), (1, 0)],
        };
        let master = |id: &str, ids: &[&str]| MasterSpec {
            id: id.into(),
            pn_ids: ids.iter().map(|s| s.to_string()).collect(),
        };
        let build = |masters: Vec<MasterSpec>| {
            Placement::from_parts(
                vec![pn("PN1"), pn("PN2")],
                masters,
                CORE_MASTER_ID.into(),
                EDGE_MASTER_ID.into(),
            )
        };

        assert!(build(vec![master("MN_core", &["PN1"]), master("MN_edge", &["PN2"])]).is_ok());
        // overlap
        assert!(build(vec![
            master("MN_core", &["PN1", "PN2"]),
            master("MN_edge", &["PN2"])
        ])
        .is_err());
        // gap
        assert!(build(vec![master("MN_core", &["PN1"]), master("MN_edge", &[])]).is_err());
        // unknown id
        assert!(build(vec![
            master("MN_core", &["PN1"]),
            master("MN_edge", &["PN2", "PN9"])
        ])
        .is_err());
        // missing fixed master
        assert!(build(vec![master("MN_core", &["PN1", "PN2"])]).is_err());
    }

    #[test]
    fn test_from_parts_rejects_fan_in_out_of_range() {
        let spec = ParityNodeSpec {
            id: "PN1".into(),
            layer_name: "fc1".into(),
            indices: vec![(0, 0)],
        };
        let r = Placement::from_parts(
            vec![spec],
            vec![
                MasterSpec {
                    id: CORE_MASTER_ID.into(),
                    pn_ids: vec!["PN1".into()],
                },
                MasterSpec {
                    id: EDGE_MASTER_ID.into(),
                    pn_ids: vec![],
                },
            ],
            CORE_MASTER_ID.into(),
            EDGE_MASTER_ID.into(),
        );
        assert!(matches!(r, Err(HpnmError::MalformedArtifact { .. })));
    }

    #[test]
    fn test_validate_against_detects_shape_change() {
        let net = Mlp::new(&[4, 8, 2], 1).unwrap();
        let p = place(&net, 48, 0, 1.0).unwrap();
        let smaller = Mlp::new(&[4, 4, 2], 1).unwrap();
        assert!(matches!(
            p.validate_against(&smaller),
            Err(HpnmError::InvalidCoordinate { .. })
        ));
    }

    #[test]
    fn test_serde_rejects_unknown_fields() {
        let net = Mlp::new(&[4, 8, 2], 1).unwrap();
        let p = place(&net, 20, 0, 0.5).unwrap();
        let mut value = serde_json::to_value(&p).unwrap();
        assert_eq!(serde_json::from_value::<Placement>(value.clone()).unwrap(), p);
        value["extra"] = serde_json::json!(1);
        assert!(serde_json::from_value::<Placement>(value).is_err());
    }

    #[test]
    fn test_pn_spec_lookup_by_id() {
        let net = Mlp::new(&[4, 8, 2], 1).unwrap();
        let p = place(&net, 40, 3, 1.0).unwrap();
        let reloaded: Placement =
            serde_json::from_value(serde_json::to_value(&p).unwrap()).unwrap();
        for placement in [&p, &reloaded] {
            for spec in p.pn_specs() {
                assert_eq!(placement.pn_spec(&spec.id), Some(spec));
            }
            assert!(placement.pn_spec("PN0").is_none());
        }
        assert!(serde_json::to_value(&p).unwrap().get("pn_index").is_none());
    }
}
