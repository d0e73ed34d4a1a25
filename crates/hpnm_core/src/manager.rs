//! Lock and verify the parity-node commitment tree
//!
//! `lock` turns a clean parameter snapshot into a [`LockedMap`]; the two
//! checks recompute commitments from live parameters and compare them with
//! that baseline. A mismatch is reported as `Ok(false)`; only structural
//! problems are errors.

use crate::artifacts::ArtifactStore;
use crate::commitment::{
    commit_master, commit_root, digests_equal, public_hash_hex, CommitmentKeys, DigestAlgorithm,
    MacKey,
};
use crate::errors::{HpnmError, Result};
use crate::model::ParameterView;
use crate::placement::{MasterSpec, ParityNodeSpec, Placement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Persisted commitment tree, created once from a trusted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockedMap {
    pub pn_values: BTreeMap<String, f64>,
    pub mn_hmacs: BTreeMap<String, String>,
    pub root_hmac: String,
    pub algo: DigestAlgorithm,
}

impl LockedMap {
    fn ensure_digest(&self, field: &str, digest: &str) -> Result<()> {
        let expected = self.algo.hex_len();
        if digest.len() == expected && digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Ok(());
        }
        Err(HpnmError::MalformedLockedMap(format!(
            "{} is not a {}-character {} digest",
            field, expected, self.algo
        )))
    }

    /// Check digest encodings against the declared algorithm.
    pub fn validate(&self) -> Result<()> {
        self.ensure_digest("root_hmac", &self.root_hmac)?;
        for (id, digest) in &self.mn_hmacs {
            self.ensure_digest(&format!("mn_hmacs[{}]", id), digest)?;
        }
        Ok(())
    }

    /// The stored commitment of one master, checked for shape.
    pub fn master_digest(&self, id: &str) -> Result<&str> {
        let digest = self.mn_hmacs.get(id).ok_or_else(|| {
            HpnmError::MalformedLockedMap(format!("no commitment for master {}", id))
        })?;
        self.ensure_digest(&format!("mn_hmacs[{}]", id), digest)?;
        Ok(digest.as_str())
    }

    /// Every master of `placement` must have a stored commitment.
    pub fn ensure_covers(&self, placement: &Placement) -> Result<()> {
        self.validate()?;
        for master in placement.mn_specs() {
            self.master_digest(&master.id)?;
        }
        Ok(())
    }

    /// Unkeyed BLAKE2b-256 over the canonical serialization of this map.
    pub fn public_hash(&self) -> Result<String> {
        public_hash_hex(self)
    }
}

/// Recompute the public hash of `locked` and compare it with a published
/// reference value.
pub fn verify_public_hash(locked: &LockedMap, expected: &str) -> Result<bool> {
    Ok(digests_equal(expected.trim(), &locked.public_hash()?))
}

/// Computes and checks commitments for one placement over one model view.
///
/// The manager borrows the model for its whole lifetime, so parameters cannot
/// change underneath a lock or check call.
pub struct ParityManager<'a, V: ParameterView + ?Sized> {
    view: &'a V,
    placement: &'a Placement,
    algo: DigestAlgorithm,
}

impl<'a, V: ParameterView + ?Sized> ParityManager<'a, V> {
    /// Bind a placement to a model, rejecting coordinates the model lacks.
    pub fn new(view: &'a V, placement: &'a Placement, algo: DigestAlgorithm) -> Result<Self> {
        placement.validate_against(view)?;
        Ok(Self {
            view,
            placement,
            algo,
        })
    }

    pub fn placement(&self) -> &Placement {
        self.placement
    }

    pub fn algo(&self) -> DigestAlgorithm {
        self.algo
    }

    /// Sum of the live scalars at `spec.indices`, in double precision.
    ///
    /// Order-insensitive and lossy: distinct perturbations with equal sums
    /// produce equal values.
    pub fn pn_value(&self, spec: &ParityNodeSpec) -> Result<f64> {
        let invalid = |row, col| HpnmError::InvalidCoordinate {
            layer: spec.layer_name.clone(),
            row,
            col,
        };
        let weight = self.view.weight(&spec.layer_name);
        spec.indices.iter().try_fold(0.0f64, |acc, &(row, col)| {
            let value = weight
                .and_then(|w| w.get(row, col))
                .ok_or_else(|| invalid(row, col))?;
            Ok(acc + f64::from(value))
        })
    }

    /// `pn_value` for every parity node.
    pub fn pn_values(&self) -> Result<BTreeMap<String, f64>> {
        self.placement
            .pn_specs()
            .iter()
            .map(|spec| Ok((spec.id.clone(), self.pn_value(spec)?)))
            .collect()
    }

    fn pn_values_for(&self, masters: &[&MasterSpec]) -> Result<BTreeMap<String, f64>> {
        let mut values = BTreeMap::new();
        for master in masters {
            for pid in &master.pn_ids {
                if values.contains_key(pid) {
                    continue;
                }
                let spec = self.placement.pn_spec(pid).ok_or_else(|| {
                    HpnmError::malformed("placement", format!("unknown parity node {}", pid))
                })?;
                values.insert(pid.clone(), self.pn_value(spec)?);
            }
        }
        Ok(values)
    }

    fn master_hmac(
        &self,
        key_m: &MacKey,
        algo: DigestAlgorithm,
        master: &MasterSpec,
        values: &BTreeMap<String, f64>,
    ) -> Result<String> {
        let entries = master
            .pn_ids
            .iter()
            .map(|pid| {
                values
                    .get(pid)
                    .map(|v| (pid.clone(), *v))
                    .ok_or_else(|| {
                        HpnmError::malformed("placement", format!("unknown parity node {}", pid))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        commit_master(key_m, algo, entries)
    }

    fn all_master_hmacs(
        &self,
        key_m: &MacKey,
        algo: DigestAlgorithm,
        values: &BTreeMap<String, f64>,
    ) -> Result<BTreeMap<String, String>> {
        self.placement
            .mn_specs()
            .iter()
            .map(|m| Ok((m.id.clone(), self.master_hmac(key_m, algo, m, values)?)))
            .collect()
    }

    /// Build the commitment tree from the current parameters without
    /// touching disk.
    pub fn commit(&self, keys: &CommitmentKeys) -> Result<LockedMap> {
        let pn_values = self.pn_values()?;
        if let Some((id, value)) = pn_values.iter().find(|(_, v)| !v.is_finite()) {
            return Err(HpnmError::config(format!(
                "parity node {} has non-finite value {}; refusing to lock",
                id, value
            )));
        }
        let mn_hmacs = self.all_master_hmacs(&keys.key_m, self.algo, &pn_values)?;
        let root_hmac = commit_root(
            &keys.key_root,
            self.algo,
            mn_hmacs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        )?;
        Ok(LockedMap {
            pn_values,
            mn_hmacs,
            root_hmac,
            algo: self.algo,
        })
    }

    /// Commit the current parameters and persist the locked map, its public
    /// hash and the placement. Returns the map and the public hash.
    pub fn lock(&self, keys: &CommitmentKeys, store: &ArtifactStore) -> Result<(LockedMap, String)> {
        let locked = self.commit(keys)?;
        let public_hash = locked.public_hash()?;

        store.save_locked_map(&locked)?;
        store.save_public_hash(&public_hash)?;
        store.save_placement(self.placement)?;

        info!(
            parity_nodes = locked.pn_values.len(),
            masters = locked.mn_hmacs.len(),
            algo = %self.algo,
            public_hash = %public_hash,
            "Locked parity map"
        );
        Ok((locked, public_hash))
    }

    /// Recompute and compare only the two fixed masters. The root and any
    /// other master entries are never read.
    pub fn fast_check(&self, key_m: &MacKey, locked: &LockedMap) -> Result<bool> {
        let fixed = self.placement.fixed_masters();
        for master in &fixed {
            locked.master_digest(&master.id)?;
        }
        let values = self.pn_values_for(&fixed)?;

        for master in fixed {
            let recomputed = self.master_hmac(key_m, locked.algo, master, &values)?;
            let stored = locked.master_digest(&master.id)?;
            if !digests_equal(stored, &recomputed) {
                warn!(master = %master.id, "Fast check: master commitment mismatch");
                return Ok(false);
            }
        }
        debug!("Fast check passed");
        Ok(true)
    }

    /// Recompute every parity node, every master and the root.
    pub fn full_check(&self, key_m: &MacKey, key_root: &MacKey, locked: &LockedMap) -> Result<bool> {
        locked.ensure_covers(self.placement)?;
        let values = self.pn_values()?;
        let mn_hmacs = self.all_master_hmacs(key_m, locked.algo, &values)?;

        let mut ok = mn_hmacs.len() == locked.mn_hmacs.len();
        for (id, recomputed) in &mn_hmacs {
            let stored = locked.mn_hmacs.get(id).map(String::as_str).unwrap_or("");
            if !digests_equal(stored, recomputed) {
                warn!(master = %id, "Full check: master commitment mismatch");
                ok = false;
            }
        }

        let root = commit_root(
            key_root,
            locked.algo,
            mn_hmacs.into_iter().collect(),
        )?;
        if !digests_equal(&locked.root_hmac, &root) {
            warn!("Full check: root commitment mismatch");
            ok = false;
        }
        if ok {
            debug!("Full check passed");
        }
        Ok(ok)
    }
}
