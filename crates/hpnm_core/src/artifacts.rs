//! Artifact persistence
//!
//! One directory holds everything a verifier needs to reload:
//! `hp_parity_map.json`, `public_hash.txt`, `placement.json`,
//! `canaries.json` and (demo only) `keys.json`. JSON artifacts are written
//! with sorted keys and two-space indentation. Loads are schema-checked and
//! report a missing file distinctly from a malformed one.

use crate::canary::CanarySuite;
use crate::commitment::{CommitmentKeys, MacKey};
use crate::errors::{HpnmError, Result};
use crate::manager::LockedMap;
use crate::placement::Placement;
use crate::serde_canon::canonical_pretty_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const LOCKED_MAP_FILE: &str = "hp_parity_map.json";
pub const PUBLIC_HASH_FILE: &str = "public_hash.txt";
pub const PLACEMENT_FILE: &str = "placement.json";
pub const CANARIES_FILE: &str = "canaries.json";
pub const KEYS_FILE: &str = "keys.json";
pub const MODEL_FILE: &str = "model.json";

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeysFile {
    key_m: String,
    key_root: String,
}

/// Directory-backed store for lock/verify artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Use an existing directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Use `root`, creating it if needed.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.path(name);
        fs::write(&path, canonical_pretty_string(value)?)?;
        debug!(path = %path.display(), "Wrote artifact");
        Ok(())
    }

    fn read_text(&self, name: &str) -> Result<String> {
        let path = self.path(name);
        if !path.exists() {
            return Err(HpnmError::MissingArtifact { path });
        }
        Ok(fs::read_to_string(&path)?)
    }

    pub fn save_locked_map(&self, locked: &LockedMap) -> Result<()> {
        self.write_json(LOCKED_MAP_FILE, locked)
    }

    pub fn load_locked_map(&self) -> Result<LockedMap> {
        let raw = self.read_text(LOCKED_MAP_FILE)?;
        let locked: LockedMap = serde_json::from_str(&raw)
            .map_err(|e| HpnmError::MalformedLockedMap(e.to_string()))?;
        locked.validate()?;
        Ok(locked)
    }

    pub fn save_public_hash(&self, public_hash: &str) -> Result<()> {
        fs::write(self.path(PUBLIC_HASH_FILE), public_hash)?;
        Ok(())
    }

    pub fn load_public_hash(&self) -> Result<String> {
        let raw = self.read_text(PUBLIC_HASH_FILE)?;
        let hash = raw.trim();
        if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HpnmError::malformed(
                PUBLIC_HASH_FILE,
                "expected a 64-character hex digest",
            ));
        }
        Ok(hash.to_string())
    }

    pub fn save_placement(&self, placement: &Placement) -> Result<()> {
        self.write_json(PLACEMENT_FILE, placement)
    }

    pub fn load_placement(&self) -> Result<Placement> {
        let raw = self.read_text(PLACEMENT_FILE)?;
        serde_json::from_str(&raw).map_err(|e| HpnmError::malformed(PLACEMENT_FILE, e.to_string()))
    }

    pub fn save_canaries(&self, suite: &CanarySuite) -> Result<()> {
        self.write_json(CANARIES_FILE, suite)
    }

    pub fn load_canaries(&self) -> Result<CanarySuite> {
        let raw = self.read_text(CANARIES_FILE)?;
        serde_json::from_str(&raw).map_err(|e| HpnmError::malformed(CANARIES_FILE, e.to_string()))
    }

    /// Demo only: production keys come from a secret store, never a file.
    pub fn save_keys(&self, keys: &CommitmentKeys) -> Result<()> {
        warn!("Writing HMAC keys to disk; use a secret store outside of demos");
        self.write_json(
            KEYS_FILE,
            &KeysFile {
                key_m: keys.key_m.to_hex(),
                key_root: keys.key_root.to_hex(),
            },
        )
    }

    /// Demo only, see [`ArtifactStore::save_keys`].
    pub fn load_keys(&self) -> Result<CommitmentKeys> {
        let raw = self.read_text(KEYS_FILE)?;
        let file: KeysFile =
            serde_json::from_str(&raw).map_err(|e| HpnmError::malformed(KEYS_FILE, e.to_string()))?;
        let decode = |s: &str| {
            MacKey::from_hex(s).map_err(|e| HpnmError::malformed(KEYS_FILE, e.to_string()))
        };
        Ok(CommitmentKeys::new(decode(&file.key_m)?, decode(&file.key_root)?))
    }

    pub fn model_path(&self) -> PathBuf {
        self.path(MODEL_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::DigestAlgorithm;
    use crate::manager::ParityManager;
    use crate::model::Mlp;
    use crate::placement::place;

    fn locked_fixture(store: &ArtifactStore) -> (Mlp, Placement, CommitmentKeys, LockedMap, String) {
        let net = Mlp::new(&[1, 10, 1], 0).unwrap();
        let placement = place(&net, 20, 0, 0.5).unwrap();
        let keys = CommitmentKeys::generate();
        let mgr = ParityManager::new(&net, &placement, DigestAlgorithm::Sha256).unwrap();
        let (locked, public_hash) = mgr.lock(&keys, store).unwrap();
        (net, placement, keys, locked, public_hash)
    }

    #[test]
    fn test_lock_writes_three_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::create(dir.path().join(".artifacts")).unwrap();
        let (_, placement, _, locked, public_hash) = locked_fixture(&store);

        assert!(store.path(LOCKED_MAP_FILE).exists());
        assert!(store.path(PUBLIC_HASH_FILE).exists());
        assert!(store.path(PLACEMENT_FILE).exists());
        assert!(!store.path(KEYS_FILE).exists());

        assert_eq!(store.load_locked_map().unwrap(), locked);
        assert_eq!(store.load_public_hash().unwrap(), public_hash);
        assert_eq!(store.load_placement().unwrap(), placement);
    }

    #[test]
    fn test_locked_map_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        locked_fixture(&store);
        let raw = fs::read_to_string(store.path(LOCKED_MAP_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["algo", "mn_hmacs", "pn_values", "root_hmac"]);
        assert_eq!(value["algo"], "sha256");
        assert!(raw.contains("\n  \"algo\": \"sha256\""));
    }

    #[test]
    fn test_reloaded_artifacts_verify() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let (net, _, keys, _, _) = locked_fixture(&store);

        let placement = store.load_placement().unwrap();
        let locked = store.load_locked_map().unwrap();
        let mgr = ParityManager::new(&net, &placement, locked.algo).unwrap();
        assert!(mgr.fast_check(&keys.key_m, &locked).unwrap());
        assert!(mgr.full_check(&keys.key_m, &keys.key_root, &locked).unwrap());
        assert_eq!(locked.public_hash().unwrap(), store.load_public_hash().unwrap());
    }

    #[test]
    fn test_missing_artifacts_are_distinct_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(matches!(
            store.load_locked_map(),
            Err(HpnmError::MissingArtifact { .. })
        ));
        assert!(matches!(
            store.load_placement(),
            Err(HpnmError::MissingArtifact { .. })
        ));
        assert!(matches!(
            store.load_keys(),
            Err(HpnmError::MissingArtifact { .. })
        ));
    }

    #[test]
    fn test_malformed_locked_map_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        fs::write(store.path(LOCKED_MAP_FILE), "{\"pn_values\": {}}").unwrap();
        assert!(matches!(
            store.load_locked_map(),
            Err(HpnmError::MalformedLockedMap(_))
        ));

        let unknown_algo = r#"{"pn_values":{},"mn_hmacs":{},"root_hmac":"00","algo":"md5"}"#;
        fs::write(store.path(LOCKED_MAP_FILE), unknown_algo).unwrap();
        assert!(matches!(
            store.load_locked_map(),
            Err(HpnmError::MalformedLockedMap(_))
        ));

        let extra = format!(
            r#"{{"pn_values":{{}},"mn_hmacs":{{}},"root_hmac":"{}","algo":"sha256","note":1}}"#,
            "0".repeat(64)
        );
        fs::write(store.path(LOCKED_MAP_FILE), extra).unwrap();
        assert!(matches!(
            store.load_locked_map(),
            Err(HpnmError::MalformedLockedMap(_))
        ));
    }

    #[test]
    fn test_malformed_placement_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let missing_field = r#"{"pn_specs":[],"mn_specs":[],"fixed_core":"MN_core"}"#;
        fs::write(store.path(PLACEMENT_FILE), missing_field).unwrap();
        assert!(matches!(
            store.load_placement(),
            Err(HpnmError::MalformedArtifact { .. })
        ));
    }

    #[test]
    fn test_keys_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let keys = CommitmentKeys::generate();
        store.save_keys(&keys).unwrap();
        assert_eq!(store.load_keys().unwrap(), keys);

        fs::write(store.path(KEYS_FILE), r#"{"key_m":"zz","key_root":"00"}"#).unwrap();
        assert!(matches!(
            store.load_keys(),
            Err(HpnmError::MalformedArtifact { .. })
        ));
    }

    #[test]
    fn test_public_hash_file_validated() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.save_public_hash("not-a-hash").unwrap();
        assert!(matches!(
            store.load_public_hash(),
            Err(HpnmError::MalformedArtifact { .. })
        ));
    }
}
