//! Keyed commitments over canonical payloads
//!
//! Pure functions: HMAC over canonical JSON with a selectable digest, the
//! master/root commitment formulas, constant-time hex comparison and the
//! unkeyed BLAKE2b public hash.

use crate::errors::{HpnmError, Result};
use crate::serde_canon::canonical_bytes;
use blake2::{digest::consts::U32, Blake2b, Digest};
use hmac::{digest::KeyInit, Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use sha3::{Sha3_256, Sha3_512};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

type Blake2b256 = Blake2b<U32>;

/// Length in bytes of freshly generated keys.
pub const KEY_LEN: usize = 32;

/// Digest used inside the HMAC constructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
    Sha3_256,
    Sha3_512,
}

impl DigestAlgorithm {
    pub const ALL: [DigestAlgorithm; 5] = [
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha384,
        DigestAlgorithm::Sha512,
        DigestAlgorithm::Sha3_256,
        DigestAlgorithm::Sha3_512,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
            DigestAlgorithm::Sha3_256 => "sha3_256",
            DigestAlgorithm::Sha3_512 => "sha3_512",
        }
    }

    /// Digest output size in bytes.
    pub fn output_size(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 | DigestAlgorithm::Sha3_256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 | DigestAlgorithm::Sha3_512 => 64,
        }
    }

    /// Length of a hex-encoded digest.
    pub fn hex_len(&self) -> usize {
        self.output_size() * 2
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = HpnmError;

    fn from_str(s: &str) -> Result<Self> {
        DigestAlgorithm::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| HpnmError::config(format!("unknown digest algorithm: {}", s)))
    }
}

impl TryFrom<String> for DigestAlgorithm {
    type Error = HpnmError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<DigestAlgorithm> for String {
    fn from(a: DigestAlgorithm) -> Self {
        a.name().to_string()
    }
}

/// HMAC key material. `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct MacKey(Vec<u8>);

impl MacKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(HpnmError::config("HMAC key must not be empty"));
        }
        Ok(Self(bytes))
    }

    pub fn generate() -> Self {
        let mut bytes = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| HpnmError::config(format!("invalid hex key: {}", e)))?;
        Self::new(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for MacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacKey(<redacted {} bytes>)", self.0.len())
    }
}

/// The two pre-shared keys: `key_m` for masters, `key_root` for the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentKeys {
    pub key_m: MacKey,
    pub key_root: MacKey,
}

impl CommitmentKeys {
    pub fn new(key_m: MacKey, key_root: MacKey) -> Self {
        Self { key_m, key_root }
    }

    pub fn generate() -> Self {
        Self {
            key_m: MacKey::generate(),
            key_root: MacKey::generate(),
        }
    }
}

fn mac_hex<M: Mac + KeyInit>(key: &MacKey, payload: &[u8]) -> Result<String> {
    let mut mac = <M as KeyInit>::new_from_slice(key.as_bytes())
        .map_err(|e| HpnmError::config(format!("invalid HMAC key: {}", e)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Hex HMAC of `payload` under `key` using `algo`.
pub fn hmac_hex(key: &MacKey, payload: &[u8], algo: DigestAlgorithm) -> Result<String> {
    match algo {
        DigestAlgorithm::Sha256 => mac_hex::<Hmac<Sha256>>(key, payload),
        DigestAlgorithm::Sha384 => mac_hex::<Hmac<Sha384>>(key, payload),
        DigestAlgorithm::Sha512 => mac_hex::<Hmac<Sha512>>(key, payload),
        DigestAlgorithm::Sha3_256 => mac_hex::<Hmac<Sha3_256>>(key, payload),
        DigestAlgorithm::Sha3_512 => mac_hex::<Hmac<Sha3_512>>(key, payload),
    }
}

/// Master commitment: HMAC over the id-sorted `[[pn_id, value], ...]` list.
pub fn commit_master(
    key_m: &MacKey,
    algo: DigestAlgorithm,
    mut entries: Vec<(String, f64)>,
) -> Result<String> {
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    hmac_hex(key_m, &canonical_bytes(&entries)?, algo)
}

/// Root commitment: HMAC over the id-sorted `[[mn_id, hmac], ...]` list.
pub fn commit_root(
    key_root: &MacKey,
    algo: DigestAlgorithm,
    mut masters: Vec<(String, String)>,
) -> Result<String> {
    masters.sort_by(|a, b| a.0.cmp(&b.0));
    hmac_hex(key_root, &canonical_bytes(&masters)?, algo)
}

/// Exact equality of two hex digests, compared in constant time.
pub fn digests_equal(expected: &str, actual: &str) -> bool {
    expected.len() == actual.len() && bool::from(expected.as_bytes().ct_eq(actual.as_bytes()))
}

/// Unkeyed 32-byte BLAKE2b digest of the canonical serialization of `value`.
pub fn public_hash_hex<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let digest = Blake2b256::digest(canonical_bytes(value)?);
    Ok(hex::encode(digest))
}
