//! Hierarchical Parity-Node Manager
//!
//! Tamper detection for neural-network weights. A seeded sample of weight
//! coordinates is grouped into parity nodes, parity nodes are committed to by
//! keyed master HMACs, and the masters are bound by a root HMAC. Verification
//! recomputes the commitments against the live model.
//!
//! Modules:
//! - `sampler`: Seeded coordinate sampling and fan-in draws
//! - `placement`: Parity-node and master placement over a model
//! - `commitment`: HMAC primitives, digest selection and the public hash
//! - `manager`: Locking, fast and full verification
//! - `canary`: Behavioral input/output checks
//! - `artifacts`: On-disk artifact store
//! - `model`: Model traits and the reference MLP
//! - `training`: Seeded trainer for the reference MLP
//! - `serde_canon`: Canonical JSON encoding
//! - `config`: TOML configuration
//! - `errors`: Error types

pub mod artifacts;
pub mod canary;
pub mod commitment;
pub mod config;
pub mod errors;
pub mod manager;
pub mod model;
pub mod placement;
pub mod sampler;
pub mod serde_canon;
pub mod training;

pub use artifacts::ArtifactStore;
pub use canary::{CanaryReport, CanarySuite};
pub use commitment::{CommitmentKeys, DigestAlgorithm, MacKey};
pub use config::HpnmConfig;
pub use errors::{HpnmError, Result};
pub use manager::{verify_public_hash, LockedMap, ParityManager};
pub use model::{
    Coordinate, DenseLayer, Inference, Mlp, ParamKind, ParamSlot, ParameterView,
    ParameterViewMut, Tensor,
};
pub use placement::{place, MasterSpec, ParityNodeSpec, Placement, CORE_MASTER_ID, EDGE_MASTER_ID};
pub use sampler::DeterministicSampler;
pub use training::{make_regression_data, train, Dataset, TrainingParams};

/// Crate version string for artifact metadata and reports
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
