//! Attack battery for parity-node tamper detection
//!
//! Mutation strategies applied to live model parameters. They serve as the
//! oracle for property tests of the lock/verify manager and the canary
//! suite, and back the `--attack` option of the CLI. Nothing here is part of
//! a production verification path.
//!
//! Modules:
//! - `report`: Recorded scalar perturbations
//! - `attacks`: Individual mutation strategies
//! - `battery`: Named attack kinds and the dispatcher

pub mod attacks;
pub mod battery;
pub mod report;

pub use attacks::{adaptive, at_rest, low_rank, rank1, sparse_random, targeted_layer};
pub use battery::{run_attack, AttackKind, AttackOptions};
pub use report::{AttackReport, Perturbation};

use hpnm_core::HpnmError;
use thiserror::Error;

/// Errors raised while applying an attack
#[derive(Error, Debug)]
pub enum AttackError {
    /// The named layer does not exist in the model
    #[error("Unknown layer: {0}")]
    UnknownLayer(String),

    /// The attack name is not part of the battery
    #[error("Unknown attack: {0}")]
    UnknownAttack(String),

    /// The model has nothing to perturb
    #[error("Model exposes no parameters")]
    NoParameters,

    /// Failure inside the core library, e.g. canary evaluation
    #[error(transparent)]
    Core(#[from] HpnmError),
}

pub type Result<T> = std::result::Result<T, AttackError>;
