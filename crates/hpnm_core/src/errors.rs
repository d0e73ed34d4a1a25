//! Error types for the parity-node manager

use std::path::PathBuf;
use thiserror::Error;

/// Structural failures raised by placement, locking and artifact handling.
///
/// A verification mismatch is never one of these: `fast_check` and
/// `full_check` report tamper as `Ok(false)`.
#[derive(Error, Debug)]
pub enum HpnmError {
    /// Bad seed, density, digest algorithm or other caller-supplied setting
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The model exposes no linear weights to monitor
    #[error("No linear weight targets found for parity placement")]
    NoTargets,

    /// A persisted artifact is absent
    #[error("Missing artifact: {}", path.display())]
    MissingArtifact { path: PathBuf },

    /// The persisted locked map violates its schema
    #[error("Malformed locked map: {0}")]
    MalformedLockedMap(String),

    /// Any other persisted artifact violates its schema
    #[error("Malformed artifact {name}: {reason}")]
    MalformedArtifact { name: String, reason: String },

    /// A placement coordinate does not exist in the live model
    #[error("Invalid coordinate {layer}[{row}, {col}]")]
    InvalidCoordinate { layer: String, row: usize, col: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HpnmError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        HpnmError::Configuration(msg.into())
    }

    pub(crate) fn malformed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        HpnmError::MalformedArtifact {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for parity-node operations
pub type Result<T> = std::result::Result<T, HpnmError>;
