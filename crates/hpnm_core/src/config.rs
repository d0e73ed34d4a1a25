//! Configuration for locking and verification runs

use crate::commitment::DigestAlgorithm;
use crate::errors::{HpnmError, Result};
use crate::sampler::effective_target;
use crate::training::TrainingParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level configuration, loadable from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct HpnmConfig {
    /// Parity placement
    pub placement: PlacementConfig,
    /// Commitment and artifact output
    pub lock: LockConfig,
    /// Behavioral canaries
    pub canary: CanaryConfig,
    /// Reference model training
    pub training: TrainingConfig,
    /// Logging
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlacementConfig {
    /// Upper bound on sampled coordinates
    pub num_parity: usize,
    /// Sampler seed
    pub seed: u64,
    /// Fraction of coordinates eligible for sampling, in (0, 1]
    pub density: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    /// HMAC digest
    pub algo: DigestAlgorithm,
    /// Where artifacts are written and read
    pub artifacts_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CanaryConfig {
    pub count: usize,
    pub low: f32,
    pub high: f32,
    pub atol: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f32,
    pub batch_size: usize,
    /// Regression dataset size
    pub samples: usize,
    /// Hidden layer width of the reference MLP
    pub hidden: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            num_parity: 100,
            seed: 0,
            density: 0.5,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            algo: DigestAlgorithm::Sha256,
            artifacts_dir: PathBuf::from(".artifacts"),
        }
    }
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            count: 16,
            low: -1.0,
            high: 1.0,
            atol: 5e-2,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let params = TrainingParams::default();
        Self {
            epochs: params.epochs,
            learning_rate: params.learning_rate,
            batch_size: params.batch_size,
            samples: 100,
            hidden: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TrainingConfig {
    /// Trainer parameters; the shuffle seed follows the placement seed.
    pub fn params(&self, seed: u64) -> TrainingParams {
        TrainingParams {
            epochs: self.epochs,
            learning_rate: self.learning_rate,
            batch_size: self.batch_size,
            seed,
        }
    }
}

impl HpnmConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Configuration loaded successfully");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: HpnmConfig = toml::from_str(content)
            .map_err(|e| HpnmError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Same bounds the sampler enforces; the catalogue size only matters
        // for the result, so any positive length will do here.
        effective_target(1, self.placement.density, self.placement.num_parity)?;

        if self.canary.count == 0 {
            return Err(HpnmError::config("Canary count must be greater than 0"));
        }
        if !(self.canary.low.is_finite() && self.canary.high.is_finite())
            || self.canary.low > self.canary.high
        {
            return Err(HpnmError::config("Canary range must satisfy low <= high"));
        }
        if !self.canary.atol.is_finite() || self.canary.atol < 0.0 {
            return Err(HpnmError::config("Canary tolerance must be non-negative"));
        }

        if self.training.batch_size == 0 {
            return Err(HpnmError::config("Batch size must be greater than 0"));
        }
        if !(self.training.learning_rate > 0.0) {
            return Err(HpnmError::config("Learning rate must be positive"));
        }
        if self.training.samples == 0 || self.training.hidden == 0 {
            return Err(HpnmError::config(
                "Training samples and hidden width must be greater than 0",
            ));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(HpnmError::config(format!(
                "Unknown log level: {}",
                self.logging.level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HpnmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.placement.num_parity, 100);
        assert_eq!(config.placement.density, 0.5);
        assert_eq!(config.lock.algo, DigestAlgorithm::Sha256);
        assert_eq!(config.lock.artifacts_dir, PathBuf::from(".artifacts"));
        assert_eq!(config.canary.count, 16);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = HpnmConfig::from_toml_str(
            r#"
            [placement]
            seed = 7

            [lock]
            algo = "sha3_256"
            "#,
        )
        .unwrap();
        assert_eq!(config.placement.seed, 7);
        assert_eq!(config.placement.num_parity, 100);
        assert_eq!(config.lock.algo, DigestAlgorithm::Sha3_256);
        assert_eq!(config.training.samples, 100);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for toml in [
            "[placement]\ndensity = 0.0",
            "[placement]\ndensity = 1.5",
            "[placement]\nnum_parity = 0",
            "[lock]\nalgo = \"md5\"",
            "[canary]\ncount = 0",
            "[canary]\nlow = 1.0\nhigh = -1.0",
            "[training]\nbatch_size = 0",
            "[logging]\nlevel = \"loud\"",
            "[placement]\nunknown = 1",
        ] {
            assert!(
                matches!(
                    HpnmConfig::from_toml_str(toml),
                    Err(HpnmError::Configuration(_))
                ),
                "accepted {}",
                toml
            );
        }
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hpnm.toml");
        std::fs::write(&path, "[canary]\natol = 0.1\n").unwrap();
        let config = HpnmConfig::from_file(&path).unwrap();
        assert_eq!(config.canary.atol, 0.1);
        assert!(HpnmConfig::from_file(dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_training_params_follow_seed() {
        let params = TrainingConfig::default().params(3);
        assert_eq!(params.seed, 3);
        assert_eq!(params.epochs, TrainingParams::default().epochs);
    }
}
