//! HPNM command line interface
//!
//! `hpnm lock` trains the reference model and writes the parity-node
//! commitments; `hpnm verify` reloads them, optionally attacks the model, and
//! reports the fast, full and canary checks. `hpnm battery` runs every attack
//! against a fresh copy of the clean model and times each verification.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hpnm_core::{
    make_regression_data, place, train, verify_public_hash, ArtifactStore, CanarySuite,
    CommitmentKeys, HpnmConfig, LockedMap, Mlp, ParityManager, Placement,
};
use hpnm_threat::{run_attack, AttackKind, AttackOptions};
use rand::{rngs::StdRng, SeedableRng};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "hpnm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hierarchical parity-node tamper detection for model weights", long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the reference model, place parity nodes and lock them
    Lock(LockArgs),
    /// Reload artifacts, optionally attack the model, and run every check
    Verify(VerifyArgs),
    /// Run every attack against the clean model and report each check
    Battery(BatteryArgs),
}

#[derive(Args, Debug)]
struct LockArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Placement and training seed
    #[arg(long)]
    seed: Option<u64>,

    /// Fraction of weights eligible for sampling
    #[arg(long)]
    density: Option<f64>,

    /// Upper bound on sampled coordinates
    #[arg(long)]
    num_parity: Option<usize>,

    /// Artifacts directory
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// Artifacts directory
    #[arg(long, default_value = ".artifacts")]
    art: PathBuf,

    /// Attack to apply before verifying
    #[arg(long, default_value = "none")]
    attack: AttackKind,

    #[command(flatten)]
    tuning: AttackArgs,
}

#[derive(Args, Debug)]
struct BatteryArgs {
    /// Artifacts directory
    #[arg(long, default_value = ".artifacts")]
    art: PathBuf,

    #[command(flatten)]
    tuning: AttackArgs,
}

#[derive(Args, Debug, Clone)]
struct AttackArgs {
    /// Scalar budget for sparse and bulk attacks
    #[arg(long, default_value = "20")]
    m: usize,

    /// Perturbation scale for rank-1 and sparse attacks
    #[arg(long, default_value = "0.01")]
    scale: f32,

    /// Attempts for the adaptive attack
    #[arg(long, default_value = "5000")]
    attempts: usize,

    /// Seed for the attack RNG
    #[arg(long, default_value = "0")]
    attack_seed: u64,
}

impl AttackArgs {
    fn options(&self) -> AttackOptions {
        AttackOptions {
            m: self.m,
            scale: self.scale,
            attempts: self.attempts,
            step: AttackOptions::default().step,
        }
    }
}

impl LockArgs {
    /// File (or default) configuration with command-line overrides applied.
    fn resolve_config(&self) -> Result<HpnmConfig> {
        let mut config = match &self.config {
            Some(path) => HpnmConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => HpnmConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.placement.seed = seed;
        }
        if let Some(density) = self.density {
            config.placement.density = density;
        }
        if let Some(num_parity) = self.num_parity {
            config.placement.num_parity = num_parity;
        }
        if let Some(out) = &self.out {
            config.lock.artifacts_dir = out.clone();
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[derive(Debug)]
struct LockSummary {
    public_hash: String,
    parity_nodes: usize,
    masters: usize,
    train_loss: f32,
    canaries_passed: bool,
}

#[derive(Debug, Clone, Copy)]
struct CheckResults {
    fast_ok: bool,
    full_ok: bool,
    canaries_ok: bool,
    max_abs_error: f64,
}

impl CheckResults {
    fn passed(&self) -> bool {
        self.fast_ok && self.full_ok && self.canaries_ok
    }
}

#[derive(Debug)]
struct VerifyOutcome {
    public_hash_ok: bool,
    checks: CheckResults,
    perturbed: usize,
}

impl VerifyOutcome {
    fn passed(&self) -> bool {
        self.public_hash_ok && self.checks.passed()
    }
}

#[derive(Debug)]
struct BatteryRow {
    attack: AttackKind,
    perturbed: usize,
    checks: CheckResults,
    elapsed: Duration,
}

#[derive(Debug)]
struct BatteryOutcome {
    public_hash_ok: bool,
    rows: Vec<BatteryRow>,
}

/// Everything `hpnm lock` writes, read back.
struct Artifacts {
    model: Mlp,
    placement: Placement,
    keys: CommitmentKeys,
    locked: LockedMap,
    canaries: CanarySuite,
    published: String,
}

impl Artifacts {
    fn load(dir: &Path) -> Result<Self> {
        let store = ArtifactStore::new(dir);
        Ok(Self {
            model: Mlp::load_json(&store.model_path()).context("Failed to load model")?,
            placement: store.load_placement().context("Failed to load placement")?,
            keys: store.load_keys().context("Failed to load keys")?,
            locked: store.load_locked_map().context("Failed to load locked map")?,
            canaries: store.load_canaries().context("Failed to load canaries")?,
            published: store.load_public_hash().context("Failed to load public hash")?,
        })
    }

    fn public_hash_ok(&self) -> Result<bool> {
        let ok = verify_public_hash(&self.locked, &self.published)?;
        if !ok {
            warn!("Locked map does not match the published hash");
        }
        Ok(ok)
    }

    /// Fast, full and canary checks of `model` against the locked baseline.
    fn check(&self, model: &Mlp) -> Result<CheckResults> {
        let manager = ParityManager::new(model, &self.placement, self.locked.algo)?;
        let fast_ok = manager.fast_check(&self.keys.key_m, &self.locked)?;
        let full_ok = manager.full_check(&self.keys.key_m, &self.keys.key_root, &self.locked)?;
        let canary = self.canaries.evaluate(model)?;
        Ok(CheckResults {
            fast_ok,
            full_ok,
            canaries_ok: canary.passed,
            max_abs_error: canary.max_abs_error,
        })
    }
}

fn run_lock(config: &HpnmConfig) -> Result<LockSummary> {
    let seed = config.placement.seed;
    let store = ArtifactStore::create(&config.lock.artifacts_dir)
        .context("Failed to create artifacts directory")?;

    let keys = CommitmentKeys::generate();
    store.save_keys(&keys).context("Failed to write keys")?;

    info!(
        "Training reference MLP (hidden={}, epochs={})",
        config.training.hidden, config.training.epochs
    );
    let data = make_regression_data(config.training.samples, seed);
    let mut model = Mlp::new(&[1, config.training.hidden, 1], seed)?;
    let train_loss = train(&mut model, &data, &config.training.params(seed))?;
    model
        .save_json(&store.model_path())
        .context("Failed to write model")?;

    let placement = place(
        &model,
        config.placement.num_parity,
        seed,
        config.placement.density,
    )
    .context("Parity placement failed")?;
    let manager = ParityManager::new(&model, &placement, config.lock.algo)?;
    let (locked, public_hash) = manager.lock(&keys, &store).context("Locking failed")?;

    let canaries =
        CanarySuite::make_reference_suite(config.canary.count, config.canary.low, config.canary.high)?
            .with_atol(config.canary.atol)?;
    store.save_canaries(&canaries).context("Failed to write canaries")?;
    let baseline = canaries.evaluate(&model)?;
    if !baseline.passed {
        warn!(
            "Clean model already misses canaries (max |err| = {:.6}); consider more epochs",
            baseline.max_abs_error
        );
    }

    Ok(LockSummary {
        public_hash,
        parity_nodes: placement.pn_specs().len(),
        masters: locked.mn_hmacs.len(),
        train_loss,
        canaries_passed: baseline.passed,
    })
}

fn run_verify(args: &VerifyArgs) -> Result<VerifyOutcome> {
    let artifacts = Artifacts::load(&args.art)?;
    let public_hash_ok = artifacts.public_hash_ok()?;

    let mut model = artifacts.model.clone();
    let mut perturbed = 0;
    if args.attack != AttackKind::None {
        info!("Applying attack: {}", args.attack);
        let mut rng = StdRng::seed_from_u64(args.tuning.attack_seed);
        let report = run_attack(
            args.attack,
            &mut model,
            &mut rng,
            &args.tuning.options(),
            &artifacts.canaries,
        )?;
        perturbed = report.len();
    }

    Ok(VerifyOutcome {
        public_hash_ok,
        checks: artifacts.check(&model)?,
        perturbed,
    })
}

/// Apply each attack in `kinds` to its own copy of the clean model and time
/// the verification that follows.
fn run_battery(args: &BatteryArgs, kinds: &[AttackKind]) -> Result<BatteryOutcome> {
    let artifacts = Artifacts::load(&args.art)?;
    let public_hash_ok = artifacts.public_hash_ok()?;
    let options = args.tuning.options();

    let mut rows = Vec::with_capacity(kinds.len());
    for &attack in kinds {
        let mut model = artifacts.model.clone();
        let mut rng = StdRng::seed_from_u64(args.tuning.attack_seed);
        let report = run_attack(attack, &mut model, &mut rng, &options, &artifacts.canaries)?;

        let started = Instant::now();
        let checks = artifacts.check(&model)?;
        let elapsed = started.elapsed();
        info!(
            attack = %attack,
            passed = checks.passed(),
            elapsed_ms = elapsed.as_secs_f64() * 1e3,
            "Battery entry verified"
        );
        rows.push(BatteryRow {
            attack,
            perturbed: report.len(),
            checks,
            elapsed,
        });
    }
    Ok(BatteryOutcome {
        public_hash_ok,
        rows,
    })
}

fn init_logging(level: Level) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Lock(args) => {
            let config = args.resolve_config()?;
            let level = if cli.verbose {
                Level::DEBUG
            } else {
                config
                    .logging
                    .level
                    .parse::<Level>()
                    .context("Invalid log level")?
            };
            init_logging(level)?;

            info!("HPNM lock v{}", hpnm_core::VERSION);
            let summary = run_lock(&config)?;

            println!("Artifacts: {}", config.lock.artifacts_dir.display());
            println!("Training loss: {:.6}", summary.train_loss);
            println!(
                "Parity nodes: {}, masters: {}",
                summary.parity_nodes, summary.masters
            );
            println!("Clean canaries: {}", summary.canaries_passed);
            println!("Public hash: {}", summary.public_hash);
        }
        Commands::Verify(args) => {
            init_logging(if cli.verbose { Level::DEBUG } else { Level::INFO })?;

            let outcome = run_verify(&args)?;

            println!("=== Verification Results ===");
            if args.attack != AttackKind::None {
                println!("Attack: {} ({} scalars changed)", args.attack, outcome.perturbed);
            }
            println!("Public hash: {}", outcome.public_hash_ok);
            println!("Fast check (fixed masters): {}", outcome.checks.fast_ok);
            println!("Full check (all masters + root): {}", outcome.checks.full_ok);
            println!(
                "Canaries: {} (max |err| = {:.6})",
                outcome.checks.canaries_ok, outcome.checks.max_abs_error
            );

            if !outcome.passed() {
                std::process::exit(1);
            }
        }
        Commands::Battery(args) => {
            init_logging(if cli.verbose { Level::DEBUG } else { Level::WARN })?;

            let outcome = run_battery(&args, &AttackKind::ALL)?;

            println!("=== Attack Battery ===");
            println!("Public hash: {}", outcome.public_hash_ok);
            println!(
                "{:<17} {:>7} {:>6} {:>6} {:>7} {:>8} {:>10}",
                "attack", "changed", "fast", "full", "canary", "verify", "ms"
            );
            for row in &outcome.rows {
                println!(
                    "{:<17} {:>7} {:>6} {:>6} {:>7} {:>8} {:>10.3}",
                    row.attack.name(),
                    row.perturbed,
                    row.checks.fast_ok,
                    row.checks.full_ok,
                    row.checks.canaries_ok,
                    row.checks.passed(),
                    row.elapsed.as_secs_f64() * 1e3
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpnm_core::artifacts::PUBLIC_HASH_FILE;

    fn quick_config(dir: &Path) -> HpnmConfig {
        let mut config = HpnmConfig::default();
        config.lock.artifacts_dir = dir.to_path_buf();
        config.placement.density = 1.0;
        config.placement.num_parity = 20;
        config.training.epochs = 20;
        config
    }

    fn quick_tuning() -> AttackArgs {
        AttackArgs {
            m: 20,
            scale: 0.01,
            attempts: 50,
            attack_seed: 0,
        }
    }

    fn verify_args(dir: &Path, attack: AttackKind) -> VerifyArgs {
        VerifyArgs {
            art: dir.to_path_buf(),
            attack,
            tuning: quick_tuning(),
        }
    }

    #[test]
    fn test_cli_parses_verify_flags() {
        let cli = Cli::try_parse_from([
            "hpnm", "verify", "--art", "out", "--attack", "low-rank", "--scale", "0.05",
        ])
        .unwrap();
        match cli.command {
            Commands::Verify(args) => {
                assert_eq!(args.attack, AttackKind::LowRank);
                assert_eq!(args.art, PathBuf::from("out"));
                assert_eq!(args.tuning.scale, 0.05);
                assert_eq!(args.tuning.m, 20);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let runtime = Cli::try_parse_from(["hpnm", "verify", "--attack", "runtime"]).unwrap();
        let Commands::Verify(args) = runtime.command else {
            panic!("expected verify");
        };
        assert_eq!(args.attack, AttackKind::Runtime);
        assert!(Cli::try_parse_from(["hpnm", "verify", "--attack", "bit-flip"]).is_err());
    }

    #[test]
    fn test_cli_parses_battery_flags() {
        let cli = Cli::try_parse_from([
            "hpnm", "battery", "--art", "out", "--attempts", "10", "--attack-seed", "4",
        ])
        .unwrap();
        let Commands::Battery(args) = cli.command else {
            panic!("expected battery");
        };
        assert_eq!(args.art, PathBuf::from("out"));
        assert_eq!(args.tuning.attempts, 10);
        assert_eq!(args.tuning.attack_seed, 4);
        assert!(Cli::try_parse_from(["hpnm", "battery", "--attack", "none"]).is_err());
    }

    #[test]
    fn test_lock_flags_override_config() {
        let cli = Cli::try_parse_from([
            "hpnm", "lock", "--seed", "9", "--density", "0.25", "--num-parity", "30", "--out", "x",
        ])
        .unwrap();
        let Commands::Lock(args) = cli.command else {
            panic!("expected lock");
        };
        let config = args.resolve_config().unwrap();
        assert_eq!(config.placement.seed, 9);
        assert_eq!(config.placement.density, 0.25);
        assert_eq!(config.placement.num_parity, 30);
        assert_eq!(config.lock.artifacts_dir, PathBuf::from("x"));

        let bad = Cli::try_parse_from(["hpnm", "lock", "--density", "3"]).unwrap();
        let Commands::Lock(args) = bad.command else {
            panic!("expected lock");
        };
        assert!(args.resolve_config().is_err());
    }

    #[test]
    fn test_lock_then_verify_clean_model() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run_lock(&quick_config(dir.path())).unwrap();
        assert_eq!(summary.masters, 2);
        assert!(summary.parity_nodes >= 2);
        assert_eq!(summary.public_hash.len(), 64);

        let outcome = run_verify(&verify_args(dir.path(), AttackKind::None)).unwrap();
        assert!(outcome.public_hash_ok);
        assert!(outcome.checks.fast_ok);
        assert!(outcome.checks.full_ok);
        assert_eq!(outcome.perturbed, 0);
    }

    #[test]
    fn test_verify_detects_at_rest_attack() {
        let dir = tempfile::tempdir().unwrap();
        run_lock(&quick_config(dir.path())).unwrap();

        let outcome = run_verify(&verify_args(dir.path(), AttackKind::AtRest)).unwrap();
        assert!(outcome.perturbed > 0);
        assert!(!outcome.checks.fast_ok);
        assert!(!outcome.checks.full_ok);
        assert!(!outcome.passed());
    }

    #[test]
    fn test_verify_detects_runtime_attack() {
        let dir = tempfile::tempdir().unwrap();
        run_lock(&quick_config(dir.path())).unwrap();

        let outcome = run_verify(&verify_args(dir.path(), AttackKind::Runtime)).unwrap();
        assert!(outcome.perturbed > 0);
        assert!(!outcome.checks.full_ok);
    }

    #[test]
    fn test_battery_restores_clean_model_between_attacks() {
        let dir = tempfile::tempdir().unwrap();
        run_lock(&quick_config(dir.path())).unwrap();
        let args = BatteryArgs {
            art: dir.path().to_path_buf(),
            tuning: quick_tuning(),
        };

        let kinds = [
            AttackKind::AtRest,
            AttackKind::None,
            AttackKind::LowRank,
            AttackKind::Runtime,
        ];
        let outcome = run_battery(&args, &kinds).unwrap();
        assert!(outcome.public_hash_ok);
        assert_eq!(outcome.rows.len(), kinds.len());
        for (row, kind) in outcome.rows.iter().zip(kinds) {
            assert_eq!(row.attack, kind);
        }

        // a clean entry after an attacked one still passes the parity checks
        let clean = &outcome.rows[1];
        assert_eq!(clean.perturbed, 0);
        assert!(clean.checks.fast_ok && clean.checks.full_ok);

        for row in [&outcome.rows[0], &outcome.rows[2], &outcome.rows[3]] {
            assert!(row.perturbed > 0, "{}", row.attack);
            assert!(!row.checks.full_ok, "{}", row.attack);
            assert!(!row.checks.passed(), "{}", row.attack);
        }
    }

    #[test]
    fn test_battery_covers_every_attack() {
        let dir = tempfile::tempdir().unwrap();
        run_lock(&quick_config(dir.path())).unwrap();
        let args = BatteryArgs {
            art: dir.path().to_path_buf(),
            tuning: quick_tuning(),
        };
        let outcome = run_battery(&args, &AttackKind::ALL).unwrap();
        let names: Vec<&str> = outcome.rows.iter().map(|r| r.attack.name()).collect();
        assert_eq!(names.len(), AttackKind::ALL.len());
        assert!(names.contains(&"runtime"));
    }

    #[test]
    fn test_verify_detects_republished_hash() {
        let dir = tempfile::tempdir().unwrap();
        run_lock(&quick_config(dir.path())).unwrap();
        std::fs::write(dir.path().join(PUBLIC_HASH_FILE), "ab".repeat(32)).unwrap();

        let outcome = run_verify(&verify_args(dir.path(), AttackKind::None)).unwrap();
        assert!(!outcome.public_hash_ok);
        assert!(outcome.checks.full_ok);
        assert!(!outcome.passed());
    }

    #[test]
    fn test_verify_without_artifacts_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run_verify(&verify_args(dir.path(), AttackKind::None)).is_err());
    }
}
