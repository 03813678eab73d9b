//! Server configuration: command-line flags with environment fallbacks.

use clap::Args;
use std::time::Duration;

/// Flags of the `serve` subcommand.
///
/// | Flag | Variable | Default |
/// |------|----------|---------|
/// | `--port` | `LEADFLOW_PORT` | `8080` |
/// | `--db` | `LEADFLOW_DB` | `leadflow.db` |
/// | `--sweep-interval-secs` | `LEADFLOW_SWEEP_INTERVAL_SECS` | `120` |
/// | `--sweep-grace-secs` | `LEADFLOW_SWEEP_GRACE_SECS` | `30` |
/// | `--sweep-timeout-secs` | `LEADFLOW_SWEEP_TIMEOUT_SECS` | `60` |
/// | `--sweep-lease-secs` | `LEADFLOW_SWEEP_LEASE_SECS` | `300` |
/// | `--sweep-batch-limit` | `LEADFLOW_SWEEP_BATCH_LIMIT` | `500` |
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    #[arg(long, env = "LEADFLOW_PORT", default_value_t = 8080)]
    pub port: u16,
    #[arg(long, env = "LEADFLOW_DB", default_value = "leadflow.db")]
    pub db: String,
    /// Seconds between scheduled pool sweeps
    #[arg(long, env = "LEADFLOW_SWEEP_INTERVAL_SECS", default_value_t = 120)]
    pub sweep_interval_secs: u64,
    /// Delay before the first scheduled sweep after startup
    #[arg(long, env = "LEADFLOW_SWEEP_GRACE_SECS", default_value_t = 30)]
    pub sweep_grace_secs: u64,
    /// Upper bound on a single sweep run
    #[arg(long, env = "LEADFLOW_SWEEP_TIMEOUT_SECS", default_value_t = 60)]
    pub sweep_timeout_secs: u64,
    /// Lifetime of the single-flight sweep lease
    #[arg(long, env = "LEADFLOW_SWEEP_LEASE_SECS", default_value_t = 300)]
    pub sweep_lease_secs: u64,
    /// Maximum leads handled per pipeline in one sweep
    #[arg(long, env = "LEADFLOW_SWEEP_BATCH_LIMIT", default_value_t = 500)]
    pub sweep_batch_limit: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("--sweep-lease-secs ({lease}) must be longer than --sweep-timeout-secs ({timeout})")]
    LeaseShorterThanTimeout { lease: u64, timeout: u64 },
}

/// Validated server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: String,
    pub sweep_interval: Duration,
    pub sweep_grace: Duration,
    pub sweep_timeout: Duration,
    pub sweep_lease_secs: i64,
    pub sweep_batch_limit: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: "leadflow.db".to_string(),
            sweep_interval: Duration::from_secs(120),
            sweep_grace: Duration::from_secs(30),
            sweep_timeout: Duration::from_secs(60),
            sweep_lease_secs: 300,
            sweep_batch_limit: 500,
        }
    }
}

impl TryFrom<ServeArgs> for ServerConfig {
    type Error = ConfigError;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        for (name, value) in [
            ("--sweep-interval-secs", args.sweep_interval_secs),
            ("--sweep-timeout-secs", args.sweep_timeout_secs),
            ("--sweep-lease-secs", args.sweep_lease_secs),
            ("--sweep-batch-limit", args.sweep_batch_limit),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        // An expired lease could let a second sweep start next to a slow one.
        if args.sweep_lease_secs <= args.sweep_timeout_secs {
            return Err(ConfigError::LeaseShorterThanTimeout {
                lease: args.sweep_lease_secs,
                timeout: args.sweep_timeout_secs,
            });
        }

        Ok(Self {
            port: args.port,
            db_path: args.db,
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            sweep_grace: Duration::from_secs(args.sweep_grace_secs),
            sweep_timeout: Duration::from_secs(args.sweep_timeout_secs),
            sweep_lease_secs: i64::try_from(args.sweep_lease_secs).unwrap_or(i64::MAX),
            sweep_batch_limit: i64::try_from(args.sweep_batch_limit).unwrap_or(i64::MAX),
        })
    }
}
