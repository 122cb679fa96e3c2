//! Ingest configuration.
//!
//! Provides [`IngestConfig`], loaded from an optional TOML/YAML/JSON file
//! layered under `ONCHAIN__`-prefixed environment variables, e.g.
//! `ONCHAIN__RPC__URL` or `ONCHAIN__LIMITS__IO_BATCH_SIZE`. Every field has
//! a default, so an empty configuration is valid apart from credentials.

use std::fmt;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use onchain_core::constants::{
    DEFAULT_HEIGHT_BUCKET_SIZE, DEFAULT_IO_BATCH_SIZE, DEFAULT_MAX_BLOCKS_PER_RUN,
    DEFAULT_MAX_REWINDS_PER_RUN, DEFAULT_RPC_MAX_ATTEMPTS, DEFAULT_RPC_TIMEOUT_SECS,
    DEFAULT_RPC_URL, DEFAULT_ZSTD_LEVEL,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File read when no explicit path is given. Missing is fine.
pub const DEFAULT_CONFIG_PATH: &str = "config/ingest.toml";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "ONCHAIN";

/// Separator between the prefix and nested keys in environment variables.
pub const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Root of the dataset tree and the `_markers` ledger.
    pub data_root: PathBuf,
    pub height_bucket_size: u64,
    /// Parquet ZSTD level, 1..=22.
    pub zstd_level: i32,
    pub rpc: RpcConfig,
    pub limits: LimitsConfig,
    pub log: LogConfig,
    pub qa: QaConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            height_bucket_size: DEFAULT_HEIGHT_BUCKET_SIZE,
            zstd_level: DEFAULT_ZSTD_LEVEL,
            rpc: RpcConfig::default(),
            limits: LimitsConfig::default(),
            log: LogConfig::default(),
            qa: QaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub url: String,
    /// Name of the environment variable holding the RPC user.
    pub user_env: String,
    /// Name of the environment variable holding the RPC password.
    pub pass_env: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.to_string(),
            user_env: "BITCOIN_RPC_USER".to_string(),
            pass_env: "BITCOIN_RPC_PASSWORD".to_string(),
            timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            max_attempts: DEFAULT_RPC_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_blocks_per_run: u64,
    pub io_batch_size: usize,
    pub max_rewinds_per_run: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_blocks_per_run: DEFAULT_MAX_BLOCKS_PER_RUN,
            io_batch_size: DEFAULT_IO_BATCH_SIZE,
            max_rewinds_per_run: DEFAULT_MAX_REWINDS_PER_RUN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. "info" or "onchain_ingest=debug". `RUST_LOG` wins.
    pub level: String,
    /// "text" or "json".
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "text".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    /// JSON file of per-day reference figures.
    pub golden_refs: PathBuf,
    /// Days the `verify` command is expected to be run for.
    pub golden_days: Vec<NaiveDate>,
    /// Allowed deviation in percent when a reference does not carry its own.
    pub tolerance_pct: f64,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            golden_refs: PathBuf::from("config/golden_refs.json"),
            golden_days: Vec::new(),
            tolerance_pct: 0.5,
        }
    }
}

/// Basic-auth credentials for the node.
#[derive(Clone, PartialEq, Eq)]
pub struct RpcCredentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for RpcCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl IngestConfig {
    /// Load from `path` (required if given) or [`DEFAULT_CONFIG_PATH`]
    /// (optional), then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        let settings = config::Config::builder()
            .add_source(config::File::from(file.as_path()).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;
        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.height_bucket_size == 0 {
            return Err(ConfigError::NotPositive { field: "height_bucket_size" });
        }
        if !(1..=22).contains(&self.zstd_level) {
            return Err(ConfigError::CompressionLevel(self.zstd_level));
        }
        if self.limits.max_blocks_per_run == 0 {
            return Err(ConfigError::NotPositive { field: "limits.max_blocks_per_run" });
        }
        if self.limits.io_batch_size == 0 {
            return Err(ConfigError::NotPositive { field: "limits.io_batch_size" });
        }
        if self.rpc.max_attempts == 0 {
            return Err(ConfigError::NotPositive { field: "rpc.max_attempts" });
        }
        if self.rpc.timeout_secs == 0 {
            return Err(ConfigError::NotPositive { field: "rpc.timeout_secs" });
        }
        if !self.qa.tolerance_pct.is_finite() || self.qa.tolerance_pct < 0.0 {
            return Err(ConfigError::Tolerance(self.qa.tolerance_pct));
        }
        Ok(())
    }

    pub fn bucket_size(&self) -> Result<NonZeroU64, ConfigError> {
        NonZeroU64::new(self.height_bucket_size)
            .ok_or(ConfigError::NotPositive { field: "height_bucket_size" })
    }

    /// RPC credentials from the process environment.
    pub fn credentials(&self) -> Result<RpcCredentials, ConfigError> {
        self.credentials_with(|name| std::env::var(name).ok())
    }

    /// RPC credentials resolved through `lookup` (variable name to value).
    pub fn credentials_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<RpcCredentials, ConfigError> {
        let user = lookup(&self.rpc.user_env)
            .ok_or_else(|| ConfigError::MissingCredentials(self.rpc.user_env.clone()))?;
        let password = lookup(&self.rpc.pass_env)
            .ok_or_else(|| ConfigError::MissingCredentials(self.rpc.pass_env.clone()))?;
        Ok(RpcCredentials { user, password })
    }
}
