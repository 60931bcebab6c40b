//! Configuration types and loading
//!
//! TOML configuration for the two cores plus the collaborators they need
//! wired up (store location, HTTP client timeout). Fields mirror the
//! configuration surface enumerated in spec.md §6.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use allocator::Strategy;

/// Root configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub identity: IdentityConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Defaults applied to newly-constructed `CredentialManager`s absent a
/// per-identity override.
#[derive(Debug, Deserialize)]
pub struct IdentityConfig {
    pub region: String,
    pub profile_arn: Option<String>,
    #[serde(default = "default_refresh_threshold")]
    pub token_refresh_threshold: u64,
}

/// Allocator policy knobs.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    pub token_min_success_rate: f64,
    pub token_allocation_strategy: Strategy,
    pub token_health_check_interval: u64,
    pub self_use_mode: bool,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            token_min_success_rate: 0.5,
            token_allocation_strategy: Strategy::ScoreBased,
            token_health_check_interval: 300,
            self_use_mode: false,
        }
    }
}

/// Where the identity store lives and how the refresh HTTP client behaves.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("identities.json"),
            http_timeout_secs: 30,
        }
    }
}

fn default_refresh_threshold() -> u64 {
    credential::DEFAULT_REFRESH_THRESHOLD_SECS
}

fn default_http_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Resolve the configuration path: an explicit `--config` flag wins,
    /// otherwise `GATEWAY_CONFIG`, otherwise `./gateway.toml`.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("GATEWAY_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("gateway.toml")
    }
}
