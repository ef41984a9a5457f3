//! Environment-driven configuration for the acquisition engine daemon.
//!
//! Mirrors the CLI/environment surface described for the daemon: a handful
//! of env vars with documented defaults, plus the three on-disk directories
//! the engine writes to. Loading never fails silently: a required var that
//! is missing is a hard `anyhow::Error` at boot, same discipline the store
//! applies to a corrupt state file.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

pub const DEFAULT_PORT: u16 = 19998;
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_CACHE_DIR: &str = "./cache";
pub const DEFAULT_LOG_DIR: &str = "./logs";
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = ovh_schemas::DEFAULT_MONITOR_INTERVAL_SECS;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub port: u16,
    pub api_secret_key: Option<String>,
    pub enable_api_key_auth: bool,
    pub debug: bool,
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub log_dir: PathBuf,
    pub monitor_interval_secs: u64,
}

impl EngineConfig {
    /// Reads `PORT`, `API_SECRET_KEY`, `ENABLE_API_KEY_AUTH`, `DEBUG`, and a
    /// `MONITOR_INTERVAL_SECS` override from the process environment,
    /// applying sensible defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(v) => v.parse().with_context(|| format!("PORT={v:?} is not a valid port"))?,
            Err(_) => DEFAULT_PORT,
        };

        let enable_api_key_auth = parse_bool_env("ENABLE_API_KEY_AUTH", true)?;
        let debug = parse_bool_env("DEBUG", false)?;

        let api_secret_key = std::env::var("API_SECRET_KEY").ok();
        if enable_api_key_auth && api_secret_key.as_deref().unwrap_or("").is_empty() {
            bail!("API_SECRET_KEY is required when ENABLE_API_KEY_AUTH is true");
        }

        let monitor_interval_secs = match std::env::var("MONITOR_INTERVAL_SECS") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("MONITOR_INTERVAL_SECS={v:?} is not a valid integer"))?,
            Err(_) => DEFAULT_MONITOR_INTERVAL_SECS,
        }
        .max(ovh_schemas::MIN_MONITOR_INTERVAL_SECS);

        Ok(Self {
            port,
            api_secret_key,
            enable_api_key_auth,
            debug,
            data_dir: env_path("DATA_DIR", DEFAULT_DATA_DIR),
            cache_dir: env_path("CACHE_DIR", DEFAULT_CACHE_DIR),
            log_dir: env_path("LOG_DIR", DEFAULT_LOG_DIR),
            monitor_interval_secs,
        })
    }

    /// Creates `data_dir`, `cache_dir`, `log_dir` if they don't already
    /// exist. Called once at startup.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.data_dir, &self.cache_dir, &self.log_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create_dir_all {}", dir.display()))?;
        }
        Ok(())
    }
}

fn env_path(var: &str, default: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn parse_bool_env(var: &str, default: bool) -> Result<bool> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => bail!("{var}={other:?} is not a valid boolean"),
        },
    }
}
