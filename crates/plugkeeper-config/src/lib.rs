//! Shared configuration for plugkeeper.
//!
//! TOML fleet profiles layered with environment overrides, and translation
//! to `plugkeeper_core::ManagerConfig`. Embedding programs pick a fleet,
//! call [`fleet_to_manager_config`], and hand the result to
//! `ManagerBuilder::from_config` along with their discovery collaborator.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use plugkeeper_core::{DiscoveryBackoff, Label, ManagerConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no fleet named '{fleet}' is configured")]
    UnknownFleet { fleet: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Fleet used when none is named explicitly.
    pub default_fleet: Option<String>,

    /// Tunables applied to every fleet that doesn't override them.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named sets of managed devices.
    #[serde(default)]
    pub fleets: HashMap<String, Fleet>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_fleet: Some("default".into()),
            defaults: Defaults::default(),
            fleets: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            io_timeout_ms: default_io_timeout_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    10
}
fn default_io_timeout_ms() -> u64 {
    5_000
}
fn default_max_concurrency() -> usize {
    8
}

/// A named group of devices managed together.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Fleet {
    /// Device labels (the name configured on each plug).
    pub labels: Vec<String>,

    /// Override the poll interval (seconds).
    pub poll_interval_secs: Option<u64>,

    /// Override the per-call device timeout (milliseconds).
    pub io_timeout_ms: Option<u64>,

    /// Override how many devices are polled at once.
    pub max_concurrency: Option<usize>,

    /// Back off discovery after failures. Omit to retry every tick.
    pub discovery_backoff: Option<BackoffConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct BackoffConfig {
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "plugkeeper", "plugkeeper").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("plugkeeper");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file. Missing files fall back to defaults;
/// `PLUGKEEPER_`-prefixed variables (nested with `__`) win over both.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("PLUGKEEPER_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation to ManagerConfig ────────────────────────────────────

/// Resolve the fleet to run: explicit name, then `default_fleet`, then
/// `"default"`.
pub fn active_fleet_name(config: &Config, requested: Option<&str>) -> String {
    requested
        .map(str::to_owned)
        .or_else(|| config.default_fleet.clone())
        .unwrap_or_else(|| "default".into())
}

/// Look up a fleet by name and build its `ManagerConfig`.
pub fn resolve_fleet(config: &Config, name: &str) -> Result<ManagerConfig, ConfigError> {
    let fleet = config
        .fleets
        .get(name)
        .ok_or_else(|| ConfigError::UnknownFleet { fleet: name.into() })?;
    fleet_to_manager_config(fleet, &config.defaults)
}

/// Build a `ManagerConfig` from a fleet, filling gaps from `defaults`.
pub fn fleet_to_manager_config(
    fleet: &Fleet,
    defaults: &Defaults,
) -> Result<ManagerConfig, ConfigError> {
    if fleet.labels.is_empty() {
        return Err(ConfigError::Validation {
            field: "labels".into(),
            reason: "a fleet must list at least one device label".into(),
        });
    }
    if let Some(blank) = fleet.labels.iter().position(|l| l.trim().is_empty()) {
        return Err(ConfigError::Validation {
            field: "labels".into(),
            reason: format!("label #{} is blank", blank + 1),
        });
    }

    let poll_interval_secs = fleet
        .poll_interval_secs
        .unwrap_or(defaults.poll_interval_secs);
    if poll_interval_secs == 0 {
        return Err(ConfigError::Validation {
            field: "poll_interval_secs".into(),
            reason: "must be at least 1".into(),
        });
    }

    let io_timeout_ms = fleet.io_timeout_ms.unwrap_or(defaults.io_timeout_ms);
    if io_timeout_ms == 0 {
        return Err(ConfigError::Validation {
            field: "io_timeout_ms".into(),
            reason: "must be at least 1".into(),
        });
    }

    let max_concurrency = fleet.max_concurrency.unwrap_or(defaults.max_concurrency);
    if max_concurrency == 0 {
        return Err(ConfigError::Validation {
            field: "max_concurrency".into(),
            reason: "must be at least 1".into(),
        });
    }

    let discovery_backoff = match fleet.discovery_backoff {
        Some(b) if b.initial_delay_secs == 0 || b.max_delay_secs < b.initial_delay_secs => {
            return Err(ConfigError::Validation {
                field: "discovery_backoff".into(),
                reason: format!(
                    "expected 0 < initial_delay_secs <= max_delay_secs, got {} and {}",
                    b.initial_delay_secs, b.max_delay_secs
                ),
            });
        }
        Some(b) => Some(DiscoveryBackoff {
            initial_delay: Duration::from_secs(b.initial_delay_secs),
            max_delay: Duration::from_secs(b.max_delay_secs),
        }),
        None => None,
    };

    Ok(ManagerConfig {
        labels: fleet.labels.iter().map(|l| Label::from(l.as_str())).collect(),
        poll_interval: Duration::from_secs(poll_interval_secs),
        io_timeout: Duration::from_millis(io_timeout_ms),
        max_concurrency,
        discovery_backoff,
    })
}
