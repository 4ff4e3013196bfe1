//! Coordinator configuration.
//!
//! The coordinator is off unless
//! `feature-toggles.persistence.enable-anti-deadlock-transactions` is set.
//! Values come from a TOML document or from `TXOFFLOAD_*` environment
//! variables; anything unset keeps its default.

use std::env;

use serde::Deserialize;
use thiserror::Error;

pub const ENV_ENABLED: &str = "TXOFFLOAD_ENABLE_ANTI_DEADLOCK_TRANSACTIONS";
pub const ENV_OFFLOAD_THREADS: &str = "TXOFFLOAD_OFFLOAD_THREADS";
pub const ENV_OFFLOAD_THREAD_NAME: &str = "TXOFFLOAD_OFFLOAD_THREAD_NAME";

const DEFAULT_OFFLOAD_THREADS: usize = 64;
const DEFAULT_OFFLOAD_THREAD_NAME: &str = "txoffload-blocking";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("malformed configuration document: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Coordinator tuning knobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Reroute suspendable transactional calls through the offload executor.
    pub enabled: bool,
    /// Threads of the blocking offload executor. Independent of the computation pool.
    pub offload_threads: usize,
    pub offload_thread_name: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            offload_threads: DEFAULT_OFFLOAD_THREADS,
            offload_thread_name: DEFAULT_OFFLOAD_THREAD_NAME.to_string(),
        }
    }
}

impl CoordinatorConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_offload_threads(mut self, threads: usize) -> Self {
        self.offload_threads = threads;
        self
    }

    /// Parses a TOML document laid out like the service properties:
    ///
    /// ```toml
    /// [feature-toggles.persistence]
    /// enable-anti-deadlock-transactions = true
    ///
    /// [offload]
    /// threads = 32
    /// ```
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(document)?;
        Ok(file.into())
    }

    /// Reads `TXOFFLOAD_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_ENABLED) {
            config.enabled = parse_bool(&value).ok_or(ConfigError::InvalidValue {
                key: ENV_ENABLED,
                value,
            })?;
        }
        if let Some(value) = lookup(ENV_OFFLOAD_THREADS) {
            config.offload_threads = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: ENV_OFFLOAD_THREADS,
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup(ENV_OFFLOAD_THREAD_NAME) {
            config.offload_thread_name = value;
        }
        Ok(config)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct ConfigFile {
    feature_toggles: FeatureToggles,
    offload: OffloadSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct FeatureToggles {
    persistence: PersistenceToggles,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct PersistenceToggles {
    enable_anti_deadlock_transactions: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct OffloadSection {
    threads: usize,
    thread_name: String,
}

impl Default for OffloadSection {
    fn default() -> Self {
        Self {
            threads: DEFAULT_OFFLOAD_THREADS,
            thread_name: DEFAULT_OFFLOAD_THREAD_NAME.to_string(),
        }
    }
}

impl From<ConfigFile> for CoordinatorConfig {
    fn from(file: ConfigFile) -> Self {
        Self {
            enabled: file
                .feature_toggles
                .persistence
                .enable_anti_deadlock_transactions,
            offload_threads: file.offload.threads,
            offload_thread_name: file.offload.thread_name,
        }
    }
}
