// src/config.rs

//! Engine configuration: loading from TOML, defaults, and validation.

use crate::core::history::DEFAULT_HISTORY_LIMIT;
use crate::core::session::{ConnectionProfile, SessionSettings, StaticProfiles};
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Settings for the batched event emitter.
#[derive(Deserialize, Debug, Clone)]
pub struct EventsConfig {
    /// How long messages may wait before a batch is delivered.
    #[serde(with = "humantime_serde", default = "default_flush_interval")]
    pub flush_interval: Duration,
    /// Pending messages that force an early delivery.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            flush_interval: default_flush_interval(),
            max_batch: default_max_batch(),
        }
    }
}

fn default_flush_interval() -> Duration {
    Duration::from_millis(300)
}
fn default_max_batch() -> usize {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_scan_size() -> usize {
    3_000
}
fn default_load_size() -> usize {
    10_000
}
fn default_delete_batch_size() -> usize {
    crate::core::browser::DEFAULT_DELETE_BATCH
}
fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

/// The main configuration structure.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `COUNT` hint sent with every scan-family command.
    #[serde(default = "default_scan_size")]
    pub scan_size: usize,
    /// Default page size for key and entry loading.
    #[serde(default = "default_load_size")]
    pub load_size: usize,
    /// Keys removed per delete command during bulk deletes.
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,
    /// Commands kept in the command history.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default)]
    pub events: EventsConfig,
    /// Named servers the engine may connect to.
    #[serde(default)]
    pub connections: Vec<ConnectionProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            scan_size: default_scan_size(),
            load_size: default_load_size(),
            delete_batch_size: default_delete_batch_size(),
            history_limit: default_history_limit(),
            events: EventsConfig::default(),
            connections: Vec::new(),
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid configuration in '{path}'"))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.scan_size == 0 {
            return Err(anyhow!("scan_size cannot be 0"));
        }
        if self.load_size == 0 {
            return Err(anyhow!("load_size cannot be 0"));
        }
        if self.delete_batch_size == 0 {
            return Err(anyhow!("delete_batch_size cannot be 0"));
        }
        if self.history_limit == 0 {
            return Err(anyhow!("history_limit cannot be 0"));
        }
        if self.events.max_batch == 0 {
            return Err(anyhow!("events.max_batch cannot be 0"));
        }
        if self.events.flush_interval.is_zero() {
            return Err(anyhow!("events.flush_interval cannot be 0"));
        }

        let mut names = HashSet::new();
        for profile in &self.connections {
            if profile.name.trim().is_empty() {
                return Err(anyhow!("connection name cannot be empty"));
            }
            if profile.addr.trim().is_empty() {
                return Err(anyhow!("connection '{}' has no addr", profile.name));
            }
            if !names.insert(profile.name.as_str()) {
                return Err(anyhow!("duplicate connection name '{}'", profile.name));
            }
            if profile.load_size == Some(0) {
                return Err(anyhow!("connection '{}' has load_size 0", profile.name));
            }
        }

        if self.scan_size > self.load_size {
            warn!(
                "scan_size ({}) is larger than load_size ({}); pages may overshoot",
                self.scan_size, self.load_size
            );
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            load_size: self.load_size,
            scan_size: self.scan_size,
        }
    }

    /// The `[[connections]]` list as a profile provider.
    pub fn profiles(&self) -> StaticProfiles {
        StaticProfiles::new(self.connections.iter().cloned())
    }
}
