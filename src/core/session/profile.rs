// src/core/session/profile.rs

//! Connection profiles and the provider that resolves server names to them.

use crate::core::KeydeckError;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// The network parameters of a named server.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionProfile {
    pub name: String,
    /// `host:port` of the server, or of any node of a cluster.
    pub addr: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_exec_timeout")]
    pub exec_timeout: Duration,
    /// Page size for key and entry loading. `None` uses the engine default.
    #[serde(default)]
    pub load_size: Option<usize>,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_exec_timeout() -> Duration {
    Duration::from_secs(60)
}

impl ConnectionProfile {
    /// A profile with default timeouts, for programmatic use.
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            username: None,
            password: None,
            connect_timeout: default_connect_timeout(),
            exec_timeout: default_exec_timeout(),
            load_size: None,
        }
    }

    pub fn with_load_size(mut self, load_size: usize) -> Self {
        self.load_size = Some(load_size);
        self
    }
}

/// Resolves a server name to its connection parameters. Read-only from the
/// engine's point of view; storing profiles is someone else's concern.
pub trait ProfileProvider: Send + Sync {
    fn resolve(&self, name: &str) -> Result<ConnectionProfile, KeydeckError>;
}

/// A provider over a fixed set of profiles, typically the `[[connections]]`
/// section of the configuration file.
#[derive(Debug, Default)]
pub struct StaticProfiles {
    profiles: HashMap<String, ConnectionProfile>,
}

impl StaticProfiles {
    pub fn new(profiles: impl IntoIterator<Item = ConnectionProfile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
        }
    }
}

impl ProfileProvider for StaticProfiles {
    fn resolve(&self, name: &str) -> Result<ConnectionProfile, KeydeckError> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| KeydeckError::NotFound(format!("no connection named '{name}'")))
    }
}
