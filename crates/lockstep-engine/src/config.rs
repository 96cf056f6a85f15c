//! Configuration loading and typed config structures for the engine.
//!
//! The canonical configuration lives in `lockstep-config.yaml` at the
//! project root. This module defines strongly-typed structs that mirror
//! the YAML structure, and provides a loader that reads the file and
//! applies environment overrides.

use std::path::Path;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `lockstep-config.yaml`. Every section has
/// defaults, so a missing file yields a small local demo run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Run shape: steps, runners, population size.
    #[serde(default)]
    pub simulation: SimulationSettings,

    /// Placement strategy selection.
    #[serde(default)]
    pub balancer: BalancerSettings,

    /// State stores to run as participants.
    #[serde(default = "default_stores")]
    pub stores: Vec<StoreSettings>,

    /// Transport the participants communicate over.
    #[serde(default)]
    pub fabric: FabricSettings,
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// The `NATS_URL` environment variable overrides `fabric.nats_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.fabric.apply_env_overrides();
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationSettings::default(),
            balancer: BalancerSettings::default(),
            stores: default_stores(),
            fabric: FabricSettings::default(),
        }
    }
}

/// Run shape settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimulationSettings {
    /// Number of lockstep rounds to run.
    #[serde(default = "default_steps")]
    pub steps: u64,

    /// Number of runner participants.
    #[serde(default = "default_runners")]
    pub runners: u32,

    /// Walkers spawned at bootstrap.
    #[serde(default = "default_agents")]
    pub agents: u64,

    /// Random seed for reproducibility.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            runners: default_runners(),
            agents: default_agents(),
            seed: default_seed(),
        }
    }
}

/// Placement strategy settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BalancerSettings {
    /// Strategy name: `greedy` or `random`.
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

impl Default for BalancerSettings {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
        }
    }
}

/// One state store participant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreSettings {
    /// Store name, matched against update routing.
    pub name: String,

    /// Backend kind: `memory` or `jsonl`.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Output path for the `jsonl` backend.
    #[serde(default)]
    pub path: Option<String>,

    /// Conflict policy name: `last_write_wins` or `append`.
    #[serde(default = "default_policy")]
    pub policy: String,
}

/// Transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FabricSettings {
    /// Transport mode: `local` or `nats`.
    #[serde(default = "default_fabric_mode")]
    pub mode: String,

    /// NATS server URL, used when `mode` is `nats`.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Subject prefix isolating this run on a shared server.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl FabricSettings {
    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("NATS_URL")
            && !url.is_empty()
        {
            self.nats_url = url;
        }
    }
}

impl Default for FabricSettings {
    fn default() -> Self {
        Self {
            mode: default_fabric_mode(),
            nats_url: default_nats_url(),
            prefix: default_prefix(),
        }
    }
}

fn default_steps() -> u64 {
    10
}

fn default_runners() -> u32 {
    2
}

fn default_agents() -> u64 {
    8
}

fn default_seed() -> u64 {
    42
}

fn default_strategy() -> String {
    "greedy".to_owned()
}

fn default_backend() -> String {
    "memory".to_owned()
}

fn default_policy() -> String {
    "last_write_wins".to_owned()
}

fn default_fabric_mode() -> String {
    "local".to_owned()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_owned()
}

fn default_prefix() -> String {
    "lockstep".to_owned()
}

fn default_stores() -> Vec<StoreSettings> {
    vec![StoreSettings {
        name: "position".to_owned(),
        backend: default_backend(),
        path: None,
        policy: default_policy(),
    }]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = EngineConfig::parse("{}").unwrap();
        assert_eq!(config.simulation.steps, 10);
        assert_eq!(config.simulation.runners, 2);
        assert_eq!(config.balancer.strategy, "greedy");
        assert_eq!(config.fabric.mode, "local");
        assert_eq!(config.stores.len(), 1);
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn sections_parse_with_partial_keys() {
        let yaml = r"
simulation:
  steps: 3
  runners: 4
balancer:
  strategy: random
stores:
  - name: position
    backend: jsonl
    path: out/position.jsonl
    policy: append
fabric:
  mode: nats
  prefix: sim7
";
        let config = EngineConfig::parse(yaml).unwrap();
        assert_eq!(config.simulation.steps, 3);
        assert_eq!(config.simulation.runners, 4);
        assert_eq!(config.simulation.agents, 8);
        assert_eq!(config.balancer.strategy, "random");
        let store = config.stores.first().unwrap();
        assert_eq!(store.backend, "jsonl");
        assert_eq!(store.policy, "append");
        assert_eq!(config.fabric.mode, "nats");
        assert_eq!(config.fabric.prefix, "sim7");
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        assert!(EngineConfig::parse("simulation: [not a map").is_err());
    }
}
