//! Node configuration.
//!
//! Read from an optional JSON file; every key has a default, so a missing
//! file or a partial one is fine. CLI flags override the file afterwards.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use logmesh_core::DEFAULT_MAX_ALIAS_HOPS;
use serde::{Deserialize, Serialize};

use crate::dialer::ReconnectConfig;
use crate::replicator::ReplicationConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP/JSON RPC surface binds to
    #[serde(default = "default_rpc_listen")]
    pub rpc_listen: String,

    /// Address the mesh WebSocket listener binds to
    #[serde(default = "default_mesh_listen")]
    pub mesh_listen: String,

    /// `ws://` URL other nodes can reach us at, for logging only
    #[serde(default)]
    pub advertise: Option<String>,

    /// `ws://` URLs of nodes to dial at startup
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Longest alias chain a query follows
    #[serde(default = "default_max_alias_hops")]
    pub max_alias_hops: usize,

    /// Bound on each read of a peer's log
    #[serde(default = "default_remote_read_timeout_ms")]
    pub remote_read_timeout_ms: u64,

    /// How often a connection pulls new records of a log both ends hold
    #[serde(default = "default_replication_interval_ms")]
    pub replication_interval_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

/// Seed dialer backoff, in config-file units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// None = retry forever
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_attempts: None,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectConfig {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_factor: settings.backoff_factor,
            max_attempts: settings.max_attempts,
        }
    }
}

fn default_rpc_listen() -> String {
    "127.0.0.1:50051".to_string()
}

fn default_mesh_listen() -> String {
    "0.0.0.0:7400".to_string()
}

fn default_max_alias_hops() -> usize {
    DEFAULT_MAX_ALIAS_HOPS
}

fn default_remote_read_timeout_ms() -> u64 {
    5_000
}

fn default_replication_interval_ms() -> u64 {
    1_000
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_listen: default_rpc_listen(),
            mesh_listen: default_mesh_listen(),
            advertise: None,
            seeds: Vec::new(),
            max_alias_hops: default_max_alias_hops(),
            remote_read_timeout_ms: default_remote_read_timeout_ms(),
            replication_interval_ms: default_replication_interval_ms(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl Config {
    /// Load from `path`, or defaults when no path is given or the file does
    /// not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        if !path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Reject values the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        let factor = self.reconnect.backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            bail!("reconnect.backoff_factor must be a finite number >= 1.0, got {}", factor);
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            bail!(
                "reconnect.initial_delay_ms ({}) exceeds reconnect.max_delay_ms ({})",
                self.reconnect.initial_delay_ms,
                self.reconnect.max_delay_ms
            );
        }
        if self.replication_interval_ms == 0 {
            bail!("replication_interval_ms must be positive");
        }
        Ok(())
    }

    pub fn remote_read_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_read_timeout_ms)
    }

    pub fn replication_config(&self) -> ReplicationConfig {
        ReplicationConfig {
            interval: Duration::from_millis(self.replication_interval_ms),
            pull_timeout: self.remote_read_timeout(),
        }
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::from(&self.reconnect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config.max_alias_hops, DEFAULT_MAX_ALIAS_HOPS);
        assert!(config.seeds.is_empty());

        let config = Config::load(None).unwrap();
        assert_eq!(config.rpc_listen, "127.0.0.1:50051");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"seeds":["ws://10.0.0.2:7400"],"reconnect":{"max_attempts":3}}"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.seeds, vec!["ws://10.0.0.2:7400".to_string()]);
        assert_eq!(config.mesh_listen, "0.0.0.0:7400");
        assert_eq!(config.reconnect.max_attempts, Some(3));
        assert_eq!(config.reconnect.initial_delay_ms, 1_000);

        let reconnect = config.reconnect_config();
        assert_eq!(reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(reconnect.max_attempts, Some(3));
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_backoff_factor_below_one_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        for factor in ["-2.0", "0.5"] {
            std::fs::write(
                &path,
                format!(r#"{{"reconnect":{{"backoff_factor":{}}}}}"#, factor),
            )
            .unwrap();
            let err = Config::load(Some(&path)).unwrap_err();
            assert!(format!("{:#}", err).contains("backoff_factor"));
        }

        std::fs::write(&path, r#"{"reconnect":{"backoff_factor":1.0}}"#).unwrap();
        assert!(Config::load(Some(&path)).is_ok());
    }

    #[test]
    fn test_inverted_delays_are_rejected() {
        let config = Config {
            reconnect: ReconnectSettings {
                initial_delay_ms: 10_000,
                max_delay_ms: 100,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_replication_pacing() {
        let config = Config {
            replication_interval_ms: 250,
            remote_read_timeout_ms: 3000,
            ..Default::default()
        };
        let pacing = config.replication_config();
        assert_eq!(pacing.interval, Duration::from_millis(250));
        assert_eq!(pacing.pull_timeout, Duration::from_secs(3));

        let stalled = Config {
            replication_interval_ms: 0,
            ..Default::default()
        };
        assert!(stalled.validate().is_err());
    }
}
