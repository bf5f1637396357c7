//! JSON config file (`-config <path>`, spec.md §6) plus `PORTWAY_`-prefixed env
//! overrides, following `web-gateway::config`'s pattern.

use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(name = "db-gateway", about = "portway database gateway")]
pub struct CliArgs {
    /// Path to the JSON config file.
    #[arg(long = "config")]
    pub config: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3306".to_owned()
}

fn default_label_selector() -> String {
    "managedBy=portway".to_owned()
}

fn default_cluster_suffix() -> String {
    "svc.cluster.local".to_owned()
}

fn default_dial_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_connections() -> usize {
    1024
}

fn default_buffer_size() -> usize {
    64 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub kube_config_path: Option<String>,
    #[serde(default = "default_label_selector")]
    pub label_selector: String,
    #[serde(default = "default_cluster_suffix")]
    pub cluster_suffix: String,

    #[serde(default = "default_dial_timeout", with = "humantime_serde")]
    pub dial_timeout: Duration,
    #[serde(default = "default_handshake_timeout", with = "humantime_serde")]
    pub handshake_timeout: Duration,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Wraps the listener to consume a v1/v2 proxy-protocol header before the MySQL
    /// bytes (spec.md §4.3 "Optional proxy-protocol").
    #[serde(default)]
    pub enable_proxy_protocol: bool,

    /// Admin surface for `/healthz` + `/metrics` (SPEC_FULL.md §3).
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
    #[error("max_connections must be greater than zero")]
    ZeroCapacity,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
        let mut config: Config =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.to_owned(), source })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PORTWAY_LISTEN_ADDR") {
            self.listen_addr = v;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> String {
        serde_json::json!({ "redis_addr": "localhost:6379" }).to_string()
    }

    #[test]
    fn defaults_fill_unset_fields() {
        let config: Config = serde_json::from_str(&minimal_json()).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:3306");
        assert_eq!(config.dial_timeout, Duration::from_secs(1));
        assert_eq!(config.max_connections, 1024);
        assert_eq!(config.buffer_size, 64 * 1024);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config: Config = serde_json::from_str(&minimal_json()).unwrap();
        config.max_connections = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroCapacity)));
    }
}
