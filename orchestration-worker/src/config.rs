//! JSON config file (`-config <path>`, spec.md §6) for the orchestration worker,
//! following the same `clap::Parser` + `PORTWAY_`-prefixed env override pattern as
//! `web-gateway::config` (SPEC_FULL.md §2).

use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(name = "orchestration-worker", about = "portway queue-driven reconciler")]
pub struct CliArgs {
    /// Path to the JSON config file.
    #[arg(long = "config")]
    pub config: String,
}

fn default_queue_name() -> String {
    "portway:deploy-queue".to_owned()
}

fn default_cluster_suffix() -> String {
    "svc.cluster.local".to_owned()
}

fn default_redis_db() -> i64 {
    0
}

fn default_crashloop_interval() -> Duration {
    Duration::from_secs(3 * 60)
}

fn default_crashloop_restart_threshold() -> i32 {
    5
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_cloud_registry_host() -> String {
    "registry.portway.internal".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub kube_config_path: Option<String>,
    #[serde(default = "default_cluster_suffix")]
    pub cluster_suffix: String,

    pub redis_addr: String,
    #[serde(default)]
    pub redis_password: Option<String>,
    #[serde(default = "default_redis_db")]
    pub redis_db: i64,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    #[serde(default = "default_crashloop_interval", with = "humantime_serde")]
    pub crashloop_sweep_interval: Duration,
    #[serde(default = "default_crashloop_restart_threshold")]
    pub crashloop_restart_threshold: i32,

    #[serde(default = "default_readiness_timeout", with = "humantime_serde")]
    pub readiness_timeout: Duration,

    /// Admin surface for `/healthz` + `/metrics` (SPEC_FULL.md §3).
    #[serde(default)]
    pub metrics_addr: Option<String>,

    /// Cloud-registry API base used to obtain pull-credential tokens (spec.md §4.4
    /// "Pull-credentials secret").
    #[serde(default)]
    pub cloud_registry_api_url: Option<String>,
    /// Registry host written into the pull secret for cloud-registry images.
    #[serde(default = "default_cloud_registry_host")]
    pub cloud_registry_host: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
        let mut config: Config =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.to_owned(), source })?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PORTWAY_REDIS_ADDR") {
            self.redis_addr = v;
        }
        if let Ok(v) = std::env::var("PORTWAY_REDIS_PASSWORD") {
            self.redis_password = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_unset_fields() {
        let json = serde_json::json!({ "redis_addr": "localhost:6379" }).to_string();
        let config: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config.queue_name, "portway:deploy-queue");
        assert_eq!(config.crashloop_restart_threshold, 5);
        assert_eq!(config.readiness_timeout, Duration::from_secs(120));
    }
}
