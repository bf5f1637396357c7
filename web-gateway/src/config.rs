//! JSON config file (`-config <path>`, spec.md §6) plus `PORTWAY_`-prefixed env overrides
//! and CLI flags, following `local_proxy.rs`'s `clap::Parser` + `humantime::parse_duration`
//! pattern (SPEC_FULL.md §2 "Configuration"). Precedence: CLI > env > file > defaults.

use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(name = "web-gateway", about = "portway web gateway / idle scaler")]
pub struct CliArgs {
    /// Path to the JSON config file.
    #[arg(long = "config")]
    pub config: String,

    /// Switches this process into Idle Scaler mode instead of serving traffic
    /// (spec.md §1 "second mode, the Idle Scaler").
    #[arg(long = "timer", default_value_t = false)]
    pub timer: bool,
}

fn default_http_addr() -> String {
    "0.0.0.0:80".to_owned()
}

fn default_https_addr() -> String {
    "0.0.0.0:443".to_owned()
}

fn default_label_selector() -> String {
    "managedBy=portway,type=web".to_owned()
}

fn default_cluster_suffix() -> String {
    "svc.cluster.local".to_owned()
}

fn default_idle_timeout_minutes() -> u64 {
    10
}

fn default_check_interval_seconds() -> u64 {
    60
}

fn default_proxy_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_websocket_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_acme_server_url() -> String {
    instant_acme::LetsEncrypt::Production.url().to_owned()
}

fn default_redis_db() -> i64 {
    0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    #[serde(default = "default_https_addr")]
    pub https_addr: String,
    #[serde(default)]
    pub enable_https: bool,

    #[serde(default)]
    pub kube_config_path: Option<String>,
    #[serde(default = "default_label_selector")]
    pub label_selector: String,
    #[serde(default = "default_cluster_suffix")]
    pub cluster_suffix: String,

    pub email: String,
    #[serde(default = "default_acme_server_url")]
    pub acme_server_url: String,
    /// Falls back to operator-placed static challenge files on a memory-table miss
    /// (SPEC_FULL.md §4.2).
    #[serde(default)]
    pub acme_challenge_dir: Option<String>,

    #[serde(default)]
    pub wildcard_domain: Option<String>,
    #[serde(default)]
    pub cloudflare_api_token: Option<String>,
    #[serde(default)]
    pub enable_wildcard: bool,

    pub redis_addr: String,
    #[serde(default)]
    pub redis_password: Option<String>,
    #[serde(default = "default_redis_db")]
    pub redis_db: i64,

    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u64,
    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: u64,

    #[serde(default = "default_proxy_timeout", with = "humantime_serde")]
    pub proxy_read_timeout: Duration,
    #[serde(default = "default_proxy_timeout", with = "humantime_serde")]
    pub proxy_write_timeout: Duration,
    #[serde(default = "default_websocket_timeout", with = "humantime_serde")]
    pub websocket_read_timeout: Duration,
    #[serde(default = "default_websocket_timeout", with = "humantime_serde")]
    pub websocket_write_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
    #[error("enable_wildcard requires both wildcard_domain and cloudflare_api_token")]
    WildcardMissingCredentials,
    #[error("email is required for ACME account registration")]
    MissingEmail,
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

    /// `PORTWAY_`-prefixed env vars win over the file, lose to explicit CLI flags
    /// (SPEC_FULL.md §2).
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PORTWAY_REDIS_ADDR") {
            self.redis_addr = v;
        }
        if let Ok(v) = std::env::var("PORTWAY_REDIS_PASSWORD") {
            self.redis_password = Some(v);
        }
        if let Ok(v) = std::env::var("PORTWAY_CLOUDFLARE_API_TOKEN") {
            self.cloudflare_api_token = Some(v);
        }
        if let Ok(v) = std::env::var("PORTWAY_EMAIL") {
            self.email = v;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.email.trim().is_empty() {
            return Err(ConfigError::MissingEmail);
        }
        if self.enable_wildcard && (self.wildcard_domain.is_none() || self.cloudflare_api_token.is_none()) {
            return Err(ConfigError::WildcardMissingCredentials);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> String {
        serde_json::json!({
            "email": "ops@example.test",
            "redis_addr": "localhost:6379",
        })
        .to_string()
    }

    #[test]
    fn defaults_fill_unset_fields() {
        let config: Config = serde_json::from_str(&minimal_json()).unwrap();
        assert_eq!(config.http_addr, "0.0.0.0:80");
        assert_eq!(config.idle_timeout_minutes, 10);
        assert_eq!(config.check_interval_seconds, 60);
        assert_eq!(config.websocket_read_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn wildcard_without_credentials_is_rejected() {
        let mut config: Config = serde_json::from_str(&minimal_json()).unwrap();
        config.enable_wildcard = true;
        assert!(matches!(config.validate(), Err(ConfigError::WildcardMissingCredentials)));
    }

    #[test]
    fn missing_email_is_rejected() {
        let config = Config { email: String::new(), ..serde_json::from_str(&minimal_json()).unwrap() };
        assert!(matches!(config.validate(), Err(ConfigError::MissingEmail)));
    }
}
