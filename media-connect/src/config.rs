use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::DEFAULT_DIRECTORY_URL;
use crate::discovery::DiscoverySettings;
use crate::prober::ClientIdentity;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub token: String,
    pub client_identifier: String,
    #[serde(default = "default_directory_url")]
    pub directory_url: String,
    #[serde(default = "default_product")]
    pub product: String,
    /// Read resources from this file instead of the directory service
    pub resources_file: Option<PathBuf>,
    /// Only connect to the server with this name
    pub server: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_fast_path_timeout")]
    pub fast_path_timeout_ms: u64,
    #[serde(default = "default_race_timeout")]
    pub race_timeout_ms: u64,
    #[serde(default = "default_upgrade_timeout")]
    pub upgrade_timeout_ms: u64,
    /// Prober's own per-attempt timeout, used by the refine pass
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_refine_attempts")]
    pub refine_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_directory_url() -> String {
    DEFAULT_DIRECTORY_URL.to_string()
}

fn default_product() -> String {
    "media-connect".to_string()
}

fn default_fast_path_timeout() -> u64 {
    2000
}

fn default_race_timeout() -> u64 {
    4000
}

fn default_upgrade_timeout() -> u64 {
    4000
}

fn default_probe_timeout() -> u64 {
    5000
}

fn default_refine_attempts() -> u32 {
    2
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/media-connect/endpoints.db")
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            fast_path_timeout_ms: default_fast_path_timeout(),
            race_timeout_ms: default_race_timeout(),
            upgrade_timeout_ms: default_upgrade_timeout(),
            probe_timeout_ms: default_probe_timeout(),
            refine_attempts: default_refine_attempts(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl DiscoveryConfig {
    pub fn settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            fast_path_timeout: Duration::from_millis(self.fast_path_timeout_ms),
            race_timeout: Duration::from_millis(self.race_timeout_ms),
            upgrade_timeout: Duration::from_millis(self.upgrade_timeout_ms),
            refine_attempts: self.refine_attempts,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl AccountConfig {
    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity {
            client_identifier: self.client_identifier.clone(),
            product: self.product.clone(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [account]
            token = "secret"
            client_identifier = "desk-1"
            "#,
        )
        .unwrap();

        assert_eq!(config.account.directory_url, DEFAULT_DIRECTORY_URL);
        assert_eq!(config.account.product, "media-connect");
        assert!(config.account.resources_file.is_none());
        assert_eq!(config.discovery.settings(), DiscoverySettings::default());
        assert_eq!(config.discovery.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.cache.db_path, default_db_path());
    }

    #[test]
    fn test_overrides() {
        let config: Config = toml::from_str(
            r#"
            [account]
            token = "secret"
            client_identifier = "desk-1"
            server = "Living Room"

            [discovery]
            race_timeout_ms = 6000
            refine_attempts = 3

            [cache]
            db_path = "/tmp/endpoints.db"
            "#,
        )
        .unwrap();

        let settings = config.discovery.settings();
        assert_eq!(settings.race_timeout, Duration::from_secs(6));
        assert_eq!(settings.fast_path_timeout, Duration::from_secs(2));
        assert_eq!(settings.refine_attempts, 3);
        assert_eq!(config.account.server.as_deref(), Some("Living Room"));
        assert_eq!(config.cache.db_path, PathBuf::from("/tmp/endpoints.db"));
    }

    #[test]
    fn test_missing_token_is_an_error() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [account]
            client_identifier = "desk-1"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let err = Config::load("/nonexistent/media-connect.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/media-connect.toml"));
    }
}
