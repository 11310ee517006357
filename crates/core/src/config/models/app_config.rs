use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    cache::CacheConfig, consumer::ConsumerConfig, database::DatabaseConfig,
    observability::ObservabilityConfig, sync::SyncConfig,
};

/// Process configuration, built once at startup and passed by reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub consumer: ConsumerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    pub const ENV_PREFIX: &'static str = "CONFSYNC";

    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (`CONFSYNC__SECTION__FIELD`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("Config file not found: {}", path));
            }
        } else {
            let default_paths = ["config/confsync.toml", "confsync.toml", "/etc/confsync/config.toml"];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(Self::ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("consumer.tenants")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration as TOML")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("Invalid database configuration")?;
        self.cache.validate().context("Invalid cache configuration")?;
        self.sync.validate().context("Invalid sync configuration")?;
        self.consumer.validate().context("Invalid consumer configuration")?;
        self.observability
            .validate()
            .context("Invalid observability configuration")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheBackend;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.consumer.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.cache.ttl.tenant_seconds, 7200);
        assert_eq!(config.sync.cache_timeout(), Duration::from_millis(500));
        assert_eq!(config.sync.watermark_retention(), Duration::from_secs(600));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [database]
            url = "sqlite::memory:"

            [cache]
            backend = "memory"

            [consumer]
            tenants = ["t1", "t2"]
            poll_interval_seconds = 10
            "#,
        )
        .unwrap();

        assert!(config.database.is_sqlite());
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.consumer.tenant_ids().unwrap().len(), 2);
        assert_eq!(config.consumer.poll_interval_seconds, 10);
        assert!(config.sync.rebuild_on_start);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(AppConfig::from_toml("[database]\nurl = \"mysql://localhost/db\"").is_err());
        assert!(AppConfig::from_toml("[cache]\nredis_url = \"http://localhost\"").is_err());
        assert!(AppConfig::from_toml("[consumer]\ntenants = [\"a:b\"]").is_err());
        assert!(AppConfig::from_toml("[consumer]\npoll_interval_seconds = 0").is_err());
        assert!(AppConfig::from_toml("[cache.ttl]\nmonitor_seconds = 0").is_err());
        assert!(AppConfig::from_toml("[observability]\nlog_format = \"xml\"").is_err());
        assert!(AppConfig::from_toml("[sync]\nwatermark_retention_seconds = 0").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[sync]\npublish_timeout_ms = 250\nrebuild_on_start = false").unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.sync.publish_timeout_ms, 250);
        assert!(!config.sync.rebuild_on_start);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/confsync.toml")).is_err());
    }

    #[test]
    fn test_toml_round_trip_is_loadable() {
        let toml = AppConfig::default().to_toml().unwrap();
        assert!(AppConfig::from_toml(&toml).is_ok());
    }
}
