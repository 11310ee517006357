//! Cache medium configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::ResourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    /// Process-local store for embedded and single-process deployments.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Redis connection URL
    pub redis_url: String,
    /// Connection timeout in seconds
    pub connection_timeout_seconds: u64,
    /// Namespace prepended to every key and channel
    pub key_prefix: Option<String>,
    /// Per-kind record TTLs. These are a safety net; writes are eager.
    pub ttl: CacheTtlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtlConfig {
    pub monitor_seconds: u64,
    pub trigger_seconds: u64,
    pub network_seconds: u64,
    pub filter_script_seconds: u64,
    pub tenant_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            connection_timeout_seconds: 5,
            key_prefix: None,
            ttl: CacheTtlConfig::default(),
        }
    }
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            monitor_seconds: 3600,
            trigger_seconds: 3600,
            network_seconds: 3600,
            filter_script_seconds: 3600,
            tenant_seconds: 7200,
        }
    }
}

impl CacheConfig {
    /// Validate cache configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend == CacheBackend::Redis {
            if self.redis_url.is_empty() {
                return Err(anyhow::anyhow!("Redis URL cannot be empty"));
            }

            if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
                return Err(anyhow::anyhow!(
                    "Redis URL must start with redis:// or rediss://"
                ));
            }

            if self.connection_timeout_seconds == 0 {
                return Err(anyhow::anyhow!("Connection timeout must be greater than 0"));
            }
        }

        if let Some(prefix) = &self.key_prefix {
            if prefix.is_empty()
                || !prefix
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            {
                return Err(anyhow::anyhow!(
                    "Key prefix may only contain letters, digits, '_', '-' and '.'"
                ));
            }
        }

        self.ttl.validate()
    }
}

impl CacheTtlConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let all = [
            ("monitor", self.monitor_seconds),
            ("trigger", self.trigger_seconds),
            ("network", self.network_seconds),
            ("filter_script", self.filter_script_seconds),
            ("tenant", self.tenant_seconds),
        ];
        for (name, seconds) in all {
            if seconds == 0 {
                return Err(anyhow::anyhow!("{name} TTL must be greater than 0"));
            }
        }
        Ok(())
    }

    /// TTL applied to records of `kind` and to the kind's active set.
    pub fn for_kind(&self, kind: ResourceKind) -> Duration {
        let seconds = match kind {
            ResourceKind::Monitor => self.monitor_seconds,
            ResourceKind::Trigger => self.trigger_seconds,
            ResourceKind::Network => self.network_seconds,
            ResourceKind::FilterScript => self.filter_script_seconds,
            ResourceKind::Tenant | ResourceKind::Platform => self.tenant_seconds,
        };
        Duration::from_secs(seconds)
    }
}
