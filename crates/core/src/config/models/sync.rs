use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Write-through synchronizer and rebuilder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// When false, writes commit to the authoritative store only.
    pub enabled: bool,
    pub publish_enabled: bool,
    pub rebuild_on_start: bool,
    /// Periodic operator rebuild; 0 disables it.
    pub rebuild_interval_seconds: u64,
    pub cache_timeout_ms: u64,
    pub publish_timeout_ms: u64,
    /// Re-synchronize monitors when a trigger they reference changes.
    pub cascade_triggers: bool,
    /// How long an idle per-resource version watermark is remembered.
    pub watermark_retention_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            publish_enabled: true,
            rebuild_on_start: true,
            rebuild_interval_seconds: 0,
            cache_timeout_ms: 500,
            publish_timeout_ms: 500,
            cascade_triggers: true,
            watermark_retention_seconds: 600,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cache_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Cache timeout must be greater than 0"));
        }
        if self.publish_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Publish timeout must be greater than 0"));
        }
        if self.watermark_retention_seconds == 0 {
            return Err(anyhow::anyhow!("Watermark retention must be greater than 0"));
        }
        Ok(())
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn watermark_retention(&self) -> Duration {
        Duration::from_secs(self.watermark_retention_seconds)
    }

    pub fn rebuild_interval(&self) -> Option<Duration> {
        (self.rebuild_interval_seconds > 0).then(|| Duration::from_secs(self.rebuild_interval_seconds))
    }
}
