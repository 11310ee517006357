use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::TenantId;

/// Downstream consumer strategies. Push and poll run independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub push_enabled: bool,
    pub poll_enabled: bool,
    pub poll_interval_seconds: u64,
    /// Tenants to watch; empty means every tenant in the platform registry.
    pub tenants: Vec<String>,
    pub reconnect_delay_seconds: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            push_enabled: true,
            poll_enabled: true,
            poll_interval_seconds: 30,
            tenants: Vec::new(),
            reconnect_delay_seconds: 5,
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("Poll interval must be greater than 0"));
        }
        self.tenant_ids()?;
        Ok(())
    }

    pub fn tenant_ids(&self) -> anyhow::Result<Vec<TenantId>> {
        self.tenants
            .iter()
            .map(|t| TenantId::parse(t.clone()).map_err(|e| anyhow::anyhow!("{e}")))
            .collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds)
    }
}
