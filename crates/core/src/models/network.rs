use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::resource::ResourceId;
use crate::errors::SyncResult;

/// Blockchain network definition shared by every tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    /// EVM, Stellar or Midnight
    pub network_type: String,
    pub chain_id: Option<i64>,
    pub network_passphrase: Option<String>,
    pub rpc_urls: serde_json::Value,
    pub block_time_ms: i64,
    pub confirmation_blocks: i64,
    pub cron_schedule: String,
    pub max_past_blocks: Option<i64>,
    pub store_blocks: bool,
    pub description: Option<String>,
    pub active: bool,
    pub validated: bool,
    pub validation_errors: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
}

impl Network {
    /// Platform resources are addressed by slug.
    pub fn resource_id(&self) -> SyncResult<ResourceId> {
        ResourceId::parse(self.slug.clone())
    }
}
