//! Denormalized documents stored in the cache medium.
//!
//! Field order is fixed by the struct definitions and free-form JSON maps
//! serialize with sorted keys, so equal inputs encode to equal bytes.

use chrono::{DateTime, Utc};
use confsync_core::{ResourceKind, TenantId, TenantStatus, TriggerType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: TenantId,
    pub name: String,
    pub slug: String,
    pub plan: String,
    pub status: TenantStatus,
    /// Only `active` tenants are served by the consumer.
    pub enabled: bool,
    pub settings: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub network_type: String,
    pub chain_id: Option<i64>,
    pub network_passphrase: Option<String>,
    pub rpc_urls: Value,
    pub block_time_ms: i64,
    pub confirmation_blocks: i64,
    pub cron_schedule: String,
    pub max_past_blocks: Option<i64>,
    pub store_blocks: bool,
    pub description: Option<String>,
    pub active: bool,
    pub validated: bool,
    pub validation_errors: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterScriptRecord {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub language: String,
    pub script_path: String,
    pub arguments: Value,
    pub timeout_ms: i64,
    pub file_size_bytes: Option<i64>,
    pub file_hash: Option<String>,
    pub description: Option<String>,
    pub active: bool,
    pub validated: bool,
    pub validation_errors: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TriggerConfigRecord {
    Email {
        host: String,
        port: i64,
        username_type: String,
        username_value: String,
        password_type: String,
        password_value: String,
        sender: String,
        recipients: Vec<String>,
        message_title: String,
        message_body: String,
    },
    Webhook {
        url_type: String,
        url_value: String,
        method: String,
        headers: Value,
        secret_type: Option<String>,
        secret_value: Option<String>,
        message_title: String,
        message_body: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub active: bool,
    pub validated: bool,
    pub validation_errors: Option<Value>,
    pub config: TriggerConfigRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConditions {
    pub functions: Value,
    pub events: Value,
    pub transactions: Value,
}

/// A monitor with its triggers inlined, ready for the consumer without joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub active: bool,
    pub paused: bool,
    pub validated: bool,
    /// `active && !paused`
    pub enabled: bool,
    pub validation_errors: Option<Value>,
    pub networks: Vec<String>,
    pub addresses: Value,
    pub match_conditions: MatchConditions,
    pub trigger_conditions: Value,
    pub trigger_slugs: Vec<String>,
    pub triggers: Vec<TriggerRecord>,
    pub trigger_count: usize,
    /// Referenced slugs with no trigger in the tenant. Always present.
    pub missing_triggers: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
}

/// Any cached document, tagged by the kind it was built from.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheRecord {
    Tenant(TenantRecord),
    Network(NetworkRecord),
    FilterScript(FilterScriptRecord),
    Monitor(Box<MonitorRecord>),
    Trigger(TriggerRecord),
}

impl CacheRecord {
    pub fn kind(&self) -> ResourceKind {
        match self {
            CacheRecord::Tenant(_) => ResourceKind::Tenant,
            CacheRecord::Network(_) => ResourceKind::Network,
            CacheRecord::FilterScript(_) => ResourceKind::FilterScript,
            CacheRecord::Monitor(_) => ResourceKind::Monitor,
            CacheRecord::Trigger(_) => ResourceKind::Trigger,
        }
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            CacheRecord::Tenant(r) => serde_json::to_vec(r),
            CacheRecord::Network(r) => serde_json::to_vec(r),
            CacheRecord::FilterScript(r) => serde_json::to_vec(r),
            CacheRecord::Monitor(r) => serde_json::to_vec(r),
            CacheRecord::Trigger(r) => serde_json::to_vec(r),
        }
    }
}
