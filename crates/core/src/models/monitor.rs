use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::resource::ResourceId;
use super::tenant::TenantId;

/// Tenant-owned monitor definition as stored in the authoritative store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub active: bool,
    pub paused: bool,
    pub validated: bool,
    pub validation_errors: Option<serde_json::Value>,
    /// Slugs of the platform networks this monitor watches.
    pub networks: Vec<String>,
    pub addresses: serde_json::Value,
    pub match_functions: serde_json::Value,
    pub match_events: serde_json::Value,
    pub match_transactions: serde_json::Value,
    pub trigger_conditions: serde_json::Value,
    /// Ordered references to triggers of the same tenant.
    pub trigger_slugs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
}

impl Monitor {
    pub fn resource_id(&self) -> ResourceId {
        ResourceId::from(self.id)
    }

    pub fn references_trigger(&self, slug: &str) -> bool {
        self.trigger_slugs.iter().any(|s| s == slug)
    }
}
