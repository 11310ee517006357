use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::errors::SyncResult;
use crate::models::{ResourceKind, TenantScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeEventType {
    Create,
    Update,
    Delete,
    /// Drop everything cached for the scope and re-fetch.
    Invalidate,
}

impl ChangeEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEventType::Create => "create",
            ChangeEventType::Update => "update",
            ChangeEventType::Delete => "delete",
            ChangeEventType::Invalidate => "invalidate",
        }
    }
}

impl fmt::Display for ChangeEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change notification broadcast to consumers. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_type: ChangeEventType,
    pub resource_type: ResourceKind,
    pub resource_id: String,
    pub tenant_scope: TenantScope,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ChangeEvent {
    pub fn new(
        event_type: ChangeEventType,
        resource_type: ResourceKind,
        resource_id: impl Into<String>,
        tenant_scope: TenantScope,
    ) -> Self {
        Self {
            event_type,
            resource_type,
            resource_id: resource_id.into(),
            tenant_scope,
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn to_payload(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_payload(payload: &[u8]) -> SyncResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}
