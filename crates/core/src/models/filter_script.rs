use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::resource::ResourceId;
use crate::errors::SyncResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterScript {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    /// bash, python or javascript
    pub language: String,
    pub script_path: String,
    pub description: Option<String>,
    pub arguments: serde_json::Value,
    pub timeout_ms: i64,
    pub file_size_bytes: Option<i64>,
    pub file_hash: Option<String>,
    pub active: bool,
    pub validated: bool,
    pub validation_errors: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
}

impl FilterScript {
    pub fn resource_id(&self) -> SyncResult<ResourceId> {
        ResourceId::parse(self.slug.clone())
    }
}
