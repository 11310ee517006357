use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::resource::ResourceId;
use super::tenant::TenantId;
use crate::errors::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Email,
    Webhook,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Email => "email",
            TriggerType::Webhook => "webhook",
        }
    }

    pub fn parse(value: &str) -> SyncResult<Self> {
        match value {
            "email" => Ok(TriggerType::Email),
            "webhook" => Ok(TriggerType::Webhook),
            other => Err(SyncError::Serialization(format!(
                "unknown trigger type: {other}"
            ))),
        }
    }
}

/// SMTP delivery settings. `*_type` says whether the value is plain or a
/// reference resolved by the consumer (e.g. an environment variable name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailTriggerConfig {
    pub host: String,
    pub port: i64,
    pub username_type: String,
    pub username_value: String,
    pub password_type: String,
    pub password_value: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub message_title: String,
    pub message_body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookTriggerConfig {
    pub url_type: String,
    pub url_value: String,
    pub method: String,
    pub headers: serde_json::Value,
    pub secret_type: Option<String>,
    pub secret_value: Option<String>,
    pub message_title: String,
    pub message_body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub active: bool,
    pub validated: bool,
    pub validation_errors: Option<serde_json::Value>,
    pub email_config: Option<EmailTriggerConfig>,
    pub webhook_config: Option<WebhookTriggerConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
}

impl Trigger {
    pub fn resource_id(&self) -> ResourceId {
        ResourceId::from(self.id)
    }
}
