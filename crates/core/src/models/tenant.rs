use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::resource::validate_segment;
use crate::errors::{SyncError, SyncResult};

/// Opaque tenant identifier, validated before it can reach a key or channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// `platform` would make a tenant's scope indistinguishable from the
    /// shared scope on the wire.
    pub const RESERVED: [&'static str; 1] = ["platform"];

    pub fn parse(value: impl Into<String>) -> SyncResult<Self> {
        let value = value.into();
        validate_segment(&value, &Self::RESERVED)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Uuid> for TenantId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

impl TryFrom<String> for TenantId {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Visibility of a cached resource: shared by all tenants, or owned by one.
///
/// On the wire this is the string `platform` or the tenant id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TenantScope {
    Platform,
    Tenant(TenantId),
}

impl TenantScope {
    pub const PLATFORM: &'static str = "platform";

    pub fn tenant(&self) -> Option<&TenantId> {
        match self {
            TenantScope::Platform => None,
            TenantScope::Tenant(id) => Some(id),
        }
    }

    pub fn is_platform(&self) -> bool {
        matches!(self, TenantScope::Platform)
    }
}

impl From<TenantId> for TenantScope {
    fn from(id: TenantId) -> Self {
        TenantScope::Tenant(id)
    }
}

impl TryFrom<String> for TenantScope {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == Self::PLATFORM {
            Ok(TenantScope::Platform)
        } else {
            TenantId::parse(value).map(TenantScope::Tenant)
        }
    }
}

impl From<TenantScope> for String {
    fn from(scope: TenantScope) -> Self {
        match scope {
            TenantScope::Platform => TenantScope::PLATFORM.to_string(),
            TenantScope::Tenant(id) => id.into(),
        }
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantScope::Platform => f.write_str(Self::PLATFORM),
            TenantScope::Tenant(id) => f.write_str(id.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Deleted,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> SyncResult<Self> {
        match value {
            "active" => Ok(TenantStatus::Active),
            "suspended" => Ok(TenantStatus::Suspended),
            "deleted" => Ok(TenantStatus::Deleted),
            other => Err(SyncError::Serialization(format!(
                "unknown tenant status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub slug: String,
    pub plan: String,
    pub status: TenantStatus,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_validation() {
        assert!(TenantId::parse("t1").is_ok());
        assert!(TenantId::parse("acme-corp.eu_1").is_ok());
        assert!(TenantId::parse("t1:monitor").is_err());
        assert!(TenantId::parse("t*").is_err());
        assert!(TenantId::parse("platform").is_err());
        assert!(TenantId::parse("").is_err());
    }

    #[test]
    fn test_scope_wire_format() {
        let tenant = TenantScope::Tenant(TenantId::parse("t1").unwrap());
        assert_eq!(serde_json::to_string(&tenant).unwrap(), "\"t1\"");
        assert_eq!(
            serde_json::to_string(&TenantScope::Platform).unwrap(),
            "\"platform\""
        );

        let parsed: TenantScope = serde_json::from_str("\"platform\"").unwrap();
        assert!(parsed.is_platform());
        assert!(serde_json::from_str::<TenantScope>("\"a:b\"").is_err());
    }
}
