use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::{SyncError, SyncResult};

pub(crate) const MAX_SEGMENT_LEN: usize = 128;

/// Resource kind tag. Determines key namespace and denormalization rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    FilterScript,
    Monitor,
    Trigger,
    Tenant,
    Platform,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Network,
        ResourceKind::FilterScript,
        ResourceKind::Monitor,
        ResourceKind::Trigger,
        ResourceKind::Tenant,
        ResourceKind::Platform,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::FilterScript => "filter_script",
            ResourceKind::Monitor => "monitor",
            ResourceKind::Trigger => "trigger",
            ResourceKind::Tenant => "tenant",
            ResourceKind::Platform => "platform",
        }
    }

    /// Kinds cached once and shared by every tenant.
    pub fn is_platform_scoped(&self) -> bool {
        matches!(
            self,
            ResourceKind::Network | ResourceKind::FilterScript | ResourceKind::Platform
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SyncError::InvalidKeySegment {
                value: s.to_string(),
                reason: "unknown resource kind".to_string(),
            })
    }
}

/// Checks that a value can be interpolated between `:` separators without
/// reaching into a neighbouring namespace or acting as a SCAN glob.
pub(crate) fn validate_segment(value: &str, reserved: &[&str]) -> SyncResult<()> {
    let invalid = |reason: &str| SyncError::InvalidKeySegment {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.len() > MAX_SEGMENT_LEN {
        return Err(invalid("longer than 128 characters"));
    }
    if !value.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(invalid("must start with an ASCII letter or digit"));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(invalid(&format!("contains forbidden character {bad:?}")));
    }
    if reserved.iter().any(|word| value.eq_ignore_ascii_case(word)) {
        return Err(invalid("reserved word"));
    }
    Ok(())
}

/// Identifier of a cached resource: a uuid for tenant-scoped resources, a
/// slug for platform-scoped ones. `active` is reserved for the index key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    pub const RESERVED: [&'static str; 1] = ["active"];

    pub fn parse(value: impl Into<String>) -> SyncResult<Self> {
        let value = value.into();
        validate_segment(&value, &Self::RESERVED)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Uuid> for ResourceId {
    fn from(id: Uuid) -> Self {
        // hyphenated uuids only contain [0-9a-f-]
        Self(id.to_string())
    }
}

impl TryFrom<String> for ResourceId {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
