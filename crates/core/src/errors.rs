use thiserror::Error;

use crate::models::ResourceKind;

/// Errors raised by the synchronization layer.
///
/// Only [`SyncError::AuthoritativeWrite`] and [`SyncError::Database`] are fatal
/// to a caller's request. Everything produced after the authoritative commit
/// is isolated and surfaces as a warning on the sync outcome.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("authoritative write failed: {0}")]
    AuthoritativeWrite(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("denormalization failed for {kind} {id}: {reason}")]
    Denormalization {
        kind: ResourceKind,
        id: String,
        reason: String,
    },

    #[error("cache read failed: {0}")]
    CacheRead(String),

    #[error("cache write failed: {0}")]
    CacheWrite(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("cross-tenant key violation: key '{key}' is outside tenant '{tenant}'")]
    CrossTenantKeyViolation { tenant: String, key: String },

    #[error("invalid key segment '{value}': {reason}")]
    InvalidKeySegment { value: String, reason: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub fn authoritative<S: Into<String>>(msg: S) -> Self {
        Self::AuthoritativeWrite(msg.into())
    }

    pub fn cache<S: Into<String>>(msg: S) -> Self {
        Self::CacheWrite(msg.into())
    }

    pub fn cache_read<S: Into<String>>(msg: S) -> Self {
        Self::CacheRead(msg.into())
    }

    pub fn publish<S: Into<String>>(msg: S) -> Self {
        Self::Publish(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn denormalization(kind: ResourceKind, id: impl ToString, reason: impl Into<String>) -> Self {
        Self::Denormalization {
            kind,
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: ResourceKind, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Fatal errors abort the request; nothing downstream of the
    /// authoritative store is attempted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthoritativeWrite(_) | Self::Database(_))
    }

    /// Errors that stay inside the sync path and are reported as warnings.
    pub fn is_isolated(&self) -> bool {
        matches!(
            self,
            Self::Denormalization { .. }
                | Self::CacheRead(_)
                | Self::CacheWrite(_)
                | Self::Publish(_)
                | Self::Timeout(_)
                | Self::CrossTenantKeyViolation { .. }
        )
    }

    /// Turns a storage failure into the taxonomy's authoritative-write error.
    pub fn into_authoritative(self) -> Self {
        match self {
            Self::AuthoritativeWrite(_) => self,
            other => Self::AuthoritativeWrite(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
