//! Shared row mapping helpers.
//!
//! PostgreSQL stores JSON as `JSONB`, ids as `UUID` and lists as `TEXT[]`;
//! SQLite stores all three as `TEXT`. These helpers hide that difference
//! from the repositories.

use chrono::{DateTime, SubsecRound, Utc};
use confsync_core::{SyncError, SyncResult, TenantId};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::Row;
use uuid::Uuid;

pub struct MappingHelpers;

impl MappingHelpers {
    /// Commit timestamp with the precision both backends round-trip.
    pub fn commit_timestamp() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }

    pub fn parse_tenant_id(raw: String) -> SyncResult<TenantId> {
        TenantId::parse(raw)
            .map_err(|e| SyncError::Serialization(format!("invalid tenant id: {e}")))
    }

    pub fn to_json_text<T: Serialize>(value: &T) -> SyncResult<String> {
        serde_json::to_string(value)
            .map_err(|e| SyncError::Serialization(format!("failed to serialize JSON column: {e}")))
    }

    pub fn to_optional_json_text<T: Serialize>(value: Option<&T>) -> SyncResult<Option<String>> {
        value.map(Self::to_json_text).transpose()
    }

    pub fn parse_uuid_sqlite(row: &sqlx::sqlite::SqliteRow, field_name: &str) -> SyncResult<Uuid> {
        let raw: String = row.try_get(field_name)?;
        Uuid::parse_str(&raw)
            .map_err(|e| SyncError::Serialization(format!("invalid UUID in column {field_name}: {e}")))
    }

    pub fn parse_json_sqlite<T: DeserializeOwned>(
        row: &sqlx::sqlite::SqliteRow,
        field_name: &str,
    ) -> SyncResult<T> {
        let json_str: String = row.try_get(field_name)?;
        serde_json::from_str(&json_str)
            .map_err(|e| SyncError::Serialization(format!("invalid JSON in column {field_name}: {e}")))
    }

    pub fn parse_optional_json_sqlite<T: DeserializeOwned>(
        row: &sqlx::sqlite::SqliteRow,
        field_name: &str,
    ) -> SyncResult<Option<T>> {
        match row.try_get::<Option<String>, _>(field_name)? {
            Some(json_str) => serde_json::from_str(&json_str).map(Some).map_err(|e| {
                SyncError::Serialization(format!("invalid JSON in column {field_name}: {e}"))
            }),
            None => Ok(None),
        }
    }

    pub fn parse_optional_json_postgres<T: DeserializeOwned>(
        row: &sqlx::postgres::PgRow,
        field_name: &str,
    ) -> SyncResult<Option<T>> {
        match row.try_get::<Option<serde_json::Value>, _>(field_name)? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                SyncError::Serialization(format!("invalid JSON in column {field_name}: {e}"))
            }),
            None => Ok(None),
        }
    }

    pub fn to_optional_json_value<T: Serialize>(
        value: Option<&T>,
    ) -> SyncResult<Option<serde_json::Value>> {
        value
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| SyncError::Serialization(format!("failed to serialize JSON column: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_timestamp_has_microsecond_precision() {
        let ts = MappingHelpers::commit_timestamp();
        assert_eq!(ts.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn test_parse_tenant_id_rejects_delimiters() {
        assert!(MappingHelpers::parse_tenant_id("t1".into()).is_ok());
        assert!(matches!(
            MappingHelpers::parse_tenant_id("t1:x".into()),
            Err(SyncError::Serialization(_))
        ));
    }
}
