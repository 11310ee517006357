use confsync_core::{config::DatabaseConfig, ConfigRepository, SyncError, SyncResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::postgres::PostgresConfigRepository;
use super::sqlite::SqliteConfigRepository;

/// Authoritative store backend, chosen by the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> SyncResult<Self> {
        match url.split_once(':').map(|(scheme, _)| scheme) {
            Some("postgres" | "postgresql") => Ok(DatabaseType::PostgreSQL),
            Some("sqlite") => Ok(DatabaseType::SQLite),
            _ => Err(SyncError::config_error(format!(
                "unsupported database url scheme: {url}"
            ))),
        }
    }
}

/// Database connection pool enum
pub enum DatabasePool {
    PostgreSQL(sqlx::PgPool),
    SQLite(sqlx::SqlitePool),
}

impl DatabasePool {
    /// Create pool from configuration with automatic type detection
    pub async fn new(config: &DatabaseConfig) -> SyncResult<Self> {
        match DatabaseType::from_url(&config.url)? {
            DatabaseType::PostgreSQL => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .min_connections(config.min_connections)
                    .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
                    .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                    .max_lifetime(Duration::from_secs(1800))
                    .connect(&config.url)
                    .await?;
                Ok(DatabasePool::PostgreSQL(pool))
            }
            DatabaseType::SQLite => {
                let in_memory = config.url.contains(":memory:");
                let mut options = SqliteConnectOptions::from_str(&config.url)?
                    .create_if_missing(true)
                    .foreign_keys(true);
                if !in_memory {
                    options = options.journal_mode(SqliteJournalMode::Wal);
                }
                // every connection to an in-memory database gets its own database
                let max_connections = if in_memory { 1 } else { config.max_connections };
                let pool = SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .min_connections(1)
                    .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
                    .connect_with(options)
                    .await?;
                Ok(DatabasePool::SQLite(pool))
            }
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::PostgreSQL(_) => DatabaseType::PostgreSQL,
            DatabasePool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn health_check(&self) -> SyncResult<()> {
        match self {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DatabasePool::SQLite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        match self {
            DatabasePool::PostgreSQL(pool) => pool.close().await,
            DatabasePool::SQLite(pool) => pool.close().await,
        }
    }
}

/// Owns the authoritative store's pool and hands out repositories over it.
pub struct DatabaseManager {
    pool: DatabasePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SyncResult<Self> {
        let pool = DatabasePool::new(config).await?;
        info!("Database pool created: {:?}", pool.database_type());
        Ok(Self { pool })
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pool.database_type()
    }

    /// Runs the embedded migrations.
    pub async fn migrate(&self) -> SyncResult<()> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => PostgresConfigRepository::run_migrations(pool).await,
            DatabasePool::SQLite(pool) => SqliteConfigRepository::run_migrations(pool).await,
        }
    }

    pub async fn health_check(&self) -> SyncResult<()> {
        self.pool.health_check().await
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn config_repository(&self) -> Arc<dyn ConfigRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresConfigRepository::new(pool.clone())),
            DatabasePool::SQLite(pool) => Arc::new(SqliteConfigRepository::new(pool.clone())),
        }
    }
}
