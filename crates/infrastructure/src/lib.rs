//! Adapters for the authoritative store (PostgreSQL, SQLite) and the shared
//! cache medium (Redis, in-process).

pub mod cache;
pub mod database;

pub use cache::{create_cache_store, CacheHandles, CacheStats, InMemoryCacheStore, RedisCacheStore};
pub use database::{
    DatabaseManager, DatabasePool, DatabaseType, PostgresConfigRepository, SqliteConfigRepository,
};
