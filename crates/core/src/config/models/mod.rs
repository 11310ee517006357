pub mod app_config;
pub mod cache;
pub mod consumer;
pub mod database;
pub mod observability;
pub mod sync;

pub use app_config::AppConfig;
pub use cache::{CacheBackend, CacheConfig, CacheTtlConfig};
pub use consumer::ConsumerConfig;
pub use database::DatabaseConfig;
pub use observability::ObservabilityConfig;
pub use sync::SyncConfig;
