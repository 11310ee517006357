//! Adapters for the shared cache medium.
//!
//! Redis is the production medium; the in-memory store backs embedded
//! single-process deployments and the test suites.

pub mod memory_store;
pub mod redis_store;

pub use memory_store::InMemoryCacheStore;
pub use redis_store::RedisCacheStore;

use confsync_core::config::{CacheBackend, CacheConfig};
use confsync_core::{CacheStore, ChangeSubscriber, SyncResult};
use std::sync::Arc;
use tracing::info;

/// Cache statistics and metrics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub publishes: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        let total_ops = self.hits + self.misses + self.sets + self.deletes + self.publishes;
        if total_ops == 0 {
            0.0
        } else {
            self.errors as f64 / total_ops as f64
        }
    }
}

/// Both faces of one cache medium: the key-value side used by writers and
/// readers, and the push side used by consumers.
#[derive(Clone)]
pub struct CacheHandles {
    pub store: Arc<dyn CacheStore>,
    pub subscriber: Arc<dyn ChangeSubscriber>,
}

/// Connects to the configured backend.
pub async fn create_cache_store(config: &CacheConfig) -> SyncResult<CacheHandles> {
    match config.backend {
        CacheBackend::Redis => {
            let store = Arc::new(RedisCacheStore::new(config).await?);
            Ok(CacheHandles {
                store: store.clone(),
                subscriber: store,
            })
        }
        CacheBackend::Memory => {
            info!("Using in-process cache store");
            let store = Arc::new(InMemoryCacheStore::new());
            Ok(CacheHandles {
                store: store.clone(),
                subscriber: store,
            })
        }
    }
}
