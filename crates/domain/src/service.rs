//! Configuration write service.
//!
//! Request handlers call this explicitly: the authoritative store commits
//! first and the cache is synchronized afterwards. Only authoritative
//! failures are returned as errors; cache and notification failures show up
//! on the receipt's sync outcome.

use confsync_core::{
    ConfigRepository, FilterScript, Monitor, Network, ResourceKind, SyncError, SyncResult,
    Tenant, TenantId, Trigger,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::synchronizer::{SyncOutcome, Synchronizer};

/// What a write committed and how its synchronization went.
#[derive(Debug, Clone)]
pub struct WriteReceipt<T> {
    pub value: T,
    /// `None` when synchronization is disabled.
    pub sync: Option<SyncOutcome>,
}

impl<T> WriteReceipt<T> {
    pub fn warnings(&self) -> Vec<String> {
        self.sync.as_ref().map(SyncOutcome::warnings).unwrap_or_default()
    }
}

pub struct ConfigWriteService {
    repository: Arc<dyn ConfigRepository>,
    synchronizer: Arc<Synchronizer>,
    sync_enabled: bool,
}

impl ConfigWriteService {
    pub fn new(
        repository: Arc<dyn ConfigRepository>,
        synchronizer: Arc<Synchronizer>,
        sync_enabled: bool,
    ) -> Self {
        Self {
            repository,
            synchronizer,
            sync_enabled,
        }
    }

    /// `sync` is only polled when synchronization is enabled.
    async fn after_commit(&self, sync: impl Future<Output = SyncOutcome>) -> Option<SyncOutcome> {
        if !self.sync_enabled {
            return None;
        }
        let outcome = sync.await;
        for warning in outcome.warnings() {
            warn!("Cache synchronization incomplete: {}", warning);
        }
        Some(outcome)
    }

    #[instrument(skip(self, monitor), fields(tenant = %monitor.tenant_id, monitor_id = %monitor.id))]
    pub async fn save_monitor(&self, monitor: &Monitor) -> SyncResult<WriteReceipt<Monitor>> {
        let committed = self
            .repository
            .save_monitor(monitor)
            .await
            .map_err(SyncError::into_authoritative)?;
        let sync = self
            .after_commit(self.synchronizer.sync_monitor(&committed))
            .await;
        Ok(WriteReceipt {
            value: committed.value,
            sync,
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    pub async fn delete_monitor(
        &self,
        tenant: &TenantId,
        id: Uuid,
    ) -> SyncResult<WriteReceipt<Monitor>> {
        let committed = self
            .repository
            .delete_monitor(tenant, id)
            .await
            .map_err(SyncError::into_authoritative)?
            .ok_or_else(|| SyncError::not_found(ResourceKind::Monitor, id))?;
        let sync = self
            .after_commit(self.synchronizer.remove_monitor(&committed))
            .await;
        Ok(WriteReceipt {
            value: committed.value,
            sync,
        })
    }

    #[instrument(skip(self, trigger), fields(tenant = %trigger.tenant_id, trigger_id = %trigger.id))]
    pub async fn save_trigger(&self, trigger: &Trigger) -> SyncResult<WriteReceipt<Trigger>> {
        let committed = self
            .repository
            .save_trigger(trigger)
            .await
            .map_err(SyncError::into_authoritative)?;
        let sync = self
            .after_commit(self.synchronizer.sync_trigger(&committed))
            .await;
        Ok(WriteReceipt {
            value: committed.value,
            sync,
        })
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    pub async fn delete_trigger(
        &self,
        tenant: &TenantId,
        id: Uuid,
    ) -> SyncResult<WriteReceipt<Trigger>> {
        let committed = self
            .repository
            .delete_trigger(tenant, id)
            .await
            .map_err(SyncError::into_authoritative)?
            .ok_or_else(|| SyncError::not_found(ResourceKind::Trigger, id))?;
        let sync = self
            .after_commit(self.synchronizer.remove_trigger(&committed))
            .await;
        Ok(WriteReceipt {
            value: committed.value,
            sync,
        })
    }

    #[instrument(skip(self, network), fields(network = %network.slug))]
    pub async fn save_network(&self, network: &Network) -> SyncResult<WriteReceipt<Network>> {
        let committed = self
            .repository
            .save_network(network)
            .await
            .map_err(SyncError::into_authoritative)?;
        let sync = self
            .after_commit(self.synchronizer.sync_network(&committed))
            .await;
        Ok(WriteReceipt {
            value: committed.value,
            sync,
        })
    }

    #[instrument(skip(self))]
    pub async fn delete_network(&self, id: Uuid) -> SyncResult<WriteReceipt<Network>> {
        let committed = self
            .repository
            .delete_network(id)
            .await
            .map_err(SyncError::into_authoritative)?
            .ok_or_else(|| SyncError::not_found(ResourceKind::Network, id))?;
        let sync = self
            .after_commit(self.synchronizer.remove_network(&committed))
            .await;
        Ok(WriteReceipt {
            value: committed.value,
            sync,
        })
    }

    #[instrument(skip(self, script), fields(filter_script = %script.slug))]
    pub async fn save_filter_script(
        &self,
        script: &FilterScript,
    ) -> SyncResult<WriteReceipt<FilterScript>> {
        let committed = self
            .repository
            .save_filter_script(script)
            .await
            .map_err(SyncError::into_authoritative)?;
        let sync = self
            .after_commit(self.synchronizer.sync_filter_script(&committed))
            .await;
        Ok(WriteReceipt {
            value: committed.value,
            sync,
        })
    }

    #[instrument(skip(self))]
    pub async fn delete_filter_script(&self, id: Uuid) -> SyncResult<WriteReceipt<FilterScript>> {
        let committed = self
            .repository
            .delete_filter_script(id)
            .await
            .map_err(SyncError::into_authoritative)?
            .ok_or_else(|| SyncError::not_found(ResourceKind::FilterScript, id))?;
        let sync = self
            .after_commit(self.synchronizer.remove_filter_script(&committed))
            .await;
        Ok(WriteReceipt {
            value: committed.value,
            sync,
        })
    }

    #[instrument(skip(self, tenant), fields(tenant = %tenant.id))]
    pub async fn save_tenant(&self, tenant: &Tenant) -> SyncResult<WriteReceipt<Tenant>> {
        let committed = self
            .repository
            .save_tenant(tenant)
            .await
            .map_err(SyncError::into_authoritative)?;
        let sync = self
            .after_commit(self.synchronizer.sync_tenant(&committed))
            .await;
        Ok(WriteReceipt {
            value: committed.value,
            sync,
        })
    }

    /// Purges every cached key of the tenant once the delete commits.
    #[instrument(skip(self), fields(tenant = %id))]
    pub async fn delete_tenant(&self, id: &TenantId) -> SyncResult<WriteReceipt<Tenant>> {
        let committed = self
            .repository
            .delete_tenant(id)
            .await
            .map_err(SyncError::into_authoritative)?
            .ok_or_else(|| SyncError::not_found(ResourceKind::Tenant, id))?;
        let sync = self
            .after_commit(self.synchronizer.purge_tenant(id))
            .await;
        Ok(WriteReceipt {
            value: committed.value,
            sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synchronizer::SyncState;
    use confsync_core::config::{CacheConfig, SyncConfig};
    use confsync_core::CacheStore;
    use confsync_infrastructure::InMemoryCacheStore;
    use confsync_testing_utils::{
        tenant_id, CacheOp, FaultyCacheStore, MockConfigRepository, MonitorBuilder, TenantBuilder,
    };

    struct Fixture {
        repo: MockConfigRepository,
        cache: InMemoryCacheStore,
        store: FaultyCacheStore,
        service: ConfigWriteService,
    }

    fn fixture(sync_enabled: bool) -> Fixture {
        let repo = MockConfigRepository::new();
        let cache = InMemoryCacheStore::new();
        let store = FaultyCacheStore::new(Arc::new(cache.clone()));
        let synchronizer = Arc::new(Synchronizer::new(
            Arc::new(store.clone()),
            Arc::new(repo.clone()),
            &CacheConfig::default(),
            &SyncConfig::default(),
        ));
        let service = ConfigWriteService::new(Arc::new(repo.clone()), synchronizer, sync_enabled);
        Fixture {
            repo,
            cache,
            store,
            service,
        }
    }

    #[tokio::test]
    async fn test_authoritative_failure_stops_everything() {
        let f = fixture(true);
        f.repo.fail_writes(true);

        let err = f
            .service
            .save_monitor(&MonitorBuilder::new(tenant_id("t1")).build())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(f.cache.is_empty().await);
        assert!(f.store.published().is_empty());
    }

    #[tokio::test]
    async fn test_cache_outage_does_not_fail_the_write() {
        let f = fixture(true);
        f.store.fail(CacheOp::Set, true);

        let receipt = f
            .service
            .save_monitor(&MonitorBuilder::new(tenant_id("t1")).build())
            .await
            .unwrap();
        let sync = receipt.sync.as_ref().unwrap();
        assert_eq!(sync.state, SyncState::CacheFailed);
        assert_eq!(receipt.warnings().len(), 1);

        // the authoritative store kept the write
        let stored = f
            .repo
            .get_monitor(&tenant_id("t1"), receipt.value.id)
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_delete_tenant_purges_cache() {
        let f = fixture(true);
        f.service
            .save_tenant(&TenantBuilder::new("t1").build())
            .await
            .unwrap();
        f.service
            .save_monitor(&MonitorBuilder::new(tenant_id("t1")).build())
            .await
            .unwrap();

        let receipt = f.service.delete_tenant(&tenant_id("t1")).await.unwrap();
        let sync = receipt.sync.unwrap();
        assert!(sync.is_clean());
        assert_eq!(sync.purged, Some(3));
        assert!(f.cache.keys_with_prefix("tenant:t1:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_resource_is_not_found() {
        let f = fixture(true);
        let err = f
            .service
            .delete_monitor(&tenant_id("t1"), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { kind: ResourceKind::Monitor, .. }));
    }

    #[tokio::test]
    async fn test_disabled_sync_only_commits() {
        let f = fixture(false);
        let receipt = f
            .service
            .save_monitor(&MonitorBuilder::new(tenant_id("t1")).build())
            .await
            .unwrap();
        assert!(receipt.sync.is_none());
        assert!(f.cache.is_empty().await);
    }
}
