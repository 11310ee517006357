//! Full cache rebuild from the authoritative store.
//!
//! Used on cold start and as an operator recovery action. Records go
//! through the same [`RecordBuilder`] as the write-through path. The rebuild
//! takes no part in the synchronizer's ordering; a concurrent live write
//! and a rebuild both write complete records, so the later writer wins and
//! the next write or rebuild converges.

use confsync_core::{
    config::{CacheConfig, CacheTtlConfig, SyncConfig},
    keys, CacheStore, ConfigRepository, ResourceId, ResourceKind, SyncError, SyncResult, Tenant,
    TenantId, TenantScope,
};
use metrics::counter;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use crate::publisher::{rebuild_event, EventPublisher};
use crate::record_builder::{BuiltRecord, RecordBuilder};
use crate::timeouts::bounded;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub tenants: usize,
    pub records_written: usize,
    pub stale_keys_removed: usize,
    /// Records, keys or events that could not be written. Never aborts the rebuild.
    pub failures: usize,
}

impl RebuildReport {
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }

    fn merge(&mut self, other: RebuildReport) {
        self.tenants += other.tenants;
        self.records_written += other.records_written;
        self.stale_keys_removed += other.stale_keys_removed;
        self.failures += other.failures;
    }
}

impl fmt::Display for RebuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tenants={} records_written={} stale_keys_removed={} failures={}",
            self.tenants, self.records_written, self.stale_keys_removed, self.failures
        )
    }
}

/// State of one scope while it is being rebuilt.
struct ScopePass {
    scope: TenantScope,
    /// Keys under the scope's prefix when the pass started.
    existing: HashSet<String>,
    /// Keys that still correspond to a resource; everything else in
    /// `existing` is stale.
    live_keys: HashSet<String>,
    /// Index key -> (kind, members) for the active sets this pass rewrites.
    indexes: BTreeMap<String, (ResourceKind, BTreeSet<String>)>,
    report: RebuildReport,
}

impl ScopePass {
    fn new(scope: TenantScope, kinds: &[ResourceKind]) -> Self {
        let indexes = kinds
            .iter()
            .map(|kind| {
                (
                    keys::active_set_key(&scope, *kind),
                    (*kind, BTreeSet::new()),
                )
            })
            .collect();
        Self {
            scope,
            existing: HashSet::new(),
            live_keys: HashSet::new(),
            indexes,
            report: RebuildReport::default(),
        }
    }

    fn scope_label(&self) -> &'static str {
        if self.scope.is_platform() {
            "platform"
        } else {
            "tenant"
        }
    }

    /// Marks `key` live and indexes `id`. An active-set member always has
    /// its record in the cache.
    fn keep(&mut self, key: String, index_key: &str, id: &ResourceId) {
        self.live_keys.insert(key);
        if let Some((_, members)) = self.indexes.get_mut(index_key) {
            members.insert(id.to_string());
        }
    }

    /// A fresh record could not be written; the cached one, if any, stays.
    fn keep_previous(&mut self, key: String, index_key: &str, id: &ResourceId) {
        if self.existing.contains(&key) {
            self.keep(key, index_key, id);
        }
    }

    fn failed(&mut self) {
        self.report.failures += 1;
        counter!("confsync_rebuild_records_total", "scope" => self.scope_label(), "result" => "failed")
            .increment(1);
    }
}

pub struct CacheRebuilder {
    repository: Arc<dyn ConfigRepository>,
    store: Arc<dyn CacheStore>,
    publisher: EventPublisher,
    ttl: CacheTtlConfig,
    cache_timeout: Duration,
}

impl CacheRebuilder {
    pub fn new(
        store: Arc<dyn CacheStore>,
        repository: Arc<dyn ConfigRepository>,
        cache: &CacheConfig,
        sync: &SyncConfig,
    ) -> Self {
        Self {
            publisher: EventPublisher::new(store.clone(), sync),
            repository,
            store,
            ttl: cache.ttl.clone(),
            cache_timeout: sync.cache_timeout(),
        }
    }

    /// Platform resources first, then every tenant. Keys of tenants that no
    /// longer exist are removed.
    ///
    /// Fails only when the authoritative store cannot list what to rebuild.
    #[instrument(skip(self))]
    pub async fn rebuild_all(&self) -> SyncResult<RebuildReport> {
        let started = Instant::now();
        info!("Starting full cache rebuild");

        let tenants = self.repository.list_tenants().await?;
        let mut report = self.rebuild_platform(&tenants).await?;

        for tenant in &tenants {
            match self.rebuild_tenant_scope(tenant).await {
                Ok(tenant_report) => report.merge(tenant_report),
                Err(e) => {
                    warn!("Failed to rebuild tenant {}: {}", tenant.id, e);
                    report.failures += 1;
                }
            }
        }

        let known: HashSet<&str> = tenants.iter().map(|t| t.id.as_str()).collect();
        report.merge(self.remove_orphaned_tenants(&known).await);

        info!("Cache rebuild finished in {:?}: {}", started.elapsed(), report);
        Ok(report)
    }

    /// Rebuilds one tenant and re-registers it in the tenant registry.
    #[instrument(skip(self), fields(tenant = %tenant_id))]
    pub async fn rebuild_tenant(&self, tenant_id: &TenantId) -> SyncResult<RebuildReport> {
        let tenant = self
            .repository
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| SyncError::not_found(ResourceKind::Tenant, tenant_id))?;

        let mut report = self.rebuild_tenant_scope(&tenant).await?;

        let registry = keys::active_set_key(&TenantScope::Platform, ResourceKind::Tenant);
        let ttl = self.ttl.for_kind(ResourceKind::Tenant);
        let operation = format!("SADD {registry}");
        let added = self.store.set_add(&registry, tenant_id.as_str(), Some(ttl));
        if let Err(e) = bounded(self.cache_timeout, &operation, added).await {
            warn!("Failed to register tenant {} in {}: {}", tenant_id, registry, e);
            report.failures += 1;
        }

        info!("Tenant {} cache rebuilt: {}", tenant_id, report);
        Ok(report)
    }

    async fn rebuild_platform(&self, tenants: &[Tenant]) -> SyncResult<RebuildReport> {
        let networks = self.repository.list_networks().await?;
        let scripts = self.repository.list_filter_scripts().await?;

        let mut pass = ScopePass::new(
            TenantScope::Platform,
            &[
                ResourceKind::Network,
                ResourceKind::FilterScript,
                ResourceKind::Tenant,
            ],
        );
        self.list_existing(keys::PLATFORM_PREFIX, &mut pass).await;

        for network in &networks {
            let previous = network.resource_id().ok().map(|id| (ResourceKind::Network, id));
            self.write(&mut pass, previous, RecordBuilder::build_network(network))
                .await;
        }
        for script in &scripts {
            let previous = script.resource_id().ok().map(|id| (ResourceKind::FilterScript, id));
            self.write(&mut pass, previous, RecordBuilder::build_filter_script(script))
                .await;
        }

        // tenant records live under their own prefix; only the registry is platform-scoped
        let registry = keys::active_set_key(&TenantScope::Platform, ResourceKind::Tenant);
        if let Some((_, members)) = pass.indexes.get_mut(&registry) {
            members.extend(tenants.iter().map(|t| t.id.to_string()));
        }

        Ok(self.finish(pass).await)
    }

    async fn rebuild_tenant_scope(&self, tenant: &Tenant) -> SyncResult<RebuildReport> {
        let scope = TenantScope::Tenant(tenant.id.clone());
        let monitors = self.repository.list_monitors(&tenant.id).await?;
        let triggers = self.repository.list_triggers(&tenant.id).await?;

        let mut pass = ScopePass::new(scope.clone(), &[ResourceKind::Monitor, ResourceKind::Trigger]);
        pass.report.tenants = 1;
        self.list_existing(&keys::tenant_prefix(&tenant.id), &mut pass)
            .await;

        // the tenant's own record is indexed by the platform registry
        let own = ResourceId::parse(tenant.id.as_str())
            .ok()
            .map(|id| (ResourceKind::Tenant, id));
        self.write(&mut pass, own, RecordBuilder::build_tenant(tenant))
            .await;

        for trigger in &triggers {
            let previous = Some((ResourceKind::Trigger, trigger.resource_id()));
            self.write(&mut pass, previous, RecordBuilder::build_trigger(trigger))
                .await;
        }
        for monitor in &monitors {
            let previous = Some((ResourceKind::Monitor, monitor.resource_id()));
            self.write(
                &mut pass,
                previous,
                RecordBuilder::build_monitor_with(monitor, &triggers),
            )
            .await;
        }

        Ok(self.finish(pass).await)
    }

    async fn list_existing(&self, prefix: &str, pass: &mut ScopePass) {
        let operation = format!("SCAN {prefix}*");
        match bounded(self.cache_timeout, &operation, self.store.keys_with_prefix(prefix)).await {
            Ok(keys) => pass.existing = keys.into_iter().collect(),
            Err(e) => {
                // without a listing nothing can be judged stale
                warn!("Failed to list keys under {}: {}", prefix, e);
                pass.failed();
            }
        }
    }

    /// Writes a freshly built record. `previous` names the resource when the
    /// build fails, so its cached record and index entry can be kept.
    async fn write(
        &self,
        pass: &mut ScopePass,
        previous: Option<(ResourceKind, ResourceId)>,
        built: SyncResult<BuiltRecord>,
    ) {
        let record = match built {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping record in {} rebuild: {}", pass.scope, e);
                pass.failed();
                if let Some((kind, id)) = previous {
                    let key = keys::record_key(&pass.scope, kind, &id);
                    let index_key = keys::active_set_key(&pass.scope, kind);
                    pass.keep_previous(key, &index_key, &id);
                }
                return;
            }
        };

        let ttl = self.ttl.for_kind(record.kind);
        let operation = format!("SET {}", record.key);
        match bounded(
            self.cache_timeout,
            &operation,
            self.store.set(&record.key, &record.payload, ttl),
        )
        .await
        {
            Ok(()) => {
                pass.keep(record.key, &record.index_key, &record.id);
                pass.report.records_written += 1;
                counter!("confsync_rebuild_records_total", "scope" => pass.scope_label(), "result" => "written")
                    .increment(1);
            }
            Err(e) => {
                warn!("Failed to write {} during rebuild: {}", record.key, e);
                pass.failed();
                pass.keep_previous(record.key, &record.index_key, &record.id);
            }
        }
    }

    /// Deletes stale keys, rewrites the active sets, then announces the rebuild.
    async fn finish(&self, mut pass: ScopePass) -> RebuildReport {
        let existing = std::mem::take(&mut pass.existing);
        for key in existing {
            if pass.live_keys.contains(&key) || pass.indexes.contains_key(&key) {
                continue;
            }
            let operation = format!("DEL {key}");
            match bounded(self.cache_timeout, &operation, self.store.delete(&key)).await {
                Ok(_) => pass.report.stale_keys_removed += 1,
                Err(e) => {
                    warn!("Failed to remove stale key {}: {}", key, e);
                    pass.failed();
                }
            }
        }

        let indexes = std::mem::take(&mut pass.indexes);
        for (index_key, (kind, members)) in indexes {
            let members: Vec<String> = members.into_iter().collect();
            let ttl = self.ttl.for_kind(kind);
            let operation = format!("REPLACE {index_key}");
            let replaced = self.store.set_replace(&index_key, &members, Some(ttl));
            if let Err(e) = bounded(self.cache_timeout, &operation, replaced).await {
                warn!("Failed to rewrite index {}: {}", index_key, e);
                pass.failed();
            }
        }

        let event = rebuild_event(&pass.scope, pass.report.records_written);
        if let Err(e) = self.publisher.publish(&event).await {
            warn!("Failed to publish rebuild of {}: {}", pass.scope, e);
            pass.report.failures += 1;
        }

        pass.report
    }

    /// Tenants whose keys are cached but which no longer exist.
    async fn remove_orphaned_tenants(&self, known: &HashSet<&str>) -> RebuildReport {
        let mut report = RebuildReport::default();
        let operation = format!("SCAN {}*", keys::TENANT_PREFIX);
        let cached = match bounded(
            self.cache_timeout,
            &operation,
            self.store.keys_with_prefix(keys::TENANT_PREFIX),
        )
        .await
        {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Failed to list tenant keys: {}", e);
                report.failures += 1;
                return report;
            }
        };

        let orphaned: BTreeSet<TenantId> = cached
            .iter()
            .filter_map(|key| key.strip_prefix(keys::TENANT_PREFIX))
            .filter_map(|rest| rest.split(':').next())
            .filter(|tenant| !known.contains(tenant))
            .filter_map(|tenant| TenantId::parse(tenant).ok())
            .collect();

        for tenant in orphaned {
            let prefix = keys::tenant_prefix(&tenant);
            let operation = format!("DELETE {prefix}*");
            match bounded(self.cache_timeout, &operation, self.store.delete_prefix(&prefix)).await {
                Ok(removed) => {
                    info!("Removed {} cached keys of deleted tenant {}", removed, tenant);
                    report.stale_keys_removed += removed;
                }
                Err(e) => {
                    warn!("Failed to remove keys of deleted tenant {}: {}", tenant, e);
                    report.failures += 1;
                    continue;
                }
            }

            let event = rebuild_event(&TenantScope::Tenant(tenant.clone()), 0);
            if let Err(e) = self.publisher.publish(&event).await {
                warn!("Failed to publish rebuild of {}: {}", tenant, e);
                report.failures += 1;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synchronizer::Synchronizer;
    use confsync_core::{CacheStoreExt, ChangeEvent, ChangeEventType, Committed};
    use confsync_infrastructure::InMemoryCacheStore;
    use confsync_testing_utils::{
        tenant_id, CacheOp, FaultyCacheStore, FilterScriptBuilder, MockConfigRepository,
        MonitorBuilder, NetworkBuilder, TenantBuilder, TriggerBuilder,
    };

    struct Fixture {
        repo: MockConfigRepository,
        cache: InMemoryCacheStore,
        store: FaultyCacheStore,
        rebuilder: CacheRebuilder,
    }

    fn fixture() -> Fixture {
        let repo = MockConfigRepository::new();
        let cache = InMemoryCacheStore::new();
        let store = FaultyCacheStore::new(Arc::new(cache.clone()));
        let rebuilder = CacheRebuilder::new(
            Arc::new(store.clone()),
            Arc::new(repo.clone()),
            &CacheConfig::default(),
            &SyncConfig::default(),
        );
        Fixture {
            repo,
            cache,
            store,
            rebuilder,
        }
    }

    async fn seed(repo: &MockConfigRepository) -> (Committed<Tenant>, Committed<confsync_core::Monitor>) {
        let tenant = repo.save_tenant(&TenantBuilder::new("t1").build()).await.unwrap();
        repo.save_network(&NetworkBuilder::new("ethereum-mainnet").build())
            .await
            .unwrap();
        repo.save_filter_script(&FilterScriptBuilder::new("large-only").build())
            .await
            .unwrap();
        repo.save_trigger(&TriggerBuilder::email(tenant_id("t1"), "email-ops").build())
            .await
            .unwrap();
        let monitor = repo
            .save_monitor(
                &MonitorBuilder::new(tenant_id("t1"))
                    .with_trigger_slugs(&["email-ops", "gone"])
                    .build(),
            )
            .await
            .unwrap();
        (tenant, monitor)
    }

    #[tokio::test]
    async fn test_rebuild_all_populates_cache() {
        let f = fixture();
        let (_, monitor) = seed(&f.repo).await;

        let report = f.rebuilder.rebuild_all().await.unwrap();
        assert!(report.is_clean(), "{report}");
        assert_eq!(report.tenants, 1);
        // network, filter script, tenant, trigger, monitor
        assert_eq!(report.records_written, 5);

        assert_eq!(
            f.cache.set_members("platform:network:active").await.unwrap(),
            vec!["ethereum-mainnet"]
        );
        assert_eq!(
            f.cache.set_members("platform:tenant:active").await.unwrap(),
            vec!["t1"]
        );
        assert_eq!(
            f.cache.set_members("tenant:t1:monitor:active").await.unwrap(),
            vec![monitor.value.id.to_string()]
        );
        assert!(f.cache.get("tenant:t1:tenant:t1").await.unwrap().is_some());

        let invalidations: Vec<_> = f
            .store
            .published()
            .iter()
            .map(|m| ChangeEvent::from_payload(&m.payload).unwrap())
            .filter(|e| e.event_type == ChangeEventType::Invalidate)
            .map(|e| e.tenant_scope.to_string())
            .collect();
        // platform once, tenant on the tenant kind channel and its own channel
        assert_eq!(invalidations, vec!["platform", "t1", "t1"]);
    }

    #[tokio::test]
    async fn test_rebuild_matches_write_through() {
        let f = fixture();
        let (tenant, monitor) = seed(&f.repo).await;

        let sync = Synchronizer::new(
            Arc::new(f.cache.clone()),
            Arc::new(f.repo.clone()),
            &CacheConfig::default(),
            &SyncConfig::default(),
        );
        sync.sync_tenant(&tenant).await;
        sync.sync_monitor(&monitor).await;
        let key = format!("tenant:t1:monitor:{}", monitor.value.id);
        let via_sync = f.cache.get(&key).await.unwrap();
        let tenant_via_sync = f.cache.get("tenant:t1:tenant:t1").await.unwrap();

        f.rebuilder.rebuild_all().await.unwrap();
        assert_eq!(f.cache.get(&key).await.unwrap(), via_sync);
        assert_eq!(
            f.cache.get("tenant:t1:tenant:t1").await.unwrap(),
            tenant_via_sync
        );
    }

    #[tokio::test]
    async fn test_stale_keys_are_removed() {
        let f = fixture();
        let (_, monitor) = seed(&f.repo).await;
        f.rebuilder.rebuild_all().await.unwrap();

        f.repo
            .delete_monitor(&tenant_id("t1"), monitor.value.id)
            .await
            .unwrap();
        f.cache
            .set("platform:network:retired", b"{}", Duration::from_secs(60))
            .await
            .unwrap();

        let report = f.rebuilder.rebuild_all().await.unwrap();
        assert_eq!(report.stale_keys_removed, 2);
        assert!(f
            .cache
            .get(&format!("tenant:t1:monitor:{}", monitor.value.id))
            .await
            .unwrap()
            .is_none());
        assert!(f.cache.get("platform:network:retired").await.unwrap().is_none());
        assert!(f.cache.set_members("tenant:t1:monitor:active").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_orphaned_tenant_keys_are_removed() {
        let f = fixture();
        seed(&f.repo).await;
        f.cache
            .set("tenant:gone:monitor:m1", b"{}", Duration::from_secs(60))
            .await
            .unwrap();

        let report = f.rebuilder.rebuild_all().await.unwrap();
        assert_eq!(report.stale_keys_removed, 1);
        assert!(f.cache.keys_with_prefix("tenant:gone:").await.unwrap().is_empty());
        assert_eq!(f.store.published_on("config:tenant:gone:update").len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_fatal() {
        let f = fixture();
        seed(&f.repo).await;
        f.store.fail(CacheOp::Set, true);

        let report = f.rebuilder.rebuild_all().await.unwrap();
        assert_eq!(report.records_written, 0);
        assert_eq!(report.failures, 5);
        // nothing was cached, so nothing is indexed
        assert!(f.cache.set_members("tenant:t1:monitor:active").await.unwrap().is_empty());
        assert!(f.cache.set_members("platform:network:active").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unbuildable_records_keep_cached_copy_and_index_entry() {
        let f = fixture();
        let (_, monitor) = seed(&f.repo).await;
        f.rebuilder.rebuild_all().await.unwrap();

        let t1 = tenant_id("t1");
        let mut broken = f.repo.list_triggers(&t1).await.unwrap().remove(0);
        broken.email_config = None;
        f.repo.save_trigger(&broken).await.unwrap();

        let report = f.rebuilder.rebuild_all().await.unwrap();
        // the trigger itself and the monitor embedding it
        assert_eq!(report.failures, 2);

        let monitor_key = format!("tenant:t1:monitor:{}", monitor.value.id);
        assert!(f.cache.get(&monitor_key).await.unwrap().is_some());
        assert_eq!(
            f.cache.set_members("tenant:t1:monitor:active").await.unwrap(),
            vec![monitor.value.id.to_string()]
        );
        assert_eq!(
            f.cache.set_members("tenant:t1:trigger:active").await.unwrap(),
            vec![broken.id.to_string()]
        );
    }

    #[tokio::test]
    async fn test_write_failure_keeps_existing_record_indexed() {
        let f = fixture();
        let (_, monitor) = seed(&f.repo).await;
        f.rebuilder.rebuild_all().await.unwrap();

        f.store.fail(CacheOp::Set, true);
        f.rebuilder.rebuild_all().await.unwrap();

        assert_eq!(
            f.cache.set_members("tenant:t1:monitor:active").await.unwrap(),
            vec![monitor.value.id.to_string()]
        );
        assert!(f
            .cache
            .get("platform:network:ethereum-mainnet")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_alongside_live_sync_converges() {
        let f = fixture();
        let (_, monitor) = seed(&f.repo).await;
        f.rebuilder.rebuild_all().await.unwrap();

        let sync = Synchronizer::new(
            Arc::new(f.store.clone()),
            Arc::new(f.repo.clone()),
            &CacheConfig::default(),
            &SyncConfig::default(),
        );
        let mut renamed = monitor.value.clone();
        renamed.name = "renamed".to_string();
        let updated = f.repo.save_monitor(&renamed).await.unwrap();
        let created = f
            .repo
            .save_monitor(&MonitorBuilder::new(tenant_id("t1")).build())
            .await
            .unwrap();

        // every cache call yields so the rebuild and the syncs interleave
        f.store.stall(Some(Duration::from_millis(10)));
        let (report, (first, second)) = tokio::join!(f.rebuilder.rebuild_all(), async {
            (
                sync.sync_monitor(&updated).await,
                sync.sync_monitor(&created).await,
            )
        });
        f.store.stall(None);

        assert!(report.unwrap().is_clean());
        assert!(first.is_clean(), "{:?}", first);
        assert!(second.is_clean(), "{:?}", second);

        let key = format!("tenant:t1:monitor:{}", monitor.value.id);
        let record: serde_json::Value = f.cache.get_json(&key).await.unwrap().unwrap();
        assert_eq!(record["name"], "renamed");
        let created_key = format!("tenant:t1:monitor:{}", created.value.id);
        assert!(f.cache.get(&created_key).await.unwrap().is_some());

        let mut members = f.cache.set_members("tenant:t1:monitor:active").await.unwrap();
        members.sort();
        let mut expected = vec![monitor.value.id.to_string(), created.value.id.to_string()];
        expected.sort();
        assert_eq!(members, expected);
    }

    #[tokio::test]
    async fn test_rebuild_single_tenant() {
        let f = fixture();
        seed(&f.repo).await;

        let report = f.rebuilder.rebuild_tenant(&tenant_id("t1")).await.unwrap();
        assert_eq!(report.records_written, 3);
        assert_eq!(
            f.cache.set_members("platform:tenant:active").await.unwrap(),
            vec!["t1"]
        );
        // platform scope untouched
        assert!(f
            .cache
            .get("platform:network:ethereum-mainnet")
            .await
            .unwrap()
            .is_none());

        assert!(matches!(
            f.rebuilder.rebuild_tenant(&tenant_id("t9")).await,
            Err(SyncError::NotFound { .. })
        ));
    }
}
