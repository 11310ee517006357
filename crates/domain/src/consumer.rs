//! Consumer-side strategies for keeping a local view of the cache fresh.
//!
//! Push delivers change events as they happen but may drop messages while
//! disconnected; polling re-reads whole scopes on an interval and bounds how
//! long a missed event can leave a consumer stale. Either can run alone.

use async_trait::async_trait;
use confsync_core::{
    config::ConsumerConfig, keys, CacheStore, CacheStoreExt, ChangeEvent, ChangeEventType,
    ChangeSubscriber, ResourceId, ResourceKind, SyncResult, TenantId, TenantScope,
};
use futures::StreamExt;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Every cached record of one scope, keyed by cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeSnapshot {
    pub scope: TenantScope,
    pub records: BTreeMap<String, Value>,
}

/// Receives what the push and poll strategies observe.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn on_event(&self, event: ChangeEvent) -> SyncResult<()>;

    /// A complete view of every watched scope; replaces prior state.
    async fn on_snapshot(&self, snapshots: Vec<ScopeSnapshot>) -> SyncResult<()>;

    /// Called after a push subscription is re-established. Events published
    /// while disconnected were lost.
    async fn on_reconnected(&self) -> SyncResult<()> {
        Ok(())
    }
}

/// Read-only access to cached records.
#[derive(Clone)]
pub struct ConfigReader {
    store: Arc<dyn CacheStore>,
}

impl ConfigReader {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub async fn get_record(
        &self,
        scope: &TenantScope,
        kind: ResourceKind,
        id: &ResourceId,
    ) -> SyncResult<Option<Value>> {
        self.get_typed(scope, kind, id).await
    }

    /// Decodes the record into one of the shapes in [`crate::records`].
    pub async fn get_typed<T>(
        &self,
        scope: &TenantScope,
        kind: ResourceKind,
        id: &ResourceId,
    ) -> SyncResult<Option<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        let key = keys::record_key(scope, kind, id);
        self.get_key(&key).await
    }

    async fn get_key<T>(&self, key: &str) -> SyncResult<Option<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        let value: Option<T> = self.store.get_json(key).await?;
        match value {
            Some(_) => debug!("Cache HIT: {}", key),
            None => debug!("Cache MISS: {}", key),
        }
        Ok(value)
    }

    /// Ids in the kind's active set. Members may outlive their records.
    pub async fn active_ids(
        &self,
        scope: &TenantScope,
        kind: ResourceKind,
    ) -> SyncResult<Vec<String>> {
        let mut ids = self
            .store
            .set_members(&keys::active_set_key(scope, kind))
            .await?;
        ids.sort();
        Ok(ids)
    }

    /// Tenants in the platform registry. Unparseable members are skipped.
    pub async fn registered_tenants(&self) -> SyncResult<Vec<TenantId>> {
        let members = self.active_ids(&TenantScope::Platform, ResourceKind::Tenant).await?;
        Ok(members
            .into_iter()
            .filter_map(|member| match TenantId::parse(member.clone()) {
                Ok(tenant) => Some(tenant),
                Err(e) => {
                    warn!("Ignoring registry member {}: {}", member, e);
                    None
                }
            })
            .collect())
    }

    pub async fn snapshot_scope(&self, scope: &TenantScope) -> SyncResult<ScopeSnapshot> {
        let mut snapshot = ScopeSnapshot {
            scope: scope.clone(),
            records: BTreeMap::new(),
        };

        let kinds: &[ResourceKind] = match scope {
            TenantScope::Platform => &[ResourceKind::Network, ResourceKind::FilterScript],
            TenantScope::Tenant(tenant) => {
                let own_id = ResourceId::parse(tenant.as_str())?;
                let key = keys::tenant_key(tenant, ResourceKind::Tenant, &own_id);
                if let Some(record) = self.get_key(&key).await? {
                    snapshot.records.insert(key, record);
                }
                &[ResourceKind::Monitor, ResourceKind::Trigger]
            }
        };

        for kind in kinds {
            for member in self.active_ids(scope, *kind).await? {
                let id = match ResourceId::parse(member.clone()) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!("Ignoring {} index member {}: {}", kind, member, e);
                        continue;
                    }
                };
                let key = keys::record_key(scope, *kind, &id);
                if let Some(record) = self.get_key(&key).await? {
                    snapshot.records.insert(key, record);
                }
            }
        }

        Ok(snapshot)
    }

    pub async fn snapshot_tenant(&self, tenant: &TenantId) -> SyncResult<ScopeSnapshot> {
        self.snapshot_scope(&TenantScope::Tenant(tenant.clone())).await
    }

    /// The platform scope followed by `tenants`, or by every registered
    /// tenant when `tenants` is empty.
    pub async fn watched_scopes(&self, tenants: &[TenantId]) -> SyncResult<Vec<TenantScope>> {
        let tenants = if tenants.is_empty() {
            self.registered_tenants().await?
        } else {
            tenants.to_vec()
        };
        Ok(std::iter::once(TenantScope::Platform)
            .chain(tenants.into_iter().map(TenantScope::Tenant))
            .collect())
    }

    pub async fn snapshot_all(&self, tenants: &[TenantId]) -> SyncResult<Vec<ScopeSnapshot>> {
        let mut snapshots = Vec::new();
        for scope in self.watched_scopes(tenants).await? {
            snapshots.push(self.snapshot_scope(&scope).await?);
        }
        Ok(snapshots)
    }
}

/// Channels a push consumer listens on. Every event arrives exactly once:
/// platform changes on the platform channel, tenant changes on the tenant
/// channels when tenants are listed, on the tenant-scoped kind channels
/// otherwise.
pub fn subscription_channels(tenants: &[TenantId]) -> Vec<String> {
    let mut channels = vec![keys::PLATFORM_CHANNEL.to_string()];
    if tenants.is_empty() {
        channels.extend(
            ResourceKind::ALL
                .iter()
                .filter(|kind| !kind.is_platform_scoped())
                .map(|kind| keys::kind_channel(*kind)),
        );
    } else {
        channels.extend(tenants.iter().map(keys::tenant_channel));
    }
    channels
}

/// Strategy 1: push notifications over the cache medium's pub/sub.
pub struct PushSubscriber {
    subscriber: Arc<dyn ChangeSubscriber>,
    handler: Arc<dyn ChangeHandler>,
    channels: Vec<String>,
    reconnect_delay: Duration,
}

impl PushSubscriber {
    pub fn new(
        subscriber: Arc<dyn ChangeSubscriber>,
        handler: Arc<dyn ChangeHandler>,
        tenants: &[TenantId],
        config: &ConsumerConfig,
    ) -> Self {
        Self {
            subscriber,
            handler,
            channels: subscription_channels(tenants),
            reconnect_delay: config.reconnect_delay(),
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Runs until `shutdown` fires, resubscribing whenever the stream ends
    /// or the subscription cannot be opened.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("Push subscriber listening on {:?}", self.channels);
        let mut connected_before = false;

        loop {
            let mut stream = match self.subscriber.subscribe(&self.channels).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Subscription failed, retrying in {:?}: {}", self.reconnect_delay, e);
                    tokio::select! {
                        _ = tokio::time::sleep(self.reconnect_delay) => continue,
                        _ = shutdown.recv() => break,
                    }
                }
            };

            if connected_before {
                info!("Push subscription re-established");
                if let Err(e) = self.handler.on_reconnected().await {
                    warn!("Refresh after reconnect failed: {}", e);
                }
            }
            connected_before = true;

            loop {
                tokio::select! {
                    message = stream.next() => match message {
                        Some(message) => self.dispatch(&message.channel, &message.payload).await,
                        None => break,
                    },
                    _ = shutdown.recv() => {
                        info!("Push subscriber received shutdown signal");
                        return;
                    }
                }
            }

            warn!("Subscription stream closed, reconnecting in {:?}", self.reconnect_delay);
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown.recv() => break,
            }
        }

        info!("Push subscriber stopped");
    }

    async fn dispatch(&self, channel: &str, payload: &[u8]) {
        let event = match ChangeEvent::from_payload(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping undecodable message on {}: {}", channel, e);
                counter!("confsync_consumer_events_total", "result" => "undecodable").increment(1);
                return;
            }
        };

        debug!(
            "Received {} {} {} on {}",
            event.event_type, event.resource_type, event.resource_id, channel
        );
        match self.handler.on_event(event).await {
            Ok(()) => {
                counter!("confsync_consumer_events_total", "result" => "applied").increment(1)
            }
            Err(e) => {
                warn!("Failed to apply event from {}: {}", channel, e);
                counter!("confsync_consumer_events_total", "result" => "error").increment(1);
            }
        }
    }
}

/// Strategy 2: periodic full re-read of every watched scope.
pub struct PollingRefresher {
    reader: ConfigReader,
    handler: Arc<dyn ChangeHandler>,
    tenants: Vec<TenantId>,
    interval: Duration,
}

impl PollingRefresher {
    pub fn new(
        reader: ConfigReader,
        handler: Arc<dyn ChangeHandler>,
        tenants: Vec<TenantId>,
        config: &ConsumerConfig,
    ) -> Self {
        Self {
            reader,
            handler,
            tenants,
            interval: config.poll_interval(),
        }
    }

    /// One refresh cycle. A failed read skips the cycle; partial snapshots
    /// are never handed out.
    pub async fn poll_once(&self) -> SyncResult<usize> {
        let snapshots = self.reader.snapshot_all(&self.tenants).await?;
        let records = snapshots.iter().map(|s| s.records.len()).sum();
        self.handler.on_snapshot(snapshots).await?;
        debug!("Poll refreshed {} record(s)", records);
        Ok(records)
    }

    /// Polls immediately, then every interval, until `shutdown` fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("Polling refresher started, interval {:?}", self.interval);
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("Poll cycle failed: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Polling refresher received shutdown signal");
                    break;
                }
            }
        }
    }
}

/// In-process copy of the watched cache scopes, kept current by applying
/// change events and snapshots.
pub struct ConfigMirror {
    reader: ConfigReader,
    tenants: Vec<TenantId>,
    state: RwLock<BTreeMap<TenantScope, BTreeMap<String, Value>>>,
}

impl ConfigMirror {
    pub fn new(reader: ConfigReader, tenants: Vec<TenantId>) -> Self {
        Self {
            reader,
            tenants,
            state: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let state = self.state.read().await;
        state.values().find_map(|records| records.get(key).cloned())
    }

    pub async fn get_record(
        &self,
        scope: &TenantScope,
        kind: ResourceKind,
        id: &ResourceId,
    ) -> Option<Value> {
        let state = self.state.read().await;
        state
            .get(scope)
            .and_then(|records| records.get(&keys::record_key(scope, kind, id)))
            .cloned()
    }

    /// Cache keys held for `scope`, sorted.
    pub async fn keys(&self, scope: &TenantScope) -> Vec<String> {
        let state = self.state.read().await;
        state
            .get(scope)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        let state = self.state.read().await;
        state.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn watches(&self, scope: &TenantScope) -> bool {
        match scope {
            TenantScope::Platform => true,
            TenantScope::Tenant(tenant) => self.tenants.is_empty() || self.tenants.contains(tenant),
        }
    }

    /// Re-reads every watched scope from the cache.
    pub async fn refresh(&self) -> SyncResult<()> {
        let snapshots = self.reader.snapshot_all(&self.tenants).await?;
        self.on_snapshot(snapshots).await
    }

    async fn refresh_scope(&self, scope: &TenantScope) -> SyncResult<()> {
        let snapshot = self.reader.snapshot_scope(scope).await?;
        let mut state = self.state.write().await;
        if snapshot.records.is_empty() {
            state.remove(scope);
        } else {
            state.insert(snapshot.scope, snapshot.records);
        }
        Ok(())
    }

    async fn refetch(&self, event: &ChangeEvent) -> SyncResult<()> {
        let id = ResourceId::parse(event.resource_id.clone())?;
        let scope = &event.tenant_scope;
        let key = keys::record_key(scope, event.resource_type, &id);
        let record = self.reader.get_record(scope, event.resource_type, &id).await?;

        let mut state = self.state.write().await;
        match record {
            Some(record) => {
                state.entry(scope.clone()).or_default().insert(key, record);
            }
            // already gone again, or expired
            None => Self::drop_key(&mut state, scope, &key),
        }
        Ok(())
    }

    fn drop_key(
        state: &mut BTreeMap<TenantScope, BTreeMap<String, Value>>,
        scope: &TenantScope,
        key: &str,
    ) {
        if let Some(records) = state.get_mut(scope) {
            records.remove(key);
            if records.is_empty() {
                state.remove(scope);
            }
        }
    }
}

#[async_trait]
impl ChangeHandler for ConfigMirror {
    async fn on_event(&self, event: ChangeEvent) -> SyncResult<()> {
        if !self.watches(&event.tenant_scope) {
            return Ok(());
        }

        match event.event_type {
            ChangeEventType::Create | ChangeEventType::Update => self.refetch(&event).await,
            ChangeEventType::Delete => {
                let id = ResourceId::parse(event.resource_id.clone())?;
                let key = keys::record_key(&event.tenant_scope, event.resource_type, &id);
                let mut state = self.state.write().await;
                Self::drop_key(&mut state, &event.tenant_scope, &key);
                Ok(())
            }
            ChangeEventType::Invalidate => {
                {
                    let mut state = self.state.write().await;
                    state.remove(&event.tenant_scope);
                }
                self.refresh_scope(&event.tenant_scope).await
            }
        }
    }

    async fn on_snapshot(&self, snapshots: Vec<ScopeSnapshot>) -> SyncResult<()> {
        let fresh: BTreeMap<_, _> = snapshots
            .into_iter()
            .filter(|s| !s.records.is_empty())
            .map(|s| (s.scope, s.records))
            .collect();
        *self.state.write().await = fresh;
        Ok(())
    }

    async fn on_reconnected(&self) -> SyncResult<()> {
        self.refresh().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{delete_event, update_event};
    use crate::records::MonitorRecord;
    use crate::synchronizer::Synchronizer;
    use confsync_core::config::{CacheConfig, SyncConfig};
    use confsync_core::ConfigRepository;
    use confsync_infrastructure::InMemoryCacheStore;
    use confsync_testing_utils::{
        tenant_id, MockConfigRepository, MonitorBuilder, NetworkBuilder, TenantBuilder,
        TestEnv, TriggerBuilder, UnreachableSubscriber,
    };
    use serde_json::Map;

    struct Fixture {
        repo: MockConfigRepository,
        cache: InMemoryCacheStore,
        sync: Synchronizer,
    }

    impl Fixture {
        fn new() -> Self {
            let repo = MockConfigRepository::new();
            let cache = InMemoryCacheStore::new();
            let sync = Synchronizer::new(
                Arc::new(cache.clone()),
                Arc::new(repo.clone()),
                &CacheConfig::default(),
                &SyncConfig::default(),
            );
            Self { repo, cache, sync }
        }

        fn reader(&self) -> ConfigReader {
            ConfigReader::new(Arc::new(self.cache.clone()))
        }

        async fn seed_tenant(&self, tenant: &str) -> uuid::Uuid {
            let t = self.repo.save_tenant(&TenantBuilder::new(tenant).build()).await.unwrap();
            self.sync.sync_tenant(&t).await;
            let trigger = self
                .repo
                .save_trigger(&TriggerBuilder::email(tenant_id(tenant), "email-ops").build())
                .await
                .unwrap();
            self.sync.sync_trigger(&trigger).await;
            let monitor = self
                .repo
                .save_monitor(
                    &MonitorBuilder::new(tenant_id(tenant))
                        .with_trigger_slugs(&["email-ops"])
                        .build(),
                )
                .await
                .unwrap();
            self.sync.sync_monitor(&monitor).await;
            monitor.value.id
        }
    }

    #[tokio::test]
    async fn test_reader_snapshots_tenant_scope() {
        let f = Fixture::new();
        let monitor_id = f.seed_tenant("t1").await;

        let snapshot = f.reader().snapshot_tenant(&tenant_id("t1")).await.unwrap();
        assert_eq!(snapshot.records.len(), 3);
        assert!(snapshot.records.contains_key("tenant:t1:tenant:t1"));
        let monitor = &snapshot.records[&format!("tenant:t1:monitor:{monitor_id}")];
        assert_eq!(monitor["triggers"][0]["slug"], "email-ops");

        assert_eq!(
            f.reader().registered_tenants().await.unwrap(),
            vec![tenant_id("t1")]
        );
    }

    #[tokio::test]
    async fn test_reader_decodes_typed_monitor_record() {
        let f = Fixture::new();
        let monitor_id = f.seed_tenant("t1").await;
        let scope = TenantScope::Tenant(tenant_id("t1"));

        let record: MonitorRecord = f
            .reader()
            .get_typed(&scope, ResourceKind::Monitor, &ResourceId::from(monitor_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.id, monitor_id);
        assert_eq!(record.trigger_count, 1);
        assert_eq!(record.triggers[0].slug, "email-ops");
        assert!(record.missing_triggers.is_empty());

        let missing: Option<MonitorRecord> = f
            .reader()
            .get_typed(&scope, ResourceKind::Monitor, &ResourceId::from(uuid::Uuid::new_v4()))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_reader_skips_index_members_without_records() {
        let f = Fixture::new();
        f.cache
            .set_add("platform:network:active", "ghost", None)
            .await
            .unwrap();

        let snapshot = f.reader().snapshot_scope(&TenantScope::Platform).await.unwrap();
        assert!(snapshot.records.is_empty());
    }

    #[test]
    fn test_subscription_channels() {
        assert_eq!(
            subscription_channels(&[tenant_id("t1"), tenant_id("t2")]),
            vec![
                "config:platform:update",
                "config:tenant:t1:update",
                "config:tenant:t2:update"
            ]
        );
        assert_eq!(
            subscription_channels(&[]),
            vec![
                "config:platform:update",
                "config:monitor:update",
                "config:trigger:update",
                "config:tenant:update"
            ]
        );
    }

    #[tokio::test]
    async fn test_mirror_applies_update_and_delete() {
        let f = Fixture::new();
        let mirror = ConfigMirror::new(f.reader(), Vec::new());
        let network = f
            .repo
            .save_network(&NetworkBuilder::new("ethereum-mainnet").build())
            .await
            .unwrap();
        f.sync.sync_network(&network).await;

        mirror
            .on_event(update_event(
                ResourceKind::Network,
                TenantScope::Platform,
                "ethereum-mainnet",
                Map::new(),
            ))
            .await
            .unwrap();
        assert!(mirror.get("platform:network:ethereum-mainnet").await.is_some());

        mirror
            .on_event(delete_event(
                ResourceKind::Network,
                TenantScope::Platform,
                "ethereum-mainnet",
                Some("ethereum-mainnet"),
            ))
            .await
            .unwrap();
        assert!(mirror.is_empty().await);
    }

    #[tokio::test]
    async fn test_mirror_converges_after_purge_invalidate() {
        let f = Fixture::new();
        f.seed_tenant("t1").await;
        f.seed_tenant("t2").await;
        let mirror = ConfigMirror::new(f.reader(), Vec::new());
        mirror.refresh().await.unwrap();
        assert_eq!(mirror.len().await, 6);

        let outcome = f.sync.purge_tenant(&tenant_id("t1")).await;
        assert_eq!(outcome.purged, Some(5));
        mirror
            .on_event(crate::publisher::purge_event(&tenant_id("t1"), 5))
            .await
            .unwrap();

        assert!(mirror.keys(&TenantScope::Tenant(tenant_id("t1"))).await.is_empty());
        assert_eq!(mirror.keys(&TenantScope::Tenant(tenant_id("t2"))).await.len(), 3);
    }

    #[tokio::test]
    async fn test_mirror_ignores_unwatched_tenants() {
        let f = Fixture::new();
        f.seed_tenant("t2").await;
        let mirror = ConfigMirror::new(f.reader(), vec![tenant_id("t1")]);

        mirror
            .on_event(crate::publisher::rebuild_event(
                &TenantScope::Tenant(tenant_id("t2")),
                3,
            ))
            .await
            .unwrap();
        assert!(mirror.is_empty().await);
    }

    #[tokio::test]
    async fn test_poll_replaces_state() {
        let f = Fixture::new();
        f.seed_tenant("t1").await;
        let mirror = Arc::new(ConfigMirror::new(f.reader(), Vec::new()));
        let poller = PollingRefresher::new(
            f.reader(),
            mirror.clone(),
            Vec::new(),
            &ConsumerConfig::default(),
        );

        assert_eq!(poller.poll_once().await.unwrap(), 3);
        assert_eq!(mirror.len().await, 3);

        // a purge whose invalidate was never delivered
        f.cache.delete_prefix("tenant:t1:").await.unwrap();
        f.cache.set_remove("platform:tenant:active", "t1").await.unwrap();
        assert_eq!(poller.poll_once().await.unwrap(), 0);
        assert!(mirror.is_empty().await);
    }

    #[tokio::test]
    async fn test_push_subscriber_delivers_and_skips_garbage() {
        let f = Fixture::new();
        let cache = Arc::new(f.cache.clone());
        let mirror = Arc::new(ConfigMirror::new(f.reader(), Vec::new()));
        let push = PushSubscriber::new(
            cache.clone(),
            mirror.clone(),
            &[],
            &ConsumerConfig::default(),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { push.run(shutdown_rx).await });

        // garbage until the subscription is registered
        let subscribed = TestEnv::wait_for(
            || {
                let cache = cache.clone();
                async move {
                    cache
                        .publish(keys::PLATFORM_CHANNEL, b"not json")
                        .await
                        .unwrap_or(0)
                        > 0
                }
            },
            Duration::from_secs(2),
        )
        .await;
        assert!(subscribed);

        let network = f
            .repo
            .save_network(&NetworkBuilder::new("ethereum-mainnet").build())
            .await
            .unwrap();
        f.sync.sync_network(&network).await;

        let delivered = TestEnv::wait_for(
            || {
                let mirror = mirror.clone();
                async move { mirror.get("platform:network:ethereum-mainnet").await.is_some() }
            },
            Duration::from_secs(2),
        )
        .await;
        assert!(delivered);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_subscriber_retries_until_shutdown() {
        let f = Fixture::new();
        let subscriber = Arc::new(UnreachableSubscriber::default());
        let mirror = Arc::new(ConfigMirror::new(f.reader(), Vec::new()));
        let push = PushSubscriber::new(
            subscriber.clone(),
            mirror,
            &[],
            &ConsumerConfig::default(),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { push.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_secs(12)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        // immediately, then after 5s and 10s
        assert_eq!(subscriber.attempts(), 3);
    }
}
