//! In-memory test doubles for the authoritative store and the cache medium
//!
//! `MockConfigRepository` mirrors the SQL repositories' commit semantics
//! (timestamps stamped at commit, previous version returned) without a
//! database. `FaultyCacheStore` wraps any cache store and can be told to
//! fail or stall individual operations.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use confsync_core::{
    CacheStore, ChangeSubscriber, Committed, ConfigRepository, FilterScript, MessageStream,
    Monitor, Network, SyncError, SyncResult, Tenant, TenantId, Trigger,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[derive(Default)]
struct RepositoryState {
    tenants: BTreeMap<TenantId, Tenant>,
    networks: BTreeMap<Uuid, Network>,
    filter_scripts: BTreeMap<Uuid, FilterScript>,
    monitors: BTreeMap<Uuid, Monitor>,
    triggers: BTreeMap<Uuid, Trigger>,
}

/// Mock implementation of ConfigRepository for testing
#[derive(Clone, Default)]
pub struct MockConfigRepository {
    state: Arc<Mutex<RepositoryState>>,
    fail_writes: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
}

impl MockConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent save and delete fail as an aborted transaction.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of read calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> SyncResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(SyncError::authoritative("injected transaction failure"))
        } else {
            Ok(())
        }
    }

    fn read(&self) -> std::sync::MutexGuard<'_, RepositoryState> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap()
    }

    fn write(&self) -> SyncResult<std::sync::MutexGuard<'_, RepositoryState>> {
        self.check_writable()?;
        Ok(self.state.lock().unwrap())
    }
}

#[async_trait]
impl ConfigRepository for MockConfigRepository {
    async fn get_tenant(&self, id: &TenantId) -> SyncResult<Option<Tenant>> {
        Ok(self.read().tenants.get(id).cloned())
    }

    async fn list_tenants(&self) -> SyncResult<Vec<Tenant>> {
        Ok(self.read().tenants.values().cloned().collect())
    }

    async fn save_tenant(&self, tenant: &Tenant) -> SyncResult<Committed<Tenant>> {
        let mut state = self.write()?;
        let committed_at = now();
        let previous = state.tenants.get(&tenant.id).cloned();
        let mut value = tenant.clone();
        value.created_at = previous.as_ref().map_or(committed_at, |p| p.created_at);
        value.updated_at = committed_at;
        state.tenants.insert(value.id.clone(), value.clone());
        Ok(Committed::new(value, previous, committed_at))
    }

    async fn delete_tenant(&self, id: &TenantId) -> SyncResult<Option<Committed<Tenant>>> {
        let mut state = self.write()?;
        let Some(existing) = state.tenants.remove(id) else {
            return Ok(None);
        };
        state.monitors.retain(|_, m| &m.tenant_id != id);
        state.triggers.retain(|_, t| &t.tenant_id != id);
        Ok(Some(Committed::new(existing, None, now())))
    }

    async fn get_network(&self, slug: &str) -> SyncResult<Option<Network>> {
        Ok(self.read().networks.values().find(|n| n.slug == slug).cloned())
    }

    async fn list_networks(&self) -> SyncResult<Vec<Network>> {
        let mut networks: Vec<Network> = self.read().networks.values().cloned().collect();
        networks.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(networks)
    }

    async fn save_network(&self, network: &Network) -> SyncResult<Committed<Network>> {
        let mut state = self.write()?;
        let committed_at = now();
        let previous = state.networks.get(&network.id).cloned();
        let mut value = network.clone();
        value.created_at = previous.as_ref().map_or(committed_at, |p| p.created_at);
        value.updated_at = committed_at;
        state.networks.insert(value.id, value.clone());
        Ok(Committed::new(value, previous, committed_at))
    }

    async fn delete_network(&self, id: Uuid) -> SyncResult<Option<Committed<Network>>> {
        let mut state = self.write()?;
        Ok(state
            .networks
            .remove(&id)
            .map(|existing| Committed::new(existing, None, now())))
    }

    async fn get_filter_script(&self, slug: &str) -> SyncResult<Option<FilterScript>> {
        Ok(self
            .read()
            .filter_scripts
            .values()
            .find(|s| s.slug == slug)
            .cloned())
    }

    async fn list_filter_scripts(&self) -> SyncResult<Vec<FilterScript>> {
        let mut scripts: Vec<FilterScript> = self.read().filter_scripts.values().cloned().collect();
        scripts.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(scripts)
    }

    async fn save_filter_script(
        &self,
        script: &FilterScript,
    ) -> SyncResult<Committed<FilterScript>> {
        let mut state = self.write()?;
        let committed_at = now();
        let previous = state.filter_scripts.get(&script.id).cloned();
        let mut value = script.clone();
        value.created_at = previous.as_ref().map_or(committed_at, |p| p.created_at);
        value.updated_at = committed_at;
        state.filter_scripts.insert(value.id, value.clone());
        Ok(Committed::new(value, previous, committed_at))
    }

    async fn delete_filter_script(&self, id: Uuid) -> SyncResult<Option<Committed<FilterScript>>> {
        let mut state = self.write()?;
        Ok(state
            .filter_scripts
            .remove(&id)
            .map(|existing| Committed::new(existing, None, now())))
    }

    async fn get_monitor(&self, tenant: &TenantId, id: Uuid) -> SyncResult<Option<Monitor>> {
        Ok(self
            .read()
            .monitors
            .get(&id)
            .filter(|m| &m.tenant_id == tenant)
            .cloned())
    }

    async fn list_monitors(&self, tenant: &TenantId) -> SyncResult<Vec<Monitor>> {
        Ok(self
            .read()
            .monitors
            .values()
            .filter(|m| &m.tenant_id == tenant)
            .cloned()
            .collect())
    }

    async fn monitors_referencing_trigger(
        &self,
        tenant: &TenantId,
        trigger_slug: &str,
    ) -> SyncResult<Vec<Monitor>> {
        Ok(self
            .read()
            .monitors
            .values()
            .filter(|m| &m.tenant_id == tenant && m.references_trigger(trigger_slug))
            .cloned()
            .collect())
    }

    async fn save_monitor(&self, monitor: &Monitor) -> SyncResult<Committed<Monitor>> {
        let mut state = self.write()?;
        let committed_at = now();
        let previous = state.monitors.get(&monitor.id).cloned();
        if previous.as_ref().is_some_and(|p| p.tenant_id != monitor.tenant_id) {
            return Err(SyncError::authoritative("monitor belongs to another tenant"));
        }
        let mut value = monitor.clone();
        value.created_at = previous.as_ref().map_or(committed_at, |p| p.created_at);
        value.updated_at = committed_at;
        state.monitors.insert(value.id, value.clone());
        Ok(Committed::new(value, previous, committed_at))
    }

    async fn delete_monitor(
        &self,
        tenant: &TenantId,
        id: Uuid,
    ) -> SyncResult<Option<Committed<Monitor>>> {
        let mut state = self.write()?;
        if !state.monitors.get(&id).is_some_and(|m| &m.tenant_id == tenant) {
            return Ok(None);
        }
        Ok(state
            .monitors
            .remove(&id)
            .map(|existing| Committed::new(existing, None, now())))
    }

    async fn get_trigger(&self, tenant: &TenantId, id: Uuid) -> SyncResult<Option<Trigger>> {
        Ok(self
            .read()
            .triggers
            .get(&id)
            .filter(|t| &t.tenant_id == tenant)
            .cloned())
    }

    async fn list_triggers(&self, tenant: &TenantId) -> SyncResult<Vec<Trigger>> {
        Ok(self
            .read()
            .triggers
            .values()
            .filter(|t| &t.tenant_id == tenant)
            .cloned()
            .collect())
    }

    async fn triggers_by_slugs(
        &self,
        tenant: &TenantId,
        slugs: &[String],
    ) -> SyncResult<Vec<Trigger>> {
        Ok(self
            .read()
            .triggers
            .values()
            .filter(|t| &t.tenant_id == tenant && slugs.contains(&t.slug))
            .cloned()
            .collect())
    }

    async fn save_trigger(&self, trigger: &Trigger) -> SyncResult<Committed<Trigger>> {
        let mut state = self.write()?;
        let committed_at = now();
        let previous = state.triggers.get(&trigger.id).cloned();
        if previous.as_ref().is_some_and(|p| p.tenant_id != trigger.tenant_id) {
            return Err(SyncError::authoritative("trigger belongs to another tenant"));
        }
        let mut value = trigger.clone();
        value.created_at = previous.as_ref().map_or(committed_at, |p| p.created_at);
        value.updated_at = committed_at;
        state.triggers.insert(value.id, value.clone());
        Ok(Committed::new(value, previous, committed_at))
    }

    async fn delete_trigger(
        &self,
        tenant: &TenantId,
        id: Uuid,
    ) -> SyncResult<Option<Committed<Trigger>>> {
        let mut state = self.write()?;
        if !state.triggers.get(&id).is_some_and(|t| &t.tenant_id == tenant) {
            return Ok(None);
        }
        Ok(state
            .triggers
            .remove(&id)
            .map(|existing| Committed::new(existing, None, now())))
    }

    async fn health_check(&self) -> SyncResult<bool> {
        Ok(true)
    }
}

/// Operations of [`CacheStore`] that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOp {
    Get,
    Set,
    Delete,
    DeletePrefix,
    SetAdd,
    SetRemove,
    SetReplace,
    Publish,
}

/// A published message as observed by [`FaultyCacheStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Wraps a cache store, records publishes and injects failures or delays.
#[derive(Clone)]
pub struct FaultyCacheStore {
    inner: Arc<dyn CacheStore>,
    failing: Arc<Mutex<HashMap<CacheOp, bool>>>,
    delay: Arc<Mutex<Option<Duration>>>,
    published: Arc<Mutex<Vec<PublishedMessage>>>,
}

impl FaultyCacheStore {
    pub fn new(inner: Arc<dyn CacheStore>) -> Self {
        Self {
            inner,
            failing: Arc::new(Mutex::new(HashMap::new())),
            delay: Arc::new(Mutex::new(None)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn fail(&self, op: CacheOp, fail: bool) {
        self.failing.lock().unwrap().insert(op, fail);
    }

    /// Every operation sleeps this long before running; simulates a stalled medium.
    pub fn stall(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_on(&self, channel: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.channel == channel)
            .collect()
    }

    pub fn clear_published(&self) {
        self.published.lock().unwrap().clear();
    }

    async fn enter(&self, op: CacheOp) -> SyncResult<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self.failing.lock().unwrap().get(&op).copied().unwrap_or(false);
        if !failing {
            return Ok(());
        }
        Err(match op {
            CacheOp::Publish => SyncError::publish("injected publish failure"),
            CacheOp::Get => SyncError::cache_read("injected Get failure"),
            _ => SyncError::cache(format!("injected {op:?} failure")),
        })
    }
}

#[async_trait]
impl CacheStore for FaultyCacheStore {
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        self.enter(CacheOp::Get).await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> SyncResult<()> {
        self.enter(CacheOp::Set).await?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> SyncResult<bool> {
        self.enter(CacheOp::Delete).await?;
        self.inner.delete(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> SyncResult<Vec<String>> {
        self.enter(CacheOp::Get).await?;
        self.inner.keys_with_prefix(prefix).await
    }

    async fn delete_prefix(&self, prefix: &str) -> SyncResult<usize> {
        self.enter(CacheOp::DeletePrefix).await?;
        self.inner.delete_prefix(prefix).await
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> SyncResult<()> {
        self.enter(CacheOp::SetAdd).await?;
        self.inner.set_add(key, member, ttl).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> SyncResult<bool> {
        self.enter(CacheOp::SetRemove).await?;
        self.inner.set_remove(key, member).await
    }

    async fn set_members(&self, key: &str) -> SyncResult<Vec<String>> {
        self.enter(CacheOp::Get).await?;
        self.inner.set_members(key).await
    }

    async fn set_replace(
        &self,
        key: &str,
        members: &[String],
        ttl: Option<Duration>,
    ) -> SyncResult<()> {
        self.enter(CacheOp::SetReplace).await?;
        self.inner.set_replace(key, members, ttl).await
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> SyncResult<usize> {
        self.enter(CacheOp::Publish).await?;
        self.published.lock().unwrap().push(PublishedMessage {
            channel: channel.to_string(),
            payload: payload.to_vec(),
        });
        self.inner.publish(channel, payload).await
    }

    async fn health_check(&self) -> SyncResult<bool> {
        self.inner.health_check().await
    }
}

/// Subscriber whose every subscription attempt fails, for reconnect tests.
#[derive(Clone, Default)]
pub struct UnreachableSubscriber {
    attempts: Arc<AtomicUsize>,
}

impl UnreachableSubscriber {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeSubscriber for UnreachableSubscriber {
    async fn subscribe(&self, _channels: &[String]) -> SyncResult<MessageStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SyncError::cache_read("connection refused"))
    }
}
