//! Write-through synchronization.
//!
//! Runs after the authoritative commit and never takes part in it. Each sync
//! walks `COMMITTED -> DENORMALIZING -> CACHE_WRITTEN -> INDEXED -> PUBLISHED`
//! and stops at the first failing step; the failure is reported on the
//! returned [`SyncOutcome`] and never propagated to the caller. Nothing is
//! retried inline: TTL expiry, the rebuilder and consumer polling bound the
//! staleness a failed step leaves behind.

use chrono::{DateTime, SubsecRound, Utc};
use confsync_core::{
    config::{CacheConfig, CacheTtlConfig, SyncConfig},
    keys, CacheStore, Committed, ConfigRepository, FilterScript, Monitor, Network, ResourceId,
    ResourceKind, SyncError, SyncResult, Tenant, TenantId, TenantScope, Trigger,
};
use metrics::{counter, histogram};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::publisher::{delete_event, purge_event, update_event, EventPublisher};
use crate::record_builder::{BuiltRecord, RecordBuilder};
use crate::timeouts::bounded;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Committed,
    Denormalizing,
    CacheWritten,
    Indexed,
    Published,
    DenormalizationFailed,
    CacheFailed,
    PublishFailed,
    /// A newer version of the resource was already synchronized.
    Superseded,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Committed => "COMMITTED",
            SyncState::Denormalizing => "DENORMALIZING",
            SyncState::CacheWritten => "CACHE_WRITTEN",
            SyncState::Indexed => "INDEXED",
            SyncState::Published => "PUBLISHED",
            SyncState::DenormalizationFailed => "DENORMALIZATION_FAILED",
            SyncState::CacheFailed => "CACHE_FAILED",
            SyncState::PublishFailed => "PUBLISH_FAILED",
            SyncState::Superseded => "SUPERSEDED",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SyncState::DenormalizationFailed | SyncState::CacheFailed | SyncState::PublishFailed
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one resource after its commit, plus any records
/// re-synchronized because of it.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub kind: ResourceKind,
    pub scope: TenantScope,
    pub resource_id: String,
    pub key: Option<String>,
    pub state: SyncState,
    pub warning: Option<String>,
    pub cascaded: Vec<SyncOutcome>,
    /// Keys removed by a tenant purge.
    pub purged: Option<usize>,
}

impl SyncOutcome {
    fn new(kind: ResourceKind, scope: TenantScope, resource_id: impl Into<String>) -> Self {
        Self {
            kind,
            scope,
            resource_id: resource_id.into(),
            key: None,
            state: SyncState::Committed,
            warning: None,
            cascaded: Vec::new(),
            purged: None,
        }
    }

    fn warn(&mut self, message: String) {
        self.warning = Some(match self.warning.take() {
            Some(existing) => format!("{existing}; {message}"),
            None => message,
        });
    }

    /// Published with no warning here or in any cascaded sync. A superseded
    /// sync is not clean but is not a failure either.
    pub fn is_clean(&self) -> bool {
        self.state == SyncState::Published
            && self.warning.is_none()
            && self.cascaded.iter().all(SyncOutcome::is_clean)
    }

    /// Every warning, cascaded ones included, prefixed with the resource.
    pub fn warnings(&self) -> Vec<String> {
        let own = self
            .warning
            .iter()
            .map(|w| format!("{} {}: {}", self.kind, self.resource_id, w));
        own.chain(self.cascaded.iter().flat_map(SyncOutcome::warnings))
            .collect()
    }
}

/// Newest version synchronized for one resource.
#[derive(Default)]
struct Mark {
    version: Option<DateTime<Utc>>,
    touched: Option<Instant>,
}

impl Mark {
    fn touch(&mut self) {
        self.touched = Some(Instant::now());
    }

    fn raise(&mut self, version: DateTime<Utc>) {
        self.version = Some(self.version.map_or(version, |seen| seen.max(version)));
    }
}

type Watermark = Arc<Mutex<Mark>>;

/// Marks keyed by scope prefix and entity. A mark idle for longer than the
/// retention is forgotten on the next sweep; one whose slot is still held by
/// a running sync is always kept.
struct Watermarks {
    slots: HashMap<String, Watermark>,
    last_sweep: Instant,
}

impl Watermarks {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            last_sweep: Instant::now(),
        }
    }

    fn sweep(&mut self, retention: Duration) {
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(mark) => mark.touched.is_some_and(|t| t.elapsed() < retention),
                Err(_) => true,
            }
        });
        self.last_sweep = Instant::now();
        let swept = before - self.slots.len();
        if swept > 0 {
            debug!("Forgot {} idle version watermarks", swept);
        }
    }

    fn forget_prefix(&mut self, prefix: &str) -> usize {
        let before = self.slots.len();
        self.slots
            .retain(|key, slot| !key.starts_with(prefix) || Arc::strong_count(slot) > 1);
        before - self.slots.len()
    }
}

fn entity_key(kind: ResourceKind, id: Uuid) -> String {
    format!("{kind}:{id}")
}

fn tenant_entity_key(tenant: &TenantId) -> String {
    format!("{}:{}", ResourceKind::Tenant, tenant)
}

// outside every tenant prefix so a purge never forgets it
fn purge_marker_key(tenant: &TenantId) -> String {
    format!("purged:{tenant}")
}

pub struct Synchronizer {
    store: Arc<dyn CacheStore>,
    repository: Arc<dyn ConfigRepository>,
    builder: RecordBuilder,
    publisher: EventPublisher,
    ttl: CacheTtlConfig,
    cache_timeout: Duration,
    cascade_triggers: bool,
    // per-resource newest synchronized version; the slot's lock is held for
    // the whole sync so two syncs of one resource never interleave
    watermarks: Mutex<Watermarks>,
    watermark_retention: Duration,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn CacheStore>,
        repository: Arc<dyn ConfigRepository>,
        cache: &CacheConfig,
        sync: &SyncConfig,
    ) -> Self {
        Self {
            publisher: EventPublisher::new(store.clone(), sync),
            builder: RecordBuilder::new(repository.clone()),
            store,
            repository,
            ttl: cache.ttl.clone(),
            cache_timeout: sync.cache_timeout(),
            cascade_triggers: sync.cascade_triggers,
            watermarks: Mutex::new(Watermarks::new()),
            watermark_retention: sync.watermark_retention(),
        }
    }

    #[instrument(skip(self, committed), fields(tenant = %committed.value.tenant_id, monitor_id = %committed.value.id))]
    pub async fn sync_monitor(&self, committed: &Committed<Monitor>) -> SyncOutcome {
        self.upsert_monitor(&committed.value).await
    }

    /// Also re-synchronizes every monitor that references the trigger's
    /// current or previous slug.
    #[instrument(skip(self, committed), fields(tenant = %committed.value.tenant_id, trigger_id = %committed.value.id))]
    pub async fn sync_trigger(&self, committed: &Committed<Trigger>) -> SyncOutcome {
        let trigger = &committed.value;
        let mut outcome = self
            .write_through(
                ResourceKind::Trigger,
                TenantScope::Tenant(trigger.tenant_id.clone()),
                entity_key(ResourceKind::Trigger, trigger.id),
                trigger.id.to_string(),
                trigger.updated_at,
                async { RecordBuilder::build_trigger(trigger) },
            )
            .await;

        if outcome.state != SyncState::Superseded {
            let mut slugs = vec![trigger.slug.clone()];
            if let Some(previous) = committed.previous.as_ref().filter(|p| p.slug != trigger.slug) {
                slugs.push(previous.slug.clone());
            }
            self.cascade_monitors(&trigger.tenant_id, &slugs, &mut outcome)
                .await;
        }
        outcome
    }

    /// A slug change also removes the record under the old slug.
    #[instrument(skip(self, committed), fields(network = %committed.value.slug))]
    pub async fn sync_network(&self, committed: &Committed<Network>) -> SyncOutcome {
        let network = &committed.value;
        let entity = entity_key(ResourceKind::Network, network.id);
        let mut outcome = self
            .write_through(
                ResourceKind::Network,
                TenantScope::Platform,
                entity.clone(),
                network.slug.clone(),
                network.updated_at,
                async { RecordBuilder::build_network(network) },
            )
            .await;

        let moved = committed.previous.as_ref().filter(|p| p.slug != network.slug);
        if let (Some(previous), false) = (moved, outcome.state == SyncState::Superseded) {
            let removed = self
                .remove_through(
                    ResourceKind::Network,
                    TenantScope::Platform,
                    entity,
                    previous.resource_id(),
                    Some(previous.slug.clone()),
                    network.updated_at,
                )
                .await;
            outcome.cascaded.push(removed);
        }
        outcome
    }

    #[instrument(skip(self, committed), fields(filter_script = %committed.value.slug))]
    pub async fn sync_filter_script(&self, committed: &Committed<FilterScript>) -> SyncOutcome {
        let script = &committed.value;
        let entity = entity_key(ResourceKind::FilterScript, script.id);
        let mut outcome = self
            .write_through(
                ResourceKind::FilterScript,
                TenantScope::Platform,
                entity.clone(),
                script.slug.clone(),
                script.updated_at,
                async { RecordBuilder::build_filter_script(script) },
            )
            .await;

        let moved = committed.previous.as_ref().filter(|p| p.slug != script.slug);
        if let (Some(previous), false) = (moved, outcome.state == SyncState::Superseded) {
            let removed = self
                .remove_through(
                    ResourceKind::FilterScript,
                    TenantScope::Platform,
                    entity,
                    previous.resource_id(),
                    Some(previous.slug.clone()),
                    script.updated_at,
                )
                .await;
            outcome.cascaded.push(removed);
        }
        outcome
    }

    #[instrument(skip(self, committed), fields(tenant = %committed.value.id))]
    pub async fn sync_tenant(&self, committed: &Committed<Tenant>) -> SyncOutcome {
        let tenant = &committed.value;
        self.write_through(
            ResourceKind::Tenant,
            TenantScope::Tenant(tenant.id.clone()),
            tenant_entity_key(&tenant.id),
            tenant.id.to_string(),
            tenant.updated_at,
            async { RecordBuilder::build_tenant(tenant) },
        )
        .await
    }

    #[instrument(skip(self, committed), fields(tenant = %committed.value.tenant_id, monitor_id = %committed.value.id))]
    pub async fn remove_monitor(&self, committed: &Committed<Monitor>) -> SyncOutcome {
        let monitor = &committed.value;
        self.remove_through(
            ResourceKind::Monitor,
            TenantScope::Tenant(monitor.tenant_id.clone()),
            entity_key(ResourceKind::Monitor, monitor.id),
            Ok(monitor.resource_id()),
            Some(monitor.slug.clone()),
            committed.committed_at,
        )
        .await
    }

    /// Monitors still referencing the slug are re-synchronized and list it
    /// as missing.
    #[instrument(skip(self, committed), fields(tenant = %committed.value.tenant_id, trigger_id = %committed.value.id))]
    pub async fn remove_trigger(&self, committed: &Committed<Trigger>) -> SyncOutcome {
        let trigger = &committed.value;
        let mut outcome = self
            .remove_through(
                ResourceKind::Trigger,
                TenantScope::Tenant(trigger.tenant_id.clone()),
                entity_key(ResourceKind::Trigger, trigger.id),
                Ok(trigger.resource_id()),
                Some(trigger.slug.clone()),
                committed.committed_at,
            )
            .await;

        if outcome.state != SyncState::Superseded {
            self.cascade_monitors(&trigger.tenant_id, &[trigger.slug.clone()], &mut outcome)
                .await;
        }
        outcome
    }

    #[instrument(skip(self, committed), fields(network = %committed.value.slug))]
    pub async fn remove_network(&self, committed: &Committed<Network>) -> SyncOutcome {
        let network = &committed.value;
        self.remove_through(
            ResourceKind::Network,
            TenantScope::Platform,
            entity_key(ResourceKind::Network, network.id),
            network.resource_id(),
            Some(network.slug.clone()),
            committed.committed_at,
        )
        .await
    }

    #[instrument(skip(self, committed), fields(filter_script = %committed.value.slug))]
    pub async fn remove_filter_script(&self, committed: &Committed<FilterScript>) -> SyncOutcome {
        let script = &committed.value;
        self.remove_through(
            ResourceKind::FilterScript,
            TenantScope::Platform,
            entity_key(ResourceKind::FilterScript, script.id),
            script.resource_id(),
            Some(script.slug.clone()),
            committed.committed_at,
        )
        .await
    }

    /// Removes every key under the tenant's prefix, drops the tenant from
    /// the registry and publishes exactly one invalidate carrying the count.
    ///
    /// The invalidate is sent even when the removal failed so consumers drop
    /// what they hold; the outcome then reports `CACHE_FAILED`.
    #[instrument(skip(self), fields(tenant = %tenant))]
    pub async fn purge_tenant(&self, tenant: &TenantId) -> SyncOutcome {
        let started = Instant::now();
        let scope = TenantScope::Tenant(tenant.clone());
        let mut outcome = SyncOutcome::new(ResourceKind::Tenant, scope, tenant.to_string());
        let prefix = keys::tenant_prefix(tenant);
        outcome.key = Some(prefix.clone());

        // upserts of this tenant committed before now are stale from here on
        let marker = {
            let mut watermarks = self.watermarks.lock().await;
            let forgotten = watermarks.forget_prefix(&prefix);
            debug!("Forgot {} version watermarks of tenant {}", forgotten, tenant);
            watermarks
                .slots
                .entry(purge_marker_key(tenant))
                .or_default()
                .clone()
        };
        let mut mark = marker.lock().await;
        mark.touch();
        // stored timestamps carry microseconds
        mark.raise(Utc::now().trunc_subsecs(6));

        let mut purged = 0;
        let operation = format!("DELETE {prefix}*");
        match bounded(self.cache_timeout, &operation, self.store.delete_prefix(&prefix)).await {
            Ok(count) => {
                purged = count;
                outcome.state = SyncState::CacheWritten;
            }
            Err(e) => {
                warn!("Failed to purge cache for tenant {}: {}", tenant, e);
                outcome.state = SyncState::CacheFailed;
                outcome.warn(e.to_string());
            }
        }
        outcome.purged = Some(purged);

        let registry = keys::active_set_key(&TenantScope::Platform, ResourceKind::Tenant);
        let operation = format!("SREM {registry}");
        match bounded(
            self.cache_timeout,
            &operation,
            self.store.set_remove(&registry, tenant.as_str()),
        )
        .await
        {
            Ok(_) if outcome.state == SyncState::CacheWritten => outcome.state = SyncState::Indexed,
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to remove tenant {} from {}: {}", tenant, registry, e);
                outcome.state = SyncState::CacheFailed;
                outcome.warn(e.to_string());
            }
        }

        match self.publisher.publish(&purge_event(tenant, purged)).await {
            Ok(_) if outcome.state == SyncState::Indexed => outcome.state = SyncState::Published,
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to publish purge of tenant {}: {}", tenant, e);
                if !outcome.state.is_failure() {
                    outcome.state = SyncState::PublishFailed;
                }
                outcome.warn(e.to_string());
            }
        }

        info!("Purged {} cache entries for tenant {}", purged, tenant);
        self.finish(outcome, started)
    }

    async fn upsert_monitor(&self, monitor: &Monitor) -> SyncOutcome {
        self.write_through(
            ResourceKind::Monitor,
            TenantScope::Tenant(monitor.tenant_id.clone()),
            entity_key(ResourceKind::Monitor, monitor.id),
            monitor.id.to_string(),
            monitor.updated_at,
            self.builder.build_monitor(monitor),
        )
        .await
    }

    async fn cascade_monitors(&self, tenant: &TenantId, slugs: &[String], outcome: &mut SyncOutcome) {
        if !self.cascade_triggers {
            return;
        }

        let mut seen = HashSet::new();
        for slug in slugs {
            let monitors = match self.repository.monitors_referencing_trigger(tenant, slug).await {
                Ok(monitors) => monitors,
                Err(e) => {
                    warn!("Failed to find monitors referencing trigger '{}': {}", slug, e);
                    outcome.warn(format!("cascade lookup for '{slug}' failed: {e}"));
                    continue;
                }
            };

            for monitor in monitors.iter().filter(|m| seen.insert(m.id)) {
                debug!("Re-synchronizing monitor {} after trigger '{}' changed", monitor.id, slug);
                outcome.cascaded.push(self.upsert_monitor(monitor).await);
            }
        }
    }

    async fn watermark(&self, scope: &TenantScope, entity: &str) -> Watermark {
        let mut watermarks = self.watermarks.lock().await;
        if watermarks.last_sweep.elapsed() >= self.watermark_retention {
            watermarks.sweep(self.watermark_retention);
        }
        let key = format!("{}{entity}", keys::scope_prefix(scope));
        watermarks.slots.entry(key).or_default().clone()
    }

    /// Whether the scope's tenant was purged after `version` was committed.
    async fn purged_since(&self, scope: &TenantScope, version: DateTime<Utc>) -> bool {
        let TenantScope::Tenant(tenant) = scope else {
            return false;
        };
        let marker = self
            .watermarks
            .lock()
            .await
            .slots
            .get(&purge_marker_key(tenant))
            .cloned();
        match marker {
            Some(marker) => marker
                .lock()
                .await
                .version
                .is_some_and(|purged_at| version < purged_at),
            None => false,
        }
    }

    #[cfg(test)]
    async fn tracked_watermarks(&self) -> usize {
        self.watermarks.lock().await.slots.len()
    }

    async fn write_through<F>(
        &self,
        kind: ResourceKind,
        scope: TenantScope,
        entity: String,
        resource_id: String,
        version: DateTime<Utc>,
        build: F,
    ) -> SyncOutcome
    where
        F: Future<Output = SyncResult<BuiltRecord>>,
    {
        let started = Instant::now();
        let mut outcome = SyncOutcome::new(kind, scope, resource_id);

        let slot = self.watermark(&outcome.scope, &entity).await;
        let mut mark = slot.lock().await;
        mark.touch();
        let stale = mark.version.is_some_and(|seen| version < seen);
        if stale || self.purged_since(&outcome.scope, version).await {
            outcome.state = SyncState::Superseded;
            return self.finish(outcome, started);
        }
        mark.version = Some(version);

        outcome.state = SyncState::Denormalizing;
        let record = match build.await {
            Ok(record) => record,
            Err(e) => return self.fail(outcome, SyncState::DenormalizationFailed, e, started),
        };
        outcome.key = Some(record.key.clone());
        let ttl = self.ttl.for_kind(kind);

        let operation = format!("SET {}", record.key);
        let written = self.store.set(&record.key, &record.payload, ttl);
        if let Err(e) = bounded(self.cache_timeout, &operation, written).await {
            return self.fail(outcome, SyncState::CacheFailed, e, started);
        }
        outcome.state = SyncState::CacheWritten;

        let operation = format!("SADD {}", record.index_key);
        let indexed = self
            .store
            .set_add(&record.index_key, record.id.as_str(), Some(ttl));
        if let Err(e) = bounded(self.cache_timeout, &operation, indexed).await {
            return self.fail(outcome, SyncState::CacheFailed, e, started);
        }
        outcome.state = SyncState::Indexed;

        let event = update_event(
            kind,
            record.scope.clone(),
            record.id.to_string(),
            record.metadata.clone(),
        );
        if let Err(e) = self.publisher.publish(&event).await {
            return self.fail(outcome, SyncState::PublishFailed, e, started);
        }
        outcome.state = SyncState::Published;

        self.finish(outcome, started)
    }

    async fn remove_through(
        &self,
        kind: ResourceKind,
        scope: TenantScope,
        entity: String,
        id: SyncResult<ResourceId>,
        slug: Option<String>,
        version: DateTime<Utc>,
    ) -> SyncOutcome {
        let started = Instant::now();
        let resource_id = match (&id, &slug) {
            (Ok(id), _) => id.to_string(),
            (Err(_), Some(slug)) => slug.clone(),
            (Err(_), None) => entity.clone(),
        };
        let mut outcome = SyncOutcome::new(kind, scope.clone(), resource_id);

        let slot = self.watermark(&scope, &entity).await;
        let mut mark = slot.lock().await;
        mark.touch();
        if mark.version.is_some_and(|seen| version < seen) {
            outcome.state = SyncState::Superseded;
            return self.finish(outcome, started);
        }
        mark.version = Some(version);

        let id = match id {
            Ok(id) => id,
            Err(e) => return self.fail(outcome, SyncState::DenormalizationFailed, e, started),
        };
        let key = keys::record_key(&scope, kind, &id);
        if let Err(e) = keys::ensure_scope_key(&scope, &key) {
            return self.fail(outcome, SyncState::DenormalizationFailed, e, started);
        }
        outcome.key = Some(key.clone());

        let operation = format!("DEL {key}");
        if let Err(e) = bounded(self.cache_timeout, &operation, self.store.delete(&key)).await {
            return self.fail(outcome, SyncState::CacheFailed, e, started);
        }
        outcome.state = SyncState::CacheWritten;

        let index_key = keys::active_set_key(&scope, kind);
        let operation = format!("SREM {index_key}");
        let removed = self.store.set_remove(&index_key, id.as_str());
        if let Err(e) = bounded(self.cache_timeout, &operation, removed).await {
            return self.fail(outcome, SyncState::CacheFailed, e, started);
        }
        outcome.state = SyncState::Indexed;

        let event = delete_event(kind, scope, id.to_string(), slug.as_deref());
        if let Err(e) = self.publisher.publish(&event).await {
            return self.fail(outcome, SyncState::PublishFailed, e, started);
        }
        outcome.state = SyncState::Published;

        self.finish(outcome, started)
    }

    fn fail(
        &self,
        mut outcome: SyncOutcome,
        state: SyncState,
        err: SyncError,
        started: Instant,
    ) -> SyncOutcome {
        let key = outcome.key.as_deref().unwrap_or("-");
        match &err {
            SyncError::CrossTenantKeyViolation { .. } => error!(
                "Refusing to write {} {} outside scope {}: {}",
                outcome.kind, outcome.resource_id, outcome.scope, err
            ),
            _ => warn!(
                "Synchronization of {} {} stopped at {} (key {}): {}",
                outcome.kind, outcome.resource_id, state, key, err
            ),
        }
        outcome.state = state;
        outcome.warn(err.to_string());
        self.finish(outcome, started)
    }

    fn finish(&self, outcome: SyncOutcome, started: Instant) -> SyncOutcome {
        let elapsed = started.elapsed();
        counter!("confsync_sync_total", "kind" => outcome.kind.as_str(), "state" => outcome.state.as_str())
            .increment(1);
        histogram!("confsync_sync_duration_seconds", "kind" => outcome.kind.as_str())
            .record(elapsed.as_secs_f64());

        match outcome.state {
            SyncState::Published => info!(
                "Synchronized {} {} in {:?}",
                outcome.kind, outcome.resource_id, elapsed
            ),
            SyncState::Superseded => debug!(
                "Skipped {} {}: a newer version was already synchronized",
                outcome.kind, outcome.resource_id
            ),
            _ => {}
        }
        outcome
    }
}
