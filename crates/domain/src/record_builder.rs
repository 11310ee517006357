//! Fetches what a cache record embeds and runs the denormalizer.
//!
//! Both the write-through path and the rebuilder go through here, so a
//! record written by either is byte-identical for the same authoritative
//! state.

use confsync_core::{
    keys, ConfigRepository, FilterScript, Monitor, Network, ResourceId, ResourceKind, SyncResult,
    Tenant, TenantScope, TenantStatus, Trigger,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::denormalizer::{unique_slugs, Denormalizer};
use crate::records::CacheRecord;

/// A serialized record plus everything needed to store, index and announce it.
#[derive(Debug, Clone)]
pub struct BuiltRecord {
    pub kind: ResourceKind,
    pub scope: TenantScope,
    pub id: ResourceId,
    pub key: String,
    pub index_key: String,
    pub payload: Vec<u8>,
    /// Event metadata for an upsert of this record.
    pub metadata: Map<String, Value>,
}

impl BuiltRecord {
    fn new(
        scope: TenantScope,
        id: ResourceId,
        record: &CacheRecord,
        metadata: Map<String, Value>,
    ) -> SyncResult<Self> {
        let kind = record.kind();
        let key = keys::record_key(&scope, kind, &id);
        keys::ensure_scope_key(&scope, &key)?;

        // the tenant registry is shared, every other index lives in the record's scope
        let index_key = match kind {
            ResourceKind::Tenant => keys::active_set_key(&TenantScope::Platform, kind),
            _ => keys::active_set_key(&scope, kind),
        };

        Ok(Self {
            kind,
            scope,
            id,
            key,
            index_key,
            payload: record.to_json_bytes()?,
            metadata,
        })
    }
}

fn flags(name: &str, slug: &str, active: bool, validated: bool) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("name".to_string(), json!(name));
    metadata.insert("slug".to_string(), json!(slug));
    metadata.insert("active".to_string(), json!(active));
    metadata.insert("validated".to_string(), json!(validated));
    metadata
}

#[derive(Clone)]
pub struct RecordBuilder {
    repository: Arc<dyn ConfigRepository>,
}

impl RecordBuilder {
    pub fn new(repository: Arc<dyn ConfigRepository>) -> Self {
        Self { repository }
    }

    /// Fetches the monitor's referenced triggers, then builds the record.
    pub async fn build_monitor(&self, monitor: &Monitor) -> SyncResult<BuiltRecord> {
        let slugs = unique_slugs(&monitor.trigger_slugs);
        let triggers = if slugs.is_empty() {
            Vec::new()
        } else {
            self.repository
                .triggers_by_slugs(&monitor.tenant_id, &slugs)
                .await?
        };
        Self::build_monitor_with(monitor, &triggers)
    }

    /// `triggers` may hold more than the monitor references; extra ones are ignored.
    pub fn build_monitor_with(monitor: &Monitor, triggers: &[Trigger]) -> SyncResult<BuiltRecord> {
        let record = Denormalizer::monitor(monitor, triggers)?;
        let mut metadata = flags(&record.name, &record.slug, record.active, record.validated);
        metadata.insert("paused".to_string(), json!(record.paused));
        metadata.insert("trigger_count".to_string(), json!(record.trigger_count));

        BuiltRecord::new(
            TenantScope::Tenant(monitor.tenant_id.clone()),
            monitor.resource_id(),
            &CacheRecord::Monitor(Box::new(record)),
            metadata,
        )
    }

    pub fn build_trigger(trigger: &Trigger) -> SyncResult<BuiltRecord> {
        let record = Denormalizer::trigger(trigger)?;
        let mut metadata = flags(&record.name, &record.slug, record.active, record.validated);
        metadata.insert("trigger_type".to_string(), json!(record.trigger_type));

        BuiltRecord::new(
            TenantScope::Tenant(trigger.tenant_id.clone()),
            trigger.resource_id(),
            &CacheRecord::Trigger(record),
            metadata,
        )
    }

    pub fn build_network(network: &Network) -> SyncResult<BuiltRecord> {
        let id = network.resource_id()?;
        let record = Denormalizer::network(network);
        let metadata = flags(&record.name, &record.slug, record.active, record.validated);

        BuiltRecord::new(
            TenantScope::Platform,
            id,
            &CacheRecord::Network(record),
            metadata,
        )
    }

    pub fn build_filter_script(script: &FilterScript) -> SyncResult<BuiltRecord> {
        let id = script.resource_id()?;
        let record = Denormalizer::filter_script(script);
        let metadata = flags(&record.name, &record.slug, record.active, record.validated);

        BuiltRecord::new(
            TenantScope::Platform,
            id,
            &CacheRecord::FilterScript(record),
            metadata,
        )
    }

    /// The tenant's own record lives inside its prefix so a purge removes it.
    pub fn build_tenant(tenant: &Tenant) -> SyncResult<BuiltRecord> {
        let record = Denormalizer::tenant(tenant);
        let mut metadata = Map::new();
        metadata.insert("name".to_string(), json!(record.name));
        metadata.insert("slug".to_string(), json!(record.slug));
        metadata.insert("status".to_string(), json!(record.status));
        metadata.insert(
            "active".to_string(),
            json!(tenant.status == TenantStatus::Active),
        );

        BuiltRecord::new(
            TenantScope::Tenant(tenant.id.clone()),
            ResourceId::parse(tenant.id.as_str())?,
            &CacheRecord::Tenant(record),
            metadata,
        )
    }
}
