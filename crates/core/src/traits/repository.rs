use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::SyncResult;
use crate::models::{Committed, FilterScript, Monitor, Network, Tenant, TenantId, Trigger};

/// Authoritative relational store.
///
/// Reads are used by the synchronizer and the rebuilder; writes are the
/// CRUD layer's commits. A write returns only after the transaction is durable.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn get_tenant(&self, id: &TenantId) -> SyncResult<Option<Tenant>>;
    async fn list_tenants(&self) -> SyncResult<Vec<Tenant>>;
    async fn save_tenant(&self, tenant: &Tenant) -> SyncResult<Committed<Tenant>>;
    /// Also removes the tenant's monitors and triggers.
    async fn delete_tenant(&self, id: &TenantId) -> SyncResult<Option<Committed<Tenant>>>;

    async fn get_network(&self, slug: &str) -> SyncResult<Option<Network>>;
    async fn list_networks(&self) -> SyncResult<Vec<Network>>;
    async fn save_network(&self, network: &Network) -> SyncResult<Committed<Network>>;
    async fn delete_network(&self, id: Uuid) -> SyncResult<Option<Committed<Network>>>;

    async fn get_filter_script(&self, slug: &str) -> SyncResult<Option<FilterScript>>;
    async fn list_filter_scripts(&self) -> SyncResult<Vec<FilterScript>>;
    async fn save_filter_script(&self, script: &FilterScript)
        -> SyncResult<Committed<FilterScript>>;
    async fn delete_filter_script(&self, id: Uuid) -> SyncResult<Option<Committed<FilterScript>>>;

    async fn get_monitor(&self, tenant: &TenantId, id: Uuid) -> SyncResult<Option<Monitor>>;
    async fn list_monitors(&self, tenant: &TenantId) -> SyncResult<Vec<Monitor>>;
    async fn monitors_referencing_trigger(
        &self,
        tenant: &TenantId,
        trigger_slug: &str,
    ) -> SyncResult<Vec<Monitor>>;
    async fn save_monitor(&self, monitor: &Monitor) -> SyncResult<Committed<Monitor>>;
    async fn delete_monitor(&self, tenant: &TenantId, id: Uuid)
        -> SyncResult<Option<Committed<Monitor>>>;

    async fn get_trigger(&self, tenant: &TenantId, id: Uuid) -> SyncResult<Option<Trigger>>;
    async fn list_triggers(&self, tenant: &TenantId) -> SyncResult<Vec<Trigger>>;
    /// Triggers of `tenant` whose slug is in `slugs`, in any order.
    async fn triggers_by_slugs(&self, tenant: &TenantId, slugs: &[String])
        -> SyncResult<Vec<Trigger>>;
    async fn save_trigger(&self, trigger: &Trigger) -> SyncResult<Committed<Trigger>>;
    async fn delete_trigger(&self, tenant: &TenantId, id: Uuid)
        -> SyncResult<Option<Committed<Trigger>>>;

    async fn health_check(&self) -> SyncResult<bool>;
}
