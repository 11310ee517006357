//! Change event fan-out over the cache medium's pub/sub.

use confsync_core::{
    config::SyncConfig, keys, CacheStore, ChangeEvent, ChangeEventType, ResourceKind, SyncError,
    SyncResult, TenantId, TenantScope,
};
use metrics::counter;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::timeouts::bounded;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub channels: usize,
    /// Subscribers reached, summed over channels. Zero is not an error.
    pub receivers: usize,
}

pub struct EventPublisher {
    store: Arc<dyn CacheStore>,
    timeout: Duration,
    enabled: bool,
}

impl EventPublisher {
    pub fn new(store: Arc<dyn CacheStore>, config: &SyncConfig) -> Self {
        Self {
            store,
            timeout: config.publish_timeout(),
            enabled: config.publish_enabled,
        }
    }

    /// Sends `event` once on every distinct channel for its kind and scope.
    ///
    /// Every channel is attempted even after a failure; the error lists the
    /// channels that did not accept the message.
    pub async fn publish(&self, event: &ChangeEvent) -> SyncResult<PublishReport> {
        if !self.enabled {
            debug!(
                "Publishing disabled, dropping {} event for {}",
                event.event_type, event.resource_id
            );
            return Ok(PublishReport::default());
        }

        let payload = event.to_payload()?;
        let channels = keys::channels_for(event.resource_type, &event.tenant_scope);
        let mut report = PublishReport::default();
        let mut failures = Vec::new();

        for channel in &channels {
            let operation = format!("PUBLISH {channel}");
            match bounded(self.timeout, &operation, self.store.publish(channel, &payload)).await {
                Ok(receivers) => {
                    report.channels += 1;
                    report.receivers += receivers;
                    counter!("confsync_publish_total", "event_type" => event.event_type.as_str(), "result" => "ok")
                        .increment(1);
                }
                Err(e) => {
                    warn!("Failed to publish {} event on {}: {}", event.event_type, channel, e);
                    counter!("confsync_publish_total", "event_type" => event.event_type.as_str(), "result" => "error")
                        .increment(1);
                    failures.push(format!("{channel}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            debug!(
                "Published {} {} {} to {} channel(s), {} receiver(s)",
                event.event_type,
                event.resource_type,
                event.resource_id,
                report.channels,
                report.receivers
            );
            Ok(report)
        } else {
            Err(SyncError::publish(failures.join("; ")))
        }
    }
}

/// Event announcing that the record at `(kind, scope, id)` was rewritten.
pub fn update_event(
    kind: ResourceKind,
    scope: TenantScope,
    resource_id: impl Into<String>,
    metadata: Map<String, Value>,
) -> ChangeEvent {
    ChangeEvent::new(ChangeEventType::Update, kind, resource_id, scope).with_metadata(metadata)
}

pub fn delete_event(
    kind: ResourceKind,
    scope: TenantScope,
    resource_id: impl Into<String>,
    slug: Option<&str>,
) -> ChangeEvent {
    let mut metadata = Map::new();
    if let Some(slug) = slug {
        metadata.insert("slug".to_string(), json!(slug));
    }
    ChangeEvent::new(ChangeEventType::Delete, kind, resource_id, scope).with_metadata(metadata)
}

/// Invalidation of a whole scope. Tenant invalidations travel on the tenant
/// kind channel and the tenant's own channel; the platform one only on the
/// platform channel.
pub fn invalidate_event(scope: &TenantScope, metadata: Map<String, Value>) -> ChangeEvent {
    let (kind, resource_id) = match scope {
        TenantScope::Platform => (ResourceKind::Platform, TenantScope::PLATFORM.to_string()),
        TenantScope::Tenant(tenant) => (ResourceKind::Tenant, tenant.to_string()),
    };
    ChangeEvent::new(ChangeEventType::Invalidate, kind, resource_id, scope.clone())
        .with_metadata(metadata)
}

pub fn purge_event(tenant: &TenantId, entries_deleted: usize) -> ChangeEvent {
    let mut metadata = Map::new();
    metadata.insert("entries_deleted".to_string(), json!(entries_deleted));
    metadata.insert("action".to_string(), json!("invalidate_all"));
    invalidate_event(&TenantScope::Tenant(tenant.clone()), metadata)
}

pub fn rebuild_event(scope: &TenantScope, records_written: usize) -> ChangeEvent {
    let mut metadata = Map::new();
    metadata.insert("action".to_string(), json!("rebuild"));
    metadata.insert("records_written".to_string(), json!(records_written));
    invalidate_event(scope, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_infrastructure::InMemoryCacheStore;
    use confsync_testing_utils::{tenant_id, CacheOp, FaultyCacheStore};

    fn publisher(store: &FaultyCacheStore) -> EventPublisher {
        EventPublisher::new(Arc::new(store.clone()), &SyncConfig::default())
    }

    #[tokio::test]
    async fn test_tenant_event_goes_to_kind_and_tenant_channels() {
        let store = FaultyCacheStore::new(Arc::new(InMemoryCacheStore::new()));
        let event = update_event(
            ResourceKind::Monitor,
            TenantScope::Tenant(tenant_id("t1")),
            "m1",
            Map::new(),
        );

        let report = publisher(&store).publish(&event).await.unwrap();
        assert_eq!(report.channels, 2);
        // nobody listening is fine
        assert_eq!(report.receivers, 0);

        let channels: Vec<_> = store.published().into_iter().map(|m| m.channel).collect();
        assert_eq!(channels, vec!["config:monitor:update", "config:tenant:t1:update"]);
    }

    #[tokio::test]
    async fn test_platform_invalidate_sent_once() {
        let store = FaultyCacheStore::new(Arc::new(InMemoryCacheStore::new()));
        let event = rebuild_event(&TenantScope::Platform, 3);

        publisher(&store).publish(&event).await.unwrap();

        let published = store.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].channel, "config:platform:update");
        let decoded = ChangeEvent::from_payload(&published[0].payload).unwrap();
        assert_eq!(decoded.event_type, ChangeEventType::Invalidate);
        assert_eq!(decoded.metadata["records_written"], 3);
    }

    #[tokio::test]
    async fn test_purge_event_shape() {
        let event = purge_event(&tenant_id("t1"), 7);
        assert_eq!(event.resource_type, ResourceKind::Tenant);
        assert_eq!(event.resource_id, "t1");
        assert_eq!(event.metadata["entries_deleted"], 7);
        assert_eq!(event.metadata["action"], "invalidate_all");
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let store = FaultyCacheStore::new(Arc::new(InMemoryCacheStore::new()));
        store.fail(CacheOp::Publish, true);
        let event = delete_event(ResourceKind::Network, TenantScope::Platform, "eth", Some("eth"));

        let err = publisher(&store).publish(&event).await.unwrap_err();
        assert!(matches!(err, SyncError::Publish(ref m) if m.contains("config:network:update")));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_disabled_publisher_sends_nothing() {
        let store = FaultyCacheStore::new(Arc::new(InMemoryCacheStore::new()));
        let config = SyncConfig {
            publish_enabled: false,
            ..SyncConfig::default()
        };
        let publisher = EventPublisher::new(Arc::new(store.clone()), &config);
        let event = purge_event(&tenant_id("t1"), 0);

        assert_eq!(publisher.publish(&event).await.unwrap(), PublishReport::default());
        assert!(store.published().is_empty());
    }
}
