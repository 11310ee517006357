//! End-to-end scenarios through the application wiring: SQLite in memory as
//! the authoritative store and the in-process cache medium.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use confsync::Application;
use confsync_core::config::CacheBackend;
use confsync_core::{keys, AppConfig, CacheStore, ChangeEventType, TenantScope};
use confsync_domain::SyncState;
use confsync_testing_utils::{
    drain_events, next_event, tenant_id, MonitorBuilder, NetworkBuilder, TenantBuilder,
    TriggerBuilder,
};
use serde_json::Value;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = "sqlite::memory:".to_string();
    config.cache.backend = CacheBackend::Memory;
    config
}

async fn app() -> Result<Application> {
    Application::new(test_config()).await
}

/// Every key with its bytes, and every active set with its sorted members.
async fn cache_contents(
    store: &Arc<dyn CacheStore>,
) -> Result<(BTreeMap<String, Vec<u8>>, BTreeMap<String, Vec<String>>)> {
    let mut records = BTreeMap::new();
    let mut sets = BTreeMap::new();
    for prefix in [keys::PLATFORM_PREFIX, keys::TENANT_PREFIX] {
        for key in store.keys_with_prefix(prefix).await? {
            if key.ends_with(":active") {
                let mut members = store.set_members(&key).await?;
                members.sort();
                sets.insert(key, members);
            } else if let Some(bytes) = store.get(&key).await? {
                records.insert(key, bytes);
            }
        }
    }
    Ok((records, sets))
}

#[tokio::test]
async fn test_monitor_with_two_triggers_is_denormalized_and_announced() -> Result<()> {
    let app = app().await?;
    let service = app.write_service();
    let t1 = tenant_id("t1");

    service.save_tenant(&TenantBuilder::new("t1").build()).await?;
    service
        .save_trigger(&TriggerBuilder::email(t1.clone(), "email-ops").build())
        .await?;
    service
        .save_trigger(&TriggerBuilder::webhook(t1.clone(), "slack-hook").build())
        .await?;

    let mut events = app
        .cache()
        .subscriber
        .subscribe(&["config:monitor:update".to_string(), keys::tenant_channel(&t1)])
        .await?;

    let receipt = service
        .save_monitor(
            &MonitorBuilder::new(t1.clone())
                .with_trigger_slugs(&["slack-hook", "email-ops"])
                .build(),
        )
        .await?;
    assert!(receipt.sync.as_ref().is_some_and(|s| s.is_clean()));

    let store = &app.cache().store;
    let key = format!("tenant:t1:monitor:{}", receipt.value.id);
    let record: Value = serde_json::from_slice(&store.get(&key).await?.unwrap())?;
    let slugs: Vec<_> = record["triggers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["slug"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(slugs, vec!["slack-hook", "email-ops"]);
    assert_eq!(record["trigger_count"], 2);

    let members = store.set_members("tenant:t1:monitor:active").await?;
    assert_eq!(members, vec![receipt.value.id.to_string()]);

    // once per channel
    let received = drain_events(&mut events, Duration::from_millis(100)).await;
    assert_eq!(received.len(), 2);
    assert!(received
        .iter()
        .all(|e| e.event_type == ChangeEventType::Update
            && e.resource_id == receipt.value.id.to_string()));
    Ok(())
}

#[tokio::test]
async fn test_delete_removes_record_and_index_entry() -> Result<()> {
    let app = app().await?;
    let service = app.write_service();
    let t1 = tenant_id("t1");

    let saved = service.save_monitor(&MonitorBuilder::new(t1.clone()).build()).await?;
    let mut events = app
        .cache()
        .subscriber
        .subscribe(&[keys::tenant_channel(&t1)])
        .await?;

    let receipt = service.delete_monitor(&t1, saved.value.id).await?;
    assert_eq!(receipt.sync.map(|s| s.state), Some(SyncState::Published));

    let store = &app.cache().store;
    let key = format!("tenant:t1:monitor:{}", saved.value.id);
    assert!(store.get(&key).await?.is_none());
    assert!(store.set_members("tenant:t1:monitor:active").await?.is_empty());

    let event = next_event(&mut events, Duration::from_secs(1)).await.unwrap();
    assert_eq!(event.event_type, ChangeEventType::Delete);
    assert_eq!(event.metadata["slug"], "large-usdc-transfers");
    Ok(())
}

#[tokio::test]
async fn test_tenant_purge_is_complete_and_isolated() -> Result<()> {
    let app = app().await?;
    let service = app.write_service();

    for tenant in ["t1", "t2"] {
        service.save_tenant(&TenantBuilder::new(tenant).build()).await?;
        service
            .save_trigger(&TriggerBuilder::email(tenant_id(tenant), "email-ops").build())
            .await?;
        service
            .save_monitor(
                &MonitorBuilder::new(tenant_id(tenant))
                    .with_trigger_slugs(&["email-ops"])
                    .build(),
            )
            .await?;
    }

    let store = &app.cache().store;
    let t2_before = cache_contents(store).await?;

    let mut events = app
        .cache()
        .subscriber
        .subscribe(&[
            keys::tenant_channel(&tenant_id("t1")),
            keys::kind_channel(confsync_core::ResourceKind::Tenant),
        ])
        .await?;

    let receipt = service.delete_tenant(&tenant_id("t1")).await?;
    let outcome = receipt.sync.unwrap();
    assert!(outcome.is_clean());
    assert_eq!(outcome.purged, Some(5));

    assert!(store.keys_with_prefix("tenant:t1:").await?.is_empty());
    assert_eq!(store.set_members("platform:tenant:active").await?, vec!["t2"]);

    // t2 untouched
    let after = cache_contents(store).await?;
    let t2_only = |(records, _): &(BTreeMap<String, Vec<u8>>, BTreeMap<String, Vec<String>>)| {
        records
            .iter()
            .filter(|(k, _)| k.starts_with("tenant:t2:"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<BTreeMap<_, _>>()
    };
    assert_eq!(t2_only(&t2_before), t2_only(&after));

    // a single invalidate, delivered on both tenant channels
    let received = drain_events(&mut events, Duration::from_millis(100)).await;
    assert_eq!(received.len(), 2);
    for event in &received {
        assert_eq!(event.event_type, ChangeEventType::Invalidate);
        assert_eq!(event.metadata["entries_deleted"], 5);
        assert_eq!(event.tenant_scope, TenantScope::Tenant(tenant_id("t1")));
    }
    assert_eq!(received[0].timestamp, received[1].timestamp);
    Ok(())
}

#[tokio::test]
async fn test_rebuild_reproduces_write_through_state() -> Result<()> {
    let app = app().await?;
    let service = app.write_service();
    let t1 = tenant_id("t1");

    service
        .save_network(&NetworkBuilder::new("ethereum-mainnet").build())
        .await?;
    service.save_tenant(&TenantBuilder::new("t1").build()).await?;
    service
        .save_trigger(&TriggerBuilder::email(t1.clone(), "email-ops").build())
        .await?;
    service
        .save_monitor(
            &MonitorBuilder::new(t1.clone())
                .with_trigger_slugs(&["email-ops", "not-yet-created"])
                .build(),
        )
        .await?;

    let store = &app.cache().store;
    let written = cache_contents(store).await?;
    assert!(!written.0.is_empty());

    store.delete_prefix(keys::PLATFORM_PREFIX).await?;
    store.delete_prefix(keys::TENANT_PREFIX).await?;

    let report = app.rebuild(None).await?;
    assert!(report.is_clean());
    assert_eq!(report.records_written, written.0.len());
    assert_eq!(cache_contents(store).await?, written);

    // a second rebuild changes nothing
    let again = app.rebuild(None).await?;
    assert_eq!(again.stale_keys_removed, 0);
    assert_eq!(cache_contents(store).await?, written);
    Ok(())
}

#[tokio::test]
async fn test_rebuild_removes_keys_without_authoritative_rows() -> Result<()> {
    let app = app().await?;
    let service = app.write_service();
    service.save_tenant(&TenantBuilder::new("t1").build()).await?;

    let store = &app.cache().store;
    store
        .set("tenant:t1:monitor:ghost", b"{}", Duration::from_secs(60))
        .await?;
    store
        .set("tenant:gone:monitor:m1", b"{}", Duration::from_secs(60))
        .await?;

    let report = app.rebuild(None).await?;
    assert!(store.get("tenant:t1:monitor:ghost").await?.is_none());
    assert!(store.keys_with_prefix("tenant:gone:").await?.is_empty());
    assert_eq!(report.stale_keys_removed, 2);
    Ok(())
}

#[tokio::test]
async fn test_trigger_edit_refreshes_embedding_monitors() -> Result<()> {
    let app = app().await?;
    let service = app.write_service();
    let t1 = tenant_id("t1");

    let trigger = service
        .save_trigger(&TriggerBuilder::email(t1.clone(), "email-ops").build())
        .await?;
    let monitor = service
        .save_monitor(
            &MonitorBuilder::new(t1.clone())
                .with_trigger_slugs(&["email-ops"])
                .build(),
        )
        .await?;

    let mut renamed = trigger.value.clone();
    renamed.name = "Ops mailbox".to_string();
    let receipt = service.save_trigger(&renamed).await?;
    assert_eq!(receipt.sync.map(|s| s.cascaded.len()), Some(1));

    let key = format!("tenant:t1:monitor:{}", monitor.value.id);
    let record: Value =
        serde_json::from_slice(&app.cache().store.get(&key).await?.unwrap())?;
    assert_eq!(record["triggers"][0]["name"], "Ops mailbox");
    Ok(())
}

#[tokio::test]
async fn test_sync_disabled_leaves_cache_alone() -> Result<()> {
    let mut config = test_config();
    config.sync.enabled = false;
    let app = Application::new(config).await?;
    let service = app.write_service();

    service.save_tenant(&TenantBuilder::new("t1").build()).await?;
    let receipt = service
        .save_monitor(&MonitorBuilder::new(tenant_id("t1")).build())
        .await?;
    assert!(receipt.sync.is_none());
    assert!(app
        .cache()
        .store
        .keys_with_prefix(keys::TENANT_PREFIX)
        .await?
        .is_empty());

    // the rebuilder still picks it up
    let report = app.rebuild(None).await?;
    assert_eq!(report.records_written, 2);
    Ok(())
}

#[tokio::test]
async fn test_check_reports_healthy_backends() -> Result<()> {
    let app = app().await?;
    app.check().await
}
