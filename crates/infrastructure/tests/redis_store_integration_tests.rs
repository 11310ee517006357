use std::time::Duration;

use anyhow::Result;
use confsync_core::config::{CacheBackend, CacheConfig};
use confsync_core::{
    CacheStore, ChangeEvent, ChangeEventType, ChangeSubscriber, ResourceKind, TenantId, TenantScope,
};
use confsync_infrastructure::RedisCacheStore;
use confsync_testing_utils::{next_event, RedisTestContainer};

fn config(url: &str, key_prefix: Option<&str>) -> CacheConfig {
    CacheConfig {
        backend: CacheBackend::Redis,
        redis_url: url.to_string(),
        key_prefix: key_prefix.map(str::to_string),
        ..CacheConfig::default()
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_key_value_and_sets() -> Result<()> {
    let redis = RedisTestContainer::new().await?;
    let store = RedisCacheStore::new(&config(&redis.url, None)).await?;
    assert!(store.health_check().await?);

    store
        .set("tenant:t1:monitor:m1", b"{\"a\":1}", Duration::from_secs(60))
        .await?;
    assert_eq!(
        store.get("tenant:t1:monitor:m1").await?,
        Some(b"{\"a\":1}".to_vec())
    );

    store
        .set_add("tenant:t1:monitor:active", "m1", Some(Duration::from_secs(60)))
        .await?;
    store.set_add("tenant:t1:monitor:active", "m2", None).await?;
    let mut members = store.set_members("tenant:t1:monitor:active").await?;
    members.sort();
    assert_eq!(members, vec!["m1", "m2"]);

    store
        .set_replace("tenant:t1:monitor:active", &["m3".to_string()], None)
        .await?;
    assert_eq!(store.set_members("tenant:t1:monitor:active").await?, vec!["m3"]);
    assert!(store.set_remove("tenant:t1:monitor:active", "m3").await?);

    assert!(store.delete("tenant:t1:monitor:m1").await?);
    assert!(!store.delete("tenant:t1:monitor:m1").await?);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_prefix_delete_stays_inside_tenant() -> Result<()> {
    let redis = RedisTestContainer::new().await?;
    let store = RedisCacheStore::new(&config(&redis.url, Some("staging"))).await?;

    for key in [
        "tenant:t1:monitor:m1",
        "tenant:t1:trigger:x",
        "tenant:t10:monitor:m1",
        "tenant:t2:monitor:m1",
    ] {
        store.set(key, b"{}", Duration::from_secs(60)).await?;
    }

    assert_eq!(store.delete_prefix("tenant:t1:").await?, 2);
    let mut left = store.keys_with_prefix("tenant:").await?;
    left.sort();
    assert_eq!(left, vec!["tenant:t10:monitor:m1", "tenant:t2:monitor:m1"]);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_pubsub_round_trip() -> Result<()> {
    let redis = RedisTestContainer::new().await?;
    let store = RedisCacheStore::new(&config(&redis.url, None)).await?;

    let mut stream = store
        .subscribe(&["config:tenant:t1:update".to_string()])
        .await?;
    // the subscription is confirmed asynchronously
    tokio::time::sleep(Duration::from_millis(200)).await;

    let event = ChangeEvent::new(
        ChangeEventType::Update,
        ResourceKind::Monitor,
        "m1",
        TenantScope::Tenant(TenantId::parse("t1")?),
    );
    let receivers = store
        .publish("config:tenant:t1:update", &event.to_payload()?)
        .await?;
    assert_eq!(receivers, 1);

    let received = next_event(&mut stream, Duration::from_secs(2)).await.unwrap();
    assert_eq!(received, event);

    Ok(())
}
