use anyhow::Result;
use confsync_core::{ConfigRepository, TenantId};
use confsync_testing_utils::{
    tenant_id, MonitorBuilder, NetworkBuilder, PostgresTestContainer, TenantBuilder,
    TriggerBuilder,
};

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_postgres_commit_semantics() -> Result<()> {
    let container = PostgresTestContainer::new().await?;
    container.run_migrations().await?;
    let repo = container.repository();

    let tenant = repo.save_tenant(&TenantBuilder::new("t1").build()).await?;
    assert!(tenant.is_create());

    let monitor = MonitorBuilder::new(tenant_id("t1"))
        .with_trigger_slugs(&["email-ops"])
        .build();
    let first = repo.save_monitor(&monitor).await?;
    let mut edited = first.value.clone();
    edited.paused = true;
    let second = repo.save_monitor(&edited).await?;

    assert_eq!(second.previous.map(|p| p.paused), Some(false));
    assert_eq!(second.value.created_at, first.value.created_at);
    let stored = repo.get_monitor(&tenant_id("t1"), monitor.id).await?.unwrap();
    assert_eq!(stored, second.value);

    assert_eq!(container.get_table_count("monitors").await?, 1);
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_postgres_trigger_lookups() -> Result<()> {
    let container = PostgresTestContainer::new().await?;
    container.run_migrations().await?;
    let repo = container.repository();
    let t1 = tenant_id("t1");

    repo.save_trigger(&TriggerBuilder::email(t1.clone(), "email-ops").build())
        .await?;
    repo.save_trigger(&TriggerBuilder::webhook(t1.clone(), "slack-hook").build())
        .await?;
    repo.save_monitor(
        &MonitorBuilder::new(t1.clone())
            .with_trigger_slugs(&["slack-hook"])
            .build(),
    )
    .await?;

    let found = repo
        .triggers_by_slugs(&t1, &["slack-hook".to_string(), "missing".to_string()])
        .await?;
    assert_eq!(found.len(), 1);
    assert_eq!(repo.monitors_referencing_trigger(&t1, "slack-hook").await?.len(), 1);
    assert!(repo
        .monitors_referencing_trigger(&t1, "email-ops")
        .await?
        .is_empty());

    // another tenant sees none of it
    let t2 = TenantId::parse("t2")?;
    assert!(repo.list_triggers(&t2).await?.is_empty());
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_postgres_platform_resources_and_tenant_delete() -> Result<()> {
    let container = PostgresTestContainer::new().await?;
    container.run_migrations().await?;
    let repo = container.repository();

    repo.save_network(&NetworkBuilder::new("ethereum-mainnet").build())
        .await?;
    assert!(repo.get_network("ethereum-mainnet").await?.is_some());

    repo.save_tenant(&TenantBuilder::new("t1").build()).await?;
    repo.save_monitor(&MonitorBuilder::new(tenant_id("t1")).build())
        .await?;

    let deleted = repo.delete_tenant(&tenant_id("t1")).await?;
    assert!(deleted.is_some());
    assert!(repo.list_monitors(&tenant_id("t1")).await?.is_empty());
    assert_eq!(container.get_table_count("networks").await?, 1);

    container.clean_tables().await?;
    assert_eq!(container.get_table_count("networks").await?, 0);
    Ok(())
}
