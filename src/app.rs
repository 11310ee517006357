use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use confsync_core::{AppConfig, ConfigRepository, TenantId};
use confsync_domain::{
    CacheRebuilder, ConfigMirror, ConfigReader, ConfigWriteService, PollingRefresher,
    PushSubscriber, RebuildReport, SyncOutcome, Synchronizer,
};
use confsync_infrastructure::{create_cache_store, CacheHandles, DatabaseManager};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// `watch` 命令的运行选项
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub push: bool,
    pub poll: bool,
    pub tenants: Vec<TenantId>,
}

impl WatchOptions {
    /// 命令行未选择任何策略时使用配置中的开关
    pub fn resolve(self, config: &AppConfig) -> Result<Self> {
        let (push, poll) = if self.push || self.poll {
            (self.push, self.poll)
        } else {
            (config.consumer.push_enabled, config.consumer.poll_enabled)
        };
        if !push && !poll {
            return Err(anyhow::anyhow!("推送和轮询均被禁用，请检查配置"));
        }

        let tenants = if self.tenants.is_empty() {
            config.consumer.tenant_ids()?
        } else {
            self.tenants
        };
        Ok(Self { push, poll, tenants })
    }
}

/// 主应用程序：持有缓存介质和权威存储，并按需组装同步组件
pub struct Application {
    config: AppConfig,
    cache: CacheHandles,
    database: DatabaseManager,
    synchronizer: Arc<Synchronizer>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序");

        let cache = create_cache_store(&config.cache)
            .await
            .context("连接缓存介质失败")?;

        let database = DatabaseManager::new(&config.database)
            .await
            .context("创建数据库连接池失败")?;
        database.migrate().await.context("数据库迁移失败")?;

        let synchronizer = Arc::new(Synchronizer::new(
            cache.store.clone(),
            database.config_repository(),
            &config.cache,
            &config.sync,
        ));

        Ok(Self {
            config,
            cache,
            database,
            synchronizer,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheHandles {
        &self.cache
    }

    pub fn repository(&self) -> Arc<dyn ConfigRepository> {
        self.database.config_repository()
    }

    /// 请求处理层使用的写入入口
    pub fn write_service(&self) -> ConfigWriteService {
        ConfigWriteService::new(
            self.repository(),
            Arc::clone(&self.synchronizer),
            self.config.sync.enabled,
        )
    }

    pub fn rebuilder(&self) -> CacheRebuilder {
        CacheRebuilder::new(
            self.cache.store.clone(),
            self.repository(),
            &self.config.cache,
            &self.config.sync,
        )
    }

    /// 重建全部缓存，或只重建一个租户
    pub async fn rebuild(&self, tenant: Option<&TenantId>) -> Result<RebuildReport> {
        let rebuilder = self.rebuilder();
        let report = match tenant {
            Some(tenant) => rebuilder
                .rebuild_tenant(tenant)
                .await
                .with_context(|| format!("重建租户缓存失败: {tenant}"))?,
            None => rebuilder.rebuild_all().await.context("重建缓存失败")?,
        };
        Ok(report)
    }

    pub async fn purge_tenant(&self, tenant: &TenantId) -> SyncOutcome {
        self.synchronizer.purge_tenant(tenant).await
    }

    /// 检查缓存介质和权威存储的连通性
    pub async fn check(&self) -> Result<()> {
        let cache_ok = self
            .cache
            .store
            .health_check()
            .await
            .context("缓存健康检查失败")?;
        if !cache_ok {
            return Err(anyhow::anyhow!("缓存介质不可用"));
        }
        self.database
            .health_check()
            .await
            .context("数据库健康检查失败")?;
        info!("缓存介质和权威存储均可用");
        Ok(())
    }

    /// 常驻运行：可选的启动重建，然后按间隔执行运维重建直到关闭
    pub async fn serve(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if !self.config.sync.enabled {
            warn!("缓存同步已禁用，写入只会提交到权威存储");
        } else if self.config.sync.rebuild_on_start {
            match self.rebuild(None).await {
                Ok(report) => info!("启动重建完成: {}", report),
                Err(e) => error!("启动重建失败: {:#}", e),
            }
        }

        let Some(period) = self.config.sync.rebuild_interval() else {
            info!("同步层已就绪，未配置定期重建");
            let _ = shutdown_rx.recv().await;
            info!("同步层收到关闭信号");
            return Ok(());
        };

        info!("同步层已就绪，每 {:?} 执行一次重建", period);
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.rebuild(None).await {
                        Ok(report) => info!("定期重建完成: {}", report),
                        Err(e) => error!("定期重建失败: {:#}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("同步层收到关闭信号");
                    break;
                }
            }
        }
        Ok(())
    }

    /// 运行消费端策略，把缓存镜像到进程内直到关闭
    pub async fn watch(
        &self,
        options: WatchOptions,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Arc<ConfigMirror>> {
        let options = options.resolve(&self.config)?;
        info!(
            "启动消费端: push={}, poll={}, tenants={:?}",
            options.push, options.poll, options.tenants
        );

        let reader = ConfigReader::new(self.cache.store.clone());
        let mirror = Arc::new(ConfigMirror::new(reader.clone(), options.tenants.clone()));
        let mut handles = Vec::new();

        if options.push {
            let push = PushSubscriber::new(
                self.cache.subscriber.clone(),
                mirror.clone(),
                &options.tenants,
                &self.config.consumer,
            );
            let shutdown_rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move { push.run(shutdown_rx).await }));
        }

        if options.poll {
            let poller = PollingRefresher::new(
                reader,
                mirror.clone(),
                options.tenants.clone(),
                &self.config.consumer,
            );
            let shutdown_rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move { poller.run(shutdown_rx).await }));
        } else if let Err(e) = mirror.refresh().await {
            // 仅推送时需要一次初始快照
            warn!("初始快照失败: {}", e);
        }

        let _ = shutdown_rx.recv().await;
        info!("消费端收到关闭信号，镜像中有 {} 条记录", mirror.len().await);

        for handle in handles {
            if let Err(e) = handle.await {
                error!("消费端任务异常退出: {}", e);
            }
        }
        Ok(mirror)
    }

    pub async fn close(&self) {
        self.database.close().await;
    }
}

/// 关闭超时
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
