use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use confsync::app::{Application, WatchOptions, SHUTDOWN_TIMEOUT};
use confsync::observability::{init_logging, init_metrics};
use confsync::shutdown::ShutdownManager;
use confsync_core::{AppConfig, TenantId};
use tokio::signal;
use tracing::{error, info, warn};

/// 配置缓存同步层
#[derive(Parser, Debug)]
#[command(name = "confsync")]
#[command(version)]
#[command(about = "配置缓存同步层 - 权威存储与共享缓存之间的写穿同步")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short = 'l', long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, global = true, value_parser = ["json", "pretty", "compact"])]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 从权威存储重建缓存并打印报告
    Rebuild {
        /// 只重建这个租户
        #[arg(long)]
        tenant: Option<String>,
    },
    /// 清空一个租户的全部缓存
    PurgeTenant {
        tenant: String,
    },
    /// 运行消费端策略直到Ctrl+C
    Watch {
        /// 启用推送订阅
        #[arg(long)]
        push: bool,
        /// 启用定期轮询
        #[arg(long)]
        poll: bool,
        /// 关注的租户，可重复
        #[arg(long = "tenant")]
        tenants: Vec<String>,
    },
    /// 常驻运行同步层（默认）
    Serve,
    /// 检查缓存介质和权威存储的连通性
    Check,
}

fn parse_tenant(raw: &str) -> Result<TenantId> {
    TenantId::parse(raw).with_context(|| format!("无效的租户ID: {raw}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载配置失败".to_string(),
    })?;

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.observability.log_format.clone());
    init_logging(&log_level, &log_format)?;
    init_metrics(&config.observability)?;

    let app = Application::new(config).await?;
    let command = cli.command.unwrap_or(Commands::Serve);

    let result = match command {
        Commands::Rebuild { tenant } => {
            let tenant = tenant.as_deref().map(parse_tenant).transpose()?;
            let report = app.rebuild(tenant.as_ref()).await?;
            println!("{report}");
            if report.is_clean() {
                Ok(())
            } else {
                Err(anyhow::anyhow!("重建完成但有 {} 条记录失败", report.failures))
            }
        }
        Commands::PurgeTenant { tenant } => {
            let tenant = parse_tenant(&tenant)?;
            let outcome = app.purge_tenant(&tenant).await;
            println!(
                "租户 {}: 删除 {} 个键, 状态 {}",
                tenant,
                outcome.purged.unwrap_or(0),
                outcome.state
            );
            if outcome.is_clean() {
                Ok(())
            } else {
                Err(anyhow::anyhow!("清空未完成: {}", outcome.warnings().join("; ")))
            }
        }
        Commands::Check => app.check().await,
        Commands::Watch {
            push,
            poll,
            tenants,
        } => {
            let tenants = tenants
                .iter()
                .map(|t| parse_tenant(t))
                .collect::<Result<Vec<_>>>()?;
            let options = WatchOptions {
                push,
                poll,
                tenants,
            };
            run_until_shutdown(Arc::new(app), move |app, rx| async move {
                app.watch(options, rx).await.map(|_| ())
            })
            .await
        }
        Commands::Serve => {
            run_until_shutdown(Arc::new(app), |app, rx| async move { app.serve(rx).await }).await
        }
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

/// 在后台运行长驻命令，收到信号后广播关闭并等待其退出
async fn run_until_shutdown<F, Fut>(app: Arc<Application>, run: F) -> Result<()>
where
    F: FnOnce(Arc<Application>, tokio::sync::broadcast::Receiver<()>) -> Fut,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;
    let mut handle = tokio::spawn(run(Arc::clone(&app), shutdown_rx));

    tokio::select! {
        // 命令自行结束（例如配置错误）
        result = &mut handle => {
            app.close().await;
            return result.context("任务异常退出")?;
        }
        _ = wait_for_shutdown_signal() => {}
    }

    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    let result = match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
        Ok(joined) => joined.context("任务异常退出")?,
        Err(_) => {
            warn!("关闭超时，强制退出");
            Ok(())
        }
    };

    app.close().await;
    info!("confsync已退出");
    result
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
