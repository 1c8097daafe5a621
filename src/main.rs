use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orchestrator::app::Application;
use orchestrator::shutdown::ShutdownManager;
use orchestrator_core::{init_logging, AppConfig, LogFormat, LogLevel};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "orchestrator", version, about = "集群作业编排器：状态协调引擎")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// 日志格式 (json|pretty)，覆盖配置文件
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 恢复检查点并运行周期清理，直到收到关闭信号
    Serve,
    /// 按顺序回放 JSON Lines 事件文件
    Replay {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载默认配置失败".to_string(),
    })?;

    let level: LogLevel = cli
        .log_level
        .as_deref()
        .unwrap_or(config.logging.level.as_str())
        .parse()?;
    let format: LogFormat = cli
        .log_format
        .as_deref()
        .unwrap_or(config.logging.format.as_str())
        .parse()?;
    init_logging(level, format)?;

    info!("启动集群作业编排器");
    if let Some(path) = &cli.config {
        info!("配置文件: {path}");
    }

    let app = Application::new(config);
    let restored = app.restore().await?;
    info!(restored, "检查点恢复完成");

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(app).await?,
        Commands::Replay { file } => {
            let stats = app.replay(&file).await?;
            info!(
                applied = stats.applied,
                rejected = stats.rejected,
                pruned = stats.pruned,
                "回放结束"
            );
        }
    }

    info!("集群作业编排器已退出");
    Ok(())
}

async fn serve(app: Application) -> Result<()> {
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let app = Arc::new(app);
        let shutdown_rx = shutdown_manager.subscribe().await;

        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await?;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("安装SIGTERM信号处理器失败")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("安装Ctrl+C信号处理器失败")?;
                info!("收到Ctrl+C信号");
            }
            _ = terminate.recv() => info!("收到SIGTERM信号"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.context("安装Ctrl+C信号处理器失败")?;
        info!("收到Ctrl+C信号");
    }

    Ok(())
}
