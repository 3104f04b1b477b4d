//! 订单积分对账服务入口
//!
//! 连接订单库与积分计算系统，启动对账管道，收到退出信号后优雅关闭。

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use loyalty_shared::{
    config::{AppConfig, normalize_base_url},
    observability,
};
use tokio::signal;
use tracing::info;

use accrual_reconciler::{
    client::AccrualClient, pipeline::AccrualPipeline, repository::PgOrderStore,
};

/// 命令行参数，优先级高于配置文件与环境变量
#[derive(Parser, Debug)]
#[command(name = "accrual-reconciler")]
#[command(version, about = "订单积分对账服务")]
struct Cli {
    /// 积分计算系统地址
    #[arg(short = 'r', long)]
    accrual_address: Option<String>,

    /// 订单库连接串
    #[arg(short = 'd', long)]
    database_uri: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. 加载配置并叠加命令行参数
    let mut config = AppConfig::load("accrual-reconciler")?;
    if let Some(addr) = cli.accrual_address {
        config.accrual.base_url = normalize_base_url(&addr);
    }
    if let Some(uri) = cli.database_uri {
        config.database.url = uri;
    }
    config.validate()?;

    // 2. 可观测性
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!("Starting accrual-reconciler...");
    info!(
        environment = %config.environment,
        accrual = %config.accrual.base_url,
        "Configuration loaded"
    );

    // 3. 订单库
    let store = Arc::new(PgOrderStore::connect(&config.database).await?);
    store.health_check().await?;
    info!("Database connection established");

    // 4. 积分系统客户端
    let oracle = Arc::new(AccrualClient::new(&config.accrual)?);

    // 5. 启动管道，首轮扫描会立即接回上次未完成的订单
    let pipeline = AccrualPipeline::start(&config.pipeline, store.clone(), oracle);

    shutdown_signal().await;

    pipeline.shutdown().await;
    store.close().await;

    info!("Service shutdown complete");
    Ok(())
}

/// 监听 Ctrl+C 和 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
