//! 实验室资源管理服务主入口

use clap::Parser;
use lab_system::{
    config::AppConfig, handlers::health, middleware::AppState, routes, telemetry,
};
use std::future::IntoFuture;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "lab-system",
    version,
    about = "Lab resource inventory and lease scheduler"
)]
struct Cli {
    /// JSON configuration file
    #[arg(long, short, env = "LAB_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载 .env 文件（开发环境）
    // 按优先级加载：.env.local > .env.development > .env
    if let Ok(name) = std::env::var("LAB_ENV") {
        dotenv::from_filename(format!(".env.{}", name)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::from_filename(".env.development").ok();
        dotenv::dotenv().ok();
    }

    let cli = Cli::parse();

    // 1. 加载配置
    let config = AppConfig::load(cli.config.as_deref()).map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志
    telemetry::init_telemetry(&config.logging)?;
    health::set_start_time();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "lab-system starting");

    // 3. 打开存储、初始化管理员、创建调度器
    let shutdown = CancellationToken::new();
    let state = AppState::build(config.clone(), shutdown.clone())?;

    // 4. 恢复待处理与活跃的租约，然后启动调度循环
    let scheduler = state.scheduler.clone();
    let recovered = tokio::task::spawn_blocking(move || scheduler.recover()).await?;
    tracing::info!(leases = recovered, "leases recovered");
    let scheduler_task = state.scheduler.spawn();

    if let Some(tls) = &config.server.tls {
        tracing::warn!(
            cert = %tls.cert_file.display(),
            key = %tls.key_file.display(),
            "TLS material configured; terminate TLS in front of this listener"
        );
    }

    // 5. 构建路由并启动服务器
    let app = routes::create_router(state);
    let addr = config.server.listen_addr();
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    // 6. 优雅关闭：收到信号后停止接收新连接，在宽限期内等待在途请求
    let grace = Duration::from_secs(config.server.graceful_shutdown_timeout_secs);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();

    tokio::select! {
        result = server => result?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!("Graceful shutdown timeout reached, forcing exit");
        }
    }

    shutdown.cancel();
    if tokio::time::timeout(grace, scheduler_task).await.is_err() {
        tracing::warn!("scheduler did not stop within the grace period");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }
}
