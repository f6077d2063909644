//! HTTP服务器生命周期管理

use super::{
    middleware::{create_middleware_stack, request_logger},
    routes::create_router,
    AppState,
};
use crate::commands::cli::ServeArgs;
use axum::middleware;
use labkeeper_core::api::{AppContext, CliError, TaskManager, TaskRegistry};
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

const STATE_FILE: &str = "labkeeper.state";

/// HTTP服务器配置
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 单个请求的超时，需大于 `/result` 的最长等待
    pub request_timeout: Duration,
}

/// 获取服务器状态文件目录
fn get_servers_dir() -> Result<PathBuf, CliError> {
    let home = dirs::home_dir()
        .ok_or_else(|| CliError::Command("Cannot find home directory".to_string()))?;
    let servers_dir = home.join(".labkeeper").join("servers");
    fs::create_dir_all(&servers_dir)
        .map_err(|e| CliError::Command(format!("Failed to create servers directory: {e}")))?;
    Ok(servers_dir)
}

/// 写入服务器状态文件
fn write_state_file(session_id: &str, port: u16, host: &str) -> Result<(), CliError> {
    let state_file = get_servers_dir()?.join(STATE_FILE);

    let state = serde_json::json!({
        "session_id": session_id,
        "port": port,
        "pid": std::process::id(),
        "url": format!("http://{}:{}", host, port),
        "started_at": chrono::Local::now().to_rfc3339()
    });
    let text = serde_json::to_string_pretty(&state)
        .map_err(|e| CliError::Command(format!("Failed to render state file: {e}")))?;

    fs::write(&state_file, text)
        .map_err(|e| CliError::Command(format!("Failed to write state file: {e}")))?;

    info!("State file written to: {}", state_file.display());
    Ok(())
}

/// 处理 serve 命令：CLI 参数优先，配置文件作为默认值
pub async fn handle_serve(
    args: ServeArgs,
    ctx: &AppContext,
    registry: TaskRegistry,
) -> Result<(), CliError> {
    let session_id = Uuid::new_v4().to_string();
    let cfg = ctx.cfg();
    let host = args.host.unwrap_or_else(|| cfg.http_server.host.clone());
    let port = args.port.unwrap_or(cfg.http_server.port);

    let services = ctx.build_services().await?;
    let (shutdown_tx, _) = broadcast::channel(1);

    let state = AppState::new(
        session_id.clone(),
        TaskManager::with_report_store(cfg.task_manager.max_workers, services.tasks.clone()),
        registry,
        services,
        cfg.tasks.clone(),
        cfg.http_server.max_wait_secs,
        shutdown_tx,
    );

    write_state_file(&session_id, port, &host)?;

    let config = ServerConfig {
        host,
        port,
        request_timeout: Duration::from_secs(state.max_wait_secs + 30),
    };
    start_server_with_config(session_id, config, state)
        .await
        .map_err(|e: Box<dyn std::error::Error + Send + Sync>| CliError::Command(e.to_string()))?;

    Ok(())
}

/// 使用自定义配置启动HTTP服务器
pub async fn start_server_with_config(
    session_id: String,
    config: ServerConfig,
    state: AppState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!(
        "Starting HTTP server on {}:{} (session: {})",
        config.host, config.port, session_id
    );

    let app = create_router(state.clone())
        .layer(middleware::from_fn(request_logger))
        .layer(create_middleware_stack(config.request_timeout));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP server listening on http://{}", addr);

    let mut shutdown_rx = state.shutdown_tx.subscribe();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C signal");
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal from API");
                }
                _ = wait_for_sigterm() => {
                    info!("Received SIGTERM signal");
                }
            }

            info!("Starting graceful shutdown...");
        })
        .await?;

    // 放弃仍未被取走的任务
    for status in state.manager.list() {
        let _ = state.manager.abandon(&status.task_id);
    }
    info!("Server shutdown complete");

    let state_file_path = get_servers_dir()?.join(STATE_FILE);
    if let Err(e) = fs::remove_file(&state_file_path) {
        warn!("Failed to remove state file: {}", e);
    } else {
        info!("State file removed: {}", state_file_path.display());
    }

    Ok(())
}

/// 等待 SIGTERM 信号（Unix系统）
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to setup SIGTERM handler: {}", e);
            std::future::pending::<()>().await
        }
    }
}

/// Windows 系统不支持 SIGTERM，使用空操作
#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
