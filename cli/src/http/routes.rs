//! HTTP路由handlers

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use labkeeper_core::api::TaskError;
use serde_json::{json, Value};
use tracing::info;

use crate::http::{
    models::*,
    state::AppState,
    validation::{clamp_wait, validate_params, validate_task_name},
};

/// 创建所有路由
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/tasks", get(list_handler))
        .route(
            "/api/v1/tasks/:task",
            post(submit_handler).delete(abandon_handler),
        )
        .route("/api/v1/tasks/:task/status", get(status_handler))
        .route("/api/v1/tasks/:task/result", get(result_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/shutdown", post(shutdown_handler))
        .with_state(state)
}

/// 记录失败请求
fn failed(state: &AppState, err: impl Into<HttpServerError>) -> HttpServerError {
    state.record_error();
    err.into()
}

/// POST /api/v1/tasks/{name} - 构建并提交任务，立即返回 task id
async fn submit_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<ApiResponse>, HttpServerError> {
    state.record_request("/api/v1/tasks/:name");

    validate_task_name(&name).map_err(|e| failed(&state, e))?;
    if !state.registry.contains(&name) {
        return Err(failed(
            &state,
            HttpServerError::NotFound(format!(
                "unknown task '{}' (known: {})",
                name,
                state.registry.names().join(", ")
            )),
        ));
    }

    let params = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(serde_json::from_slice::<Value>(&body).map_err(|e| {
            failed(
                &state,
                HttpServerError::InvalidRequest(format!("Body is not valid JSON: {e}")),
            )
        })?)
    };
    let params = validate_params(params).map_err(|e| failed(&state, e))?;

    let task = state
        .registry
        .build(&name, &params, &state.services, &state.tasks)
        .map_err(|e| failed(&state, e))?;
    let task_id = state.manager.add_task(task);
    info!(task_id = %task_id, task = %name, "task accepted");

    let data = serde_json::to_value(SubmitResponse {
        task_id,
        task_name: name,
    })
    .map_err(|e| failed(&state, HttpServerError::Internal(e.to_string())))?;
    Ok(Json(ApiResponse::ok(data)))
}

/// GET /api/v1/tasks/{id}/status - 非阻塞查询任务状态与当前结果树
async fn status_handler(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse>, HttpServerError> {
    state.record_request("/api/v1/tasks/:id/status");

    let status = state
        .manager
        .peek_status(&task_id)
        .map_err(|e| failed(&state, e))?;
    let data = serde_json::to_value(status)
        .map_err(|e| failed(&state, HttpServerError::Internal(e.to_string())))?;
    Ok(Json(ApiResponse::ok(data)))
}

/// GET /api/v1/tasks/{id}/result - 等待任务完成并取走报告
///
/// 超时后任务继续运行，可再次请求。
async fn result_handler(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(query): Query<ResultQuery>,
) -> Result<Json<ApiResponse>, HttpServerError> {
    state.record_request("/api/v1/tasks/:id/result");

    let (wait_secs, capped) = clamp_wait(query.timeout_secs, state.max_wait_secs);
    let result = match state
        .manager
        .await_result(&task_id, Duration::from_secs(wait_secs))
        .await
    {
        Ok(result) => result,
        Err(TaskError::DeadlineExceeded { waited_ms }) => {
            state.record_error();
            return Err(if capped {
                HttpServerError::Timeout { task_id, waited_ms }
            } else {
                HttpServerError::DeadlineExceeded { task_id, waited_ms }
            });
        }
        Err(e) => return Err(failed(&state, e)),
    };

    let report = result.to_json().map_err(|e| failed(&state, e))?;
    Ok(Json(ApiResponse::ok(json!({
        "task_id": task_id,
        "task_success": result.success(),
        "report": report.as_ref(),
    }))))
}

/// DELETE /api/v1/tasks/{id} - 放弃任务并释放其工作线程
async fn abandon_handler(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ApiResponse>, HttpServerError> {
    state.record_request("/api/v1/tasks/:id");

    state
        .manager
        .abandon(&task_id)
        .map_err(|e| failed(&state, e))?;
    Ok(Json(ApiResponse::ok(json!({
        "task_id": task_id,
        "abandoned": true,
    }))))
}

/// GET /api/v1/tasks - 列出已注册的任务名和仍在管理器中的任务
async fn list_handler(State(state): State<AppState>) -> Result<Json<ApiResponse>, HttpServerError> {
    state.record_request("/api/v1/tasks");

    let running = serde_json::to_value(state.manager.list())
        .map_err(|e| failed(&state, HttpServerError::Internal(e.to_string())))?;
    Ok(Json(ApiResponse::ok(json!({
        "registered": state.registry.names(),
        "tasks": running,
    }))))
}

/// GET /health - 健康检查
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    state.record_request("/health");

    let stats = state.snapshot();
    Json(HealthResponse {
        status: "healthy".into(),
        session_id: state.session_id.clone(),
        uptime_seconds: stats.uptime_seconds,
        requests_handled: stats.requests_total,
        errors_total: stats.errors_total,
        requests_by_endpoint: stats.requests_by_endpoint,
        tasks_registered: state.registry.names().len(),
        timestamp: Local::now().to_rfc3339(),
    })
}

/// POST /api/v1/shutdown - 优雅关闭服务器
async fn shutdown_handler(State(state): State<AppState>) -> Json<Value> {
    info!("Shutdown requested via API");

    let _ = state.shutdown_tx.send(());

    Json(json!({
        "success": true,
        "message": "Server shutting down"
    }))
}
