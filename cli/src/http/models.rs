//! HTTP API数据模型

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use labkeeper_core::api::{ErrorKind, TaskError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 所有接口统一的响应外壳
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ApiResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
        }
    }
}

// ============= Submit =============

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,
    pub task_name: String,
}

// ============= Result =============

#[derive(Debug, Default, Deserialize)]
pub struct ResultQuery {
    /// 等待上限（秒），缺省时使用服务器配置的最大值
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

// ============= Health =============

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub session_id: String,
    pub uptime_seconds: f64,
    pub requests_handled: u64,
    pub errors_total: u64,
    pub requests_by_endpoint: BTreeMap<String, u64>,
    pub tasks_registered: usize,
    pub timestamp: String,
}

// ============= Error Handling =============

#[derive(Debug)]
pub enum HttpServerError {
    InvalidRequest(String),
    NotFound(String),
    /// 客户端给定的等待时间已过，任务仍在运行
    DeadlineExceeded { task_id: String, waited_ms: u64 },
    /// 服务器等待上限截断了客户端的请求
    Timeout { task_id: String, waited_ms: u64 },
    Task(TaskError),
    Internal(String),
}

impl From<TaskError> for HttpServerError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::InvalidParams(msg) => Self::InvalidRequest(msg),
            TaskError::TaskNotFound(id) => Self::NotFound(format!("task not found: {id}")),
            other => Self::Task(other),
        }
    }
}

impl IntoResponse for HttpServerError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            Self::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            Self::DeadlineExceeded { task_id, waited_ms } => (
                StatusCode::REQUEST_TIMEOUT,
                "DEADLINE_EXCEEDED",
                format!("task {task_id} still running after {waited_ms}ms"),
            ),
            Self::Timeout { task_id, waited_ms } => (
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                format!("task {task_id} still running after {waited_ms}ms (server wait limit)"),
            ),
            Self::Task(err) => {
                let status = if err.kind() == ErrorKind::NotCompleted {
                    StatusCode::CONFLICT
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                (status, "TASK_ERROR", err.to_string())
            }
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = serde_json::json!({
            "success": false,
            "error": message,
            "error_code": error_code,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_query_defaults() {
        let q: ResultQuery = serde_json::from_str("{}").unwrap();
        assert!(q.timeout_secs.is_none());
        let q: ResultQuery = serde_json::from_str(r#"{"timeout_secs": 5}"#).unwrap();
        assert_eq!(q.timeout_secs, Some(5));
    }

    #[test]
    fn test_api_response_serialize() {
        let resp = ApiResponse::ok(serde_json::json!({"task_id": "t1"}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"task_id\":\"t1\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_task_errors_map_to_status() {
        let cases = [
            (TaskError::InvalidParams("x".into()), StatusCode::BAD_REQUEST),
            (TaskError::TaskNotFound("t".into()), StatusCode::NOT_FOUND),
            (TaskError::NotCompleted, StatusCode::CONFLICT),
            (TaskError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            let resp = HttpServerError::from(err).into_response();
            assert_eq!(resp.status(), status);
        }
    }
}
