//! 基础请求验证逻辑

use serde_json::Value;

use super::models::HttpServerError;

/// 验证任务名格式（仅允许字母数字、下划线、连字符）
pub fn validate_task_name(name: &str) -> Result<(), HttpServerError> {
    if name.is_empty() {
        return Err(HttpServerError::InvalidRequest(
            "Task name cannot be empty".to_string(),
        ));
    }

    if name.len() > 100 {
        return Err(HttpServerError::InvalidRequest(format!(
            "Task name too long ({} chars, max 100)",
            name.len()
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(HttpServerError::InvalidRequest(
            "Task name can only contain alphanumeric, underscore, and hyphen characters"
                .to_string(),
        ));
    }

    Ok(())
}

/// 任务参数必须是JSON对象；空请求体视为 `{}`
pub fn validate_params(params: Option<Value>) -> Result<Value, HttpServerError> {
    match params {
        None | Some(Value::Null) => Ok(Value::Object(Default::default())),
        Some(v @ Value::Object(_)) => Ok(v),
        Some(other) => Err(HttpServerError::InvalidRequest(format!(
            "Task params must be a JSON object, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 客户端请求的等待时间，截断到服务器上限。第二项表示是否被截断。
pub fn clamp_wait(requested: Option<u64>, max_wait_secs: u64) -> (u64, bool) {
    match requested {
        Some(secs) if secs > max_wait_secs => (max_wait_secs, true),
        Some(secs) => (secs, false),
        None => (max_wait_secs, true),
    }
}
