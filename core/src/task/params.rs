//! Helpers for validating the JSON params a task is constructed from.

use serde_json::{Map, Value};

use crate::error::TaskError;

/// Optional list of strings. Missing or `null` yields an empty list.
pub fn optional_string_list(params: &Value, key: &str) -> Result<Vec<String>, TaskError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    TaskError::InvalidParams(format!("{key} entries have to be strings : {item}"))
                })
            })
            .collect(),
        Some(other) => Err(TaskError::InvalidParams(format!(
            "{key} param has to be a list : {other}"
        ))),
    }
}

/// Required, non-null list of objects.
pub fn required_object_list(
    params: &Value,
    key: &str,
) -> Result<Vec<Map<String, Value>>, TaskError> {
    match params.get(key) {
        None | Some(Value::Null) => Err(TaskError::InvalidParams(format!(
            "{key} is not present in params"
        ))),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Object(obj) => Ok(obj.clone()),
                other => Err(TaskError::InvalidParams(format!(
                    "{key} entries have to be objects : {other}"
                ))),
            })
            .collect(),
        Some(other) => Err(TaskError::InvalidParams(format!(
            "{key} param has to be a list : {other}"
        ))),
    }
}

/// Required string field of one entry; `what` names the entry in errors.
pub fn require_str<'a>(
    obj: &'a Map<String, Value>,
    field: &str,
    what: &str,
) -> Result<&'a str, TaskError> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| TaskError::InvalidParams(format!("{field} missing from {what}")))
}

/// Keep only names found in `known`, preserving the requested order. An
/// empty request selects every known name.
pub fn select_known<'a>(
    requested: &[String],
    known: &[&'a str],
    what: &str,
) -> Result<Vec<&'a str>, TaskError> {
    if requested.is_empty() {
        return Ok(known.to_vec());
    }
    requested
        .iter()
        .map(|name| {
            known
                .iter()
                .find(|k| **k == name.as_str())
                .copied()
                .ok_or_else(|| TaskError::InvalidParams(format!("Invalid {what} name : {name}")))
        })
        .collect()
}
