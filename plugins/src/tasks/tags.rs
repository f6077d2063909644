//! Health tags kept on pool documents:
//! `{"tags": {"list": [..names..], "details": {..check: result..}}}`.

use serde_json::{json, Map, Value};

/// Make sure `doc.tags.list` and `doc.tags.details` exist. Malformed tag
/// sections are replaced.
pub fn initialize_tags(doc: &mut Value) {
    let Some(obj) = doc.as_object_mut() else {
        return;
    };
    let tags = obj.entry("tags").or_insert_with(|| json!({}));
    if !tags.is_object() {
        *tags = json!({});
    }
    if let Some(tags) = tags.as_object_mut() {
        let list = tags.entry("list").or_insert_with(|| json!([]));
        if !list.is_array() {
            *list = json!([]);
        }
        let details = tags.entry("details").or_insert_with(|| json!({}));
        if !details.is_object() {
            *details = json!({});
        }
    }
}

/// Drop every occurrence of `names` from the tag list so a check can
/// re-derive them.
pub fn flush_tags(doc: &mut Value, names: &[&str]) {
    if let Some(list) = doc
        .pointer_mut("/tags/list")
        .and_then(Value::as_array_mut)
    {
        list.retain(|tag| !tag.as_str().is_some_and(|t| names.contains(&t)));
    }
}

pub fn push_tag(doc: &mut Value, name: &str) {
    if let Some(list) = doc
        .pointer_mut("/tags/list")
        .and_then(Value::as_array_mut)
    {
        list.push(json!(name));
    }
}

pub fn set_detail(doc: &mut Value, key: &str, value: Value) {
    if let Some(details) = doc
        .pointer_mut("/tags/details")
        .and_then(Value::as_object_mut)
    {
        details.insert(key.to_string(), value);
    }
}

pub fn detail<'a>(doc: &'a Value, key: &str) -> Option<&'a Value> {
    doc.pointer("/tags/details").and_then(|d| d.get(key))
}

/// Host and VM documents keep flat check values directly under `tags`.
pub fn set_flat_tag(doc: &mut Value, key: &str, value: Value) {
    let Some(obj) = doc.as_object_mut() else {
        return;
    };
    let tags = obj.entry("tags").or_insert_with(|| Value::Object(Map::new()));
    if !tags.is_object() {
        *tags = Value::Object(Map::new());
    }
    if let Some(tags) = tags.as_object_mut() {
        tags.insert(key.to_string(), value);
    }
}
