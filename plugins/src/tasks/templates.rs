//! Field layouts of the pool documents.

use serde_json::{json, Map, Value};

pub const NODE_FIELDS: &[&str] = &[
    "ipaddr",
    "mac_address",
    "vm_name",
    "memory",
    "origin",
    "os",
    "os_version",
    "poolId",
    "prevUser",
    "state",
    "username",
    "added_on",
    "tags",
];

pub const VM_FIELDS: &[&str] = &[
    "addresses",
    "cpu",
    "mainIpAddress",
    "memory",
    "name_label",
    "os_version",
    "state",
    "poolId",
    "group",
    "host",
];

pub const HOST_FIELDS: &[&str] = &[
    "name",
    "hostname",
    "ipaddr",
    "cpu",
    "name_label",
    "memory",
    "state",
    "poolId",
    "group",
    "xen_username",
    "xen_password",
];

/// Server pool documents also carry their own key.
pub const DOC_KEY: &str = "doc_key";

/// A node document with every field at its empty value.
pub fn empty_node() -> Value {
    json!({
        "ipaddr": "",
        "mac_address": "",
        "vm_name": "",
        "memory": "",
        "origin": "",
        "os": "",
        "os_version": "",
        "poolId": [],
        "prevUser": "",
        "state": "",
        "username": "",
        "added_on": "",
        "tags": {},
    })
}

/// Fields of `required` missing from `doc`, and fields of `doc` outside it.
pub fn field_diff(doc: &Map<String, Value>, required: &[&str]) -> (Vec<String>, Vec<String>) {
    let absent = required
        .iter()
        .filter(|f| !doc.contains_key(**f))
        .map(|f| f.to_string())
        .collect();
    let extra = doc
        .keys()
        .filter(|k| !required.contains(&k.as_str()))
        .cloned()
        .collect();
    (absent, extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_node_matches_field_list() {
        let node = empty_node();
        let (absent, extra) = field_diff(node.as_object().unwrap(), NODE_FIELDS);
        assert!(absent.is_empty());
        assert!(extra.is_empty());
    }

    #[test]
    fn test_field_diff_reports_both_sides() {
        let doc = json!({"ipaddr": "10.0.0.1", "legacy": 1});
        let (absent, extra) = field_diff(doc.as_object().unwrap(), &["ipaddr", "state"]);
        assert_eq!(absent, vec!["state".to_string()]);
        assert_eq!(extra, vec!["legacy".to_string()]);
    }
}
