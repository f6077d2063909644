mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use labkeeper_core::api::{DocumentStore, ErrorKind, TasksConfig};
use labkeeper_plugins::store::LocalDocumentStore;
use labkeeper_plugins::tasks::RemoveNodesTask;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::{run_to_report, services, FakeConnector};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nodes_are_deleted_from_server_pool() {
    let store = Arc::new(LocalDocumentStore::in_memory());
    for ip in ["10.0.0.1", "10.0.0.2"] {
        store
            .upsert("servers", ip, &json!({"ipaddr": ip, "state": "available"}))
            .await
            .unwrap();
    }
    let svc = services(store.clone(), Arc::new(FakeConnector::default()), BTreeMap::new());

    let params = json!({"data": [{"ipaddr": "10.0.0.1"}, {"ipaddr": "10.9.9.9"}], "retries": 3});
    let task = RemoveNodesTask::new(&params, &svc, &TasksConfig::default()).unwrap();
    let report = run_to_report(Arc::new(task)).await;

    assert_eq!(report["10.0.0.1"], json!({"remove_node_from_server_pool": true}));
    assert_eq!(report["10.9.9.9"]["kind"], json!(ErrorKind::Store.as_str()));
    assert!(store.get("servers", "10.0.0.1").await.is_err());
    assert_eq!(store.get("servers", "10.0.0.2").await.unwrap()["state"], json!("available"));
}

#[test]
fn test_remove_params_are_validated() {
    let store = Arc::new(LocalDocumentStore::in_memory());
    let svc = services(store, Arc::new(FakeConnector::default()), BTreeMap::new());
    let cfg = TasksConfig::default();

    for params in [
        json!({}),
        json!({"data": [{"ipaddr": "10.0.0.1"}, {"vm_name": "x"}]}),
        json!({"data": [{"ipaddr": "10.0.0.1"}], "retries": "three"}),
        json!({"data": [{"ipaddr": "10.0.0.1"}], "retries": -1}),
    ] {
        let err = RemoveNodesTask::new(&params, &svc, &cfg).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidParams, "params {params}");
    }
}
