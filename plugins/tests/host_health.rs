mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use labkeeper_core::api::{DocumentStore, ErrorKind, TasksConfig};
use labkeeper_plugins::store::LocalDocumentStore;
use labkeeper_plugins::tasks::{HostHealthMonitorTask, HOST_HEALTH_MONITOR};
use pretty_assertions::assert_eq;
use serde_json::json;

use common::{run_to_report, services, FakeConnector};

async fn seeded_store() -> Arc<LocalDocumentStore> {
    let store = Arc::new(LocalDocumentStore::in_memory());
    store
        .upsert("servers", "10.0.0.1", &json!({"ipaddr": "10.0.0.1", "state": "available"}))
        .await
        .unwrap();
    store
        .upsert("hosts", "h1", &json!({"name": "host-a", "cpu": 8, "memory": 1000, "group": "lab"}))
        .await
        .unwrap();
    store
        .upsert("hosts", "h2", &json!({"name": "host-b", "cpu": 0, "memory": 1000, "group": "other"}))
        .await
        .unwrap();
    store
        .upsert(
            "vms",
            "v1",
            &json!({
                "name_label": "vm-1",
                "host": "host-a",
                "cpu": 2,
                "memory": 250,
                "state": "Running",
                "addresses": {"0/ipv4/0": "10.0.0.1"},
                "mainIpAddress": "10.0.0.1",
                "os_version": "Debian GNU/Linux 12",
            }),
        )
        .await
        .unwrap();
    store
        .upsert(
            "vms",
            "v2",
            &json!({
                "name_label": "vm-2",
                "host": "host-a",
                "cpu": "2",
                "memory": "250",
                "state": "Halted",
                "addresses": {},
                "mainIpAddress": "",
                "os_version": "",
            }),
        )
        .await
        .unwrap();
    store
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_host_and_vm_checks_nest_per_host() {
    let store = seeded_store().await;
    let svc = services(store.clone(), Arc::new(FakeConnector::default()), BTreeMap::new());
    let task =
        HostHealthMonitorTask::new(&json!({"group": ["lab"]}), &svc, &TasksConfig::default()).unwrap();

    let report = run_to_report(Arc::new(task)).await;
    assert_eq!(
        report,
        json!({
            "host-a": {
                "host_checks": {
                    "vm_states": {"vm_states": {"Halted": 1, "Running": 1}},
                    "cpu_utilization": {"allocated_cpu_utilization": 50.0},
                    "memory_utilization": {"allocated_memory_utilization": 50.0},
                    "field_consistency": {"field_consistency": {
                        "fields_match": false,
                        "fields_absent": [
                            "hostname", "ipaddr", "name_label", "state",
                            "poolId", "xen_username", "xen_password",
                        ],
                    }},
                },
                "vms": {
                    "vm-1": {
                        "network": {"addresses_available": true, "mainIpAddress_available": true},
                        "os_version": {"os_version_available": true},
                        "server_pool": {"vm_in_server_pool": true},
                        "field_consistency": {"field_consistency": {
                            "fields_match": false,
                            "fields_absent": ["poolId", "group"],
                        }},
                    },
                    "vm-2": {
                        "network": {"addresses_available": false, "mainIpAddress_available": false},
                        "os_version": {"os_version_available": false},
                        "server_pool": {"vm_in_server_pool": false},
                        "field_consistency": {"field_consistency": {
                            "fields_match": false,
                            "fields_absent": ["poolId", "group"],
                        }},
                    },
                },
            }
        })
    );

    let host = store.get("hosts", "h1").await.unwrap();
    assert_eq!(host["tags"]["allocated_cpu_utilization"], json!(50.0));
    assert_eq!(host["tags"]["vm_states"]["Running"], json!(1));
    let vm = store.get("vms", "v2").await.unwrap();
    assert_eq!(vm["tags"]["os_version_available"], json!(false));
    assert_eq!(vm["tags"]["vm_in_server_pool"], json!(false));
    let vm = store.get("vms", "v1").await.unwrap();
    assert_eq!(vm["tags"]["vm_in_server_pool"], json!(true));
    assert_eq!(vm["tags"]["field_consistency"]["fields_absent"], json!(["poolId", "group"]));
}

#[tokio::test]
async fn test_vm_checks_can_be_selected_by_name() {
    let store = seeded_store().await;
    let svc = services(store.clone(), Arc::new(FakeConnector::default()), BTreeMap::new());
    let task = HostHealthMonitorTask::new(
        &json!({"group": ["lab"], "host_tasks": ["vm_states"], "vm_tasks": ["server_pool", "field_consistency"]}),
        &svc,
        &TasksConfig::default(),
    )
    .unwrap();

    let report = run_to_report(Arc::new(task)).await;
    let vm1 = report["host-a"]["vms"]["vm-1"].as_object().unwrap();
    assert_eq!(
        vm1.keys().cloned().collect::<Vec<_>>(),
        vec!["field_consistency".to_string(), "server_pool".to_string()]
    );
    assert_eq!(vm1["server_pool"], json!({"vm_in_server_pool": true}));
    assert!(report["host-a"]["host_checks"].get("field_consistency").is_none());
}

#[tokio::test]
async fn test_failing_host_check_is_isolated() {
    let store = seeded_store().await;
    let svc = services(store, Arc::new(FakeConnector::default()), BTreeMap::new());
    let task = HostHealthMonitorTask::new(
        &json!({"host_tasks": ["vm_states", "cpu_utilization"], "vm_tasks": []}),
        &svc,
        &TasksConfig::default(),
    )
    .unwrap();

    let report = run_to_report(Arc::new(task)).await;
    let host_b = &report["host-b"]["host_checks"];
    assert_eq!(host_b["vm_states"], json!({"vm_states": {}}));
    assert_eq!(host_b["cpu_utilization"]["kind"], json!(ErrorKind::Check.as_str()));
    assert!(report["host-b"]["host_checks"].get("memory_utilization").is_none());
    assert_eq!(
        report["host-a"]["host_checks"]["cpu_utilization"],
        json!({"allocated_cpu_utilization": 50.0})
    );
    assert_eq!(
        report["host-a"]["vms"]["vm-1"]["network"],
        json!({"addresses_available": true, "mainIpAddress_available": true})
    );
    assert_eq!(
        report["host-a"]["vms"]["vm-1"]["server_pool"],
        json!({"vm_in_server_pool": true})
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_narrow_pool_still_drains_both_levels() {
    let store = Arc::new(LocalDocumentStore::in_memory());
    for h in 0..6 {
        let host = format!("host-{h}");
        store
            .upsert("hosts", &host, &json!({"name": host, "cpu": 4, "memory": 100}))
            .await
            .unwrap();
        for v in 0..3 {
            store
                .upsert(
                    "vms",
                    &format!("{host}-vm{v}"),
                    &json!({"name_label": format!("{host}-vm{v}"), "host": host, "cpu": 1, "memory": 10, "state": "Running"}),
                )
                .await
                .unwrap();
        }
    }
    let svc = services(store, Arc::new(FakeConnector::default()), BTreeMap::new());
    let mut cfg = TasksConfig::default();
    cfg.max_workers.insert(HOST_HEALTH_MONITOR.to_string(), 1);

    let task = HostHealthMonitorTask::new(&json!({}), &svc, &cfg).unwrap();
    let report = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        run_to_report(Arc::new(task)),
    )
    .await
    .expect("nested fan-out must not starve the pool");

    assert_eq!(report.as_object().unwrap().len(), 6);
    assert_eq!(
        report["host-5"]["host_checks"]["cpu_utilization"],
        json!({"allocated_cpu_utilization": 75.0})
    );
    assert_eq!(report["host-0"]["vms"].as_object().unwrap().len(), 3);
}

#[test]
fn test_unknown_vm_task_is_rejected() {
    let store = Arc::new(LocalDocumentStore::in_memory());
    let svc = services(store, Arc::new(FakeConnector::default()), BTreeMap::new());
    let err = HostHealthMonitorTask::new(&json!({"vm_tasks": ["update doc"]}), &svc, &TasksConfig::default())
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidParams);
}
