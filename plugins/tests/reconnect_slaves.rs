mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use labkeeper_core::api::{AdminApi, DocumentStore, ErrorKind, JenkinsInstanceConfig, TasksConfig};
use labkeeper_plugins::admin::JenkinsClient;
use labkeeper_plugins::store::LocalDocumentStore;
use labkeeper_plugins::tasks::ReconnectSlavesTask;
use mockito::Server;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::{run_to_report, services, FakeConnector};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slaves_reconnect_through_their_jenkins() {
    let mut jenkins = Server::new_async().await;
    let reconnect = jenkins
        .mock("POST", "/computer/slave-1/launchSlaveAgent")
        .with_status(200)
        .create_async()
        .await;
    let _refused = jenkins
        .mock("POST", "/computer/slave-2/launchSlaveAgent")
        .with_status(403)
        .with_body("forbidden")
        .create_async()
        .await;

    let client = JenkinsClient::new(
        "qa_jenkins",
        &JenkinsInstanceConfig {
            url: jenkins.url(),
            username: "bot".into(),
            api_token: "token".into(),
            timeout_ms: 2_000,
        },
    )
    .unwrap();
    let mut admins: BTreeMap<String, Arc<dyn AdminApi>> = BTreeMap::new();
    admins.insert("qa_jenkins".into(), Arc::new(client));

    let store = Arc::new(LocalDocumentStore::in_memory());
    for name in ["slave-1", "slave-2"] {
        store
            .upsert(
                "slaves",
                name,
                &json!({
                    "name": name,
                    "ipaddr": "10.0.1.1",
                    "state": "offline",
                    "jenkins_host": format!("{}/", jenkins.url()),
                }),
            )
            .await
            .unwrap();
    }
    let svc = services(store.clone(), Arc::new(FakeConnector::default()), admins);

    let params = json!({"data": [{"name": "slave-1"}, {"name": "slave-2"}, {"name": "ghost"}]});
    let task = ReconnectSlavesTask::new(&params, &svc, &TasksConfig::default()).unwrap();
    let report = run_to_report(Arc::new(task)).await;

    assert_eq!(
        report["slave-1"],
        json!({
            "reconnect_slave_from_jenkins": ["200", null],
            "update_slave_in_slave_pool": true,
        })
    );
    reconnect.assert_async().await;
    assert_eq!(store.get("slaves", "slave-1").await.unwrap()["state"], json!("online"));

    assert_eq!(report["slave-2"]["kind"], json!(ErrorKind::Admin.as_str()));
    assert_eq!(report["slave-2"]["status"], json!(403));
    assert_eq!(store.get("slaves", "slave-2").await.unwrap()["state"], json!("offline"));

    assert_eq!(report["ghost"]["kind"], json!(ErrorKind::Store.as_str()));
}

#[test]
fn test_every_slave_needs_a_name() {
    let store = Arc::new(LocalDocumentStore::in_memory());
    let svc = services(store, Arc::new(FakeConnector::default()), BTreeMap::new());
    let err = ReconnectSlavesTask::new(
        &json!({"data": [{"name": "slave-1"}, {"ipaddr": "10.0.1.1"}]}),
        &svc,
        &TasksConfig::default(),
    )
    .err()
    .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidParams);
}
