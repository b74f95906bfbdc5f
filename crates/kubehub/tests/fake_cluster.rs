use kwait_core::{ApplyOptions, ClusterError, ErrorKind, ResourceIdentity};
use kwait_kubehub::fake::{FakeCluster, Verb};
use kwait_kubehub::ClusterApi;
use serde_json::json;

fn cm() -> ResourceIdentity {
    ResourceIdentity::new("", "v1", "configmaps", Some("default"), "settings")
}

fn payload(value: &str) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": "settings", "namespace": "default"},
        "data": {"mode": value}
    })
}

#[tokio::test]
async fn reapplying_identical_payload_is_a_no_op() {
    let cluster = FakeCluster::new();
    let opts = ApplyOptions::new("kwait");
    let first = cluster.apply(&cm(), &payload("fast"), &opts).await.unwrap();
    let second = cluster.apply(&cm(), &payload("fast"), &opts).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second["metadata"]["generation"], json!(1));
    assert_eq!(cluster.calls().apply, 2);
}

#[tokio::test]
async fn changed_field_bumps_resource_version_and_generation() {
    let cluster = FakeCluster::new();
    let opts = ApplyOptions::new("kwait");
    let first = cluster.apply(&cm(), &payload("fast"), &opts).await.unwrap();
    let second = cluster.apply(&cm(), &payload("slow"), &opts).await.unwrap();
    assert_ne!(first["metadata"]["resourceVersion"], second["metadata"]["resourceVersion"]);
    assert_eq!(second["metadata"]["generation"], json!(2));
    assert_eq!(second["data"]["mode"], json!("slow"));
}

#[tokio::test]
async fn fields_dropped_from_the_payload_are_removed() {
    let cluster = FakeCluster::new();
    let opts = ApplyOptions::new("kwait");
    let mut p = payload("fast");
    p["data"]["extra"] = json!("x");
    cluster.apply(&cm(), &p, &opts).await.unwrap();
    let live = cluster.apply(&cm(), &payload("fast"), &opts).await.unwrap();
    assert!(live["data"].get("extra").is_none());
}

#[tokio::test]
async fn other_managers_fields_conflict_unless_forced() {
    let cluster = FakeCluster::new();
    cluster.seed(&cm(), payload("fast"), "helm");

    let err = cluster.apply(&cm(), &payload("slow"), &ApplyOptions::new("kwait")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let ClusterError::Conflict(c) = err else { unreachable!() };
    assert_eq!(c.managers, vec!["helm"]);
    assert_eq!(c.fields, vec![".data.mode"]);

    let live = cluster.apply(&cm(), &payload("slow"), &ApplyOptions::new("kwait").force(true)).await.unwrap();
    assert_eq!(live["data"]["mode"], json!("slow"));
    assert_eq!(cluster.owner_of(&cm(), "data.mode").as_deref(), Some("kwait"));
}

#[tokio::test]
async fn agreeing_with_another_manager_is_not_a_conflict() {
    let cluster = FakeCluster::new();
    cluster.seed(&cm(), payload("fast"), "helm");
    cluster.apply(&cm(), &payload("fast"), &ApplyOptions::new("kwait")).await.unwrap();
}

#[tokio::test]
async fn mismatched_name_is_fatal() {
    let cluster = FakeCluster::new();
    let mut p = payload("fast");
    p["metadata"]["name"] = json!("other");
    let err = cluster.apply(&cm(), &p, &ApplyOptions::new("kwait")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);
}

#[tokio::test]
async fn delete_is_idempotent_and_can_linger() {
    let cluster = FakeCluster::new();
    cluster.seed(&cm(), payload("fast"), "kwait");
    cluster.linger_after_delete(&cm(), 2);

    cluster.delete(&cm()).await.unwrap();
    cluster.delete(&cm()).await.unwrap();

    let ghost = cluster.get(&cm()).await.unwrap();
    assert!(ghost["metadata"]["deletionTimestamp"].is_string());
    cluster.get(&cm()).await.unwrap();
    assert!(cluster.get(&cm()).await.unwrap_err().is_not_found());
    assert_eq!(cluster.gets_of(&cm()), 3);
}

#[tokio::test]
async fn get_hooks_see_the_per_object_count() {
    let cluster = FakeCluster::new();
    cluster.seed(&cm(), payload("fast"), "kwait");
    cluster.on_get(&cm(), |n, live| {
        if n >= 2 {
            live["status"]["ready"] = json!(true);
        }
    });
    assert!(cluster.get(&cm()).await.unwrap().get("status").is_none());
    assert_eq!(cluster.get(&cm()).await.unwrap()["status"]["ready"], json!(true));
}

#[tokio::test]
async fn injected_failures_are_consumed_in_order() {
    let cluster = FakeCluster::new();
    cluster.seed(&cm(), payload("fast"), "kwait");
    cluster.fail_next(Verb::Get, ClusterError::Transient("etcd leader changed".into()));
    assert!(cluster.get(&cm()).await.unwrap_err().is_transient());
    assert!(cluster.get(&cm()).await.is_ok());
    assert_eq!(cluster.calls().get, 2);
}

#[tokio::test]
async fn mutate_edits_the_stored_object_without_a_write() {
    let cluster = FakeCluster::new();
    assert!(!cluster.mutate(&cm(), |live| live["status"] = json!({"ready": true})));

    let applied = cluster.apply(&cm(), &payload("fast"), &ApplyOptions::new("kwait")).await.unwrap();
    assert!(cluster.mutate(&cm(), |live| live["status"] = json!({"ready": true})));
    let live = cluster.get(&cm()).await.unwrap();
    assert_eq!(live["status"]["ready"], json!(true));
    assert_eq!(live["metadata"]["resourceVersion"], applied["metadata"]["resourceVersion"]);
    assert_eq!(cluster.calls().apply, 1);
}
