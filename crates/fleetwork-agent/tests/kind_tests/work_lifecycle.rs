//! Stories about a Work moving through its lifecycle against a real API server

use std::time::Duration;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;

use fleetwork_common::crd::{AppliedWork, Work, WorkSpec, WorkloadTemplate};
use fleetwork_common::WORK_FINALIZER;

use super::helpers::{ensure_namespace, ensure_test_cluster, spawn_agent, wait_for};

const WORK_NAMESPACE: &str = "fleetwork-test-cluster1";
const TIMEOUT: Duration = Duration::from_secs(60);

fn configmap(name: &str, value: &str) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": name, "namespace": "default" },
        "data": { "value": value }
    })
}

fn work(name: &str, manifests: Vec<serde_json::Value>) -> Work {
    let mut work = Work::new(
        name,
        WorkSpec {
            workload: WorkloadTemplate { manifests },
        },
    );
    work.metadata.namespace = Some(WORK_NAMESPACE.to_string());
    work
}

async fn configmap_value(client: &Client, name: &str) -> Option<String> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), "default");
    api.get_opt(name)
        .await
        .ok()
        .flatten()
        .and_then(|cm| cm.data)
        .and_then(|d| d.get("value").cloned())
}

async fn cleanup(client: &Client, name: &str) {
    let works: Api<Work> = Api::namespaced(client.clone(), WORK_NAMESPACE);
    let _ = works.delete(name, &DeleteParams::default()).await;
}

/// Story: a Work is created, edited and deleted
///
/// Expected behavior:
/// - The Work gains the cleanup finalizer and an AppliedWork record
/// - Its ConfigMap appears on the member cluster and follows spec edits
/// - A manifest dropped from the Work is removed from the member cluster
/// - Deleting the Work removes the record and every applied resource
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_work_applies_updates_and_cleans_up() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    ensure_namespace(&client, WORK_NAMESPACE)
        .await
        .expect("failed to create work namespace");
    let name = "lifecycle-bundle";
    cleanup(&client, name).await;
    let agent = spawn_agent(&client, WORK_NAMESPACE);

    let works: Api<Work> = Api::namespaced(client.clone(), WORK_NAMESPACE);
    let applied: Api<AppliedWork> = Api::all(client.clone());

    // Act: the hub publishes a Work with two ConfigMaps
    works
        .create(
            &PostParams::default(),
            &work(name, vec![configmap("lc-a", "1"), configmap("lc-b", "1")]),
        )
        .await
        .expect("failed to create work");

    // Assert: record, finalizer and both resources appear
    assert!(
        wait_for(TIMEOUT, || async {
            configmap_value(&client, "lc-a").await.as_deref() == Some("1")
                && configmap_value(&client, "lc-b").await.is_some()
        })
        .await,
        "configmaps should be applied"
    );
    let live = works.get(name).await.expect("work exists");
    assert!(live.finalizers().iter().any(|f| f == WORK_FINALIZER));
    assert!(applied.get_opt(name).await.expect("get appliedWork").is_some());

    // Act: edit one manifest and drop the other
    let mut edited = works.get(name).await.expect("work exists");
    edited.spec.workload.manifests = vec![configmap("lc-a", "2")];
    works
        .replace(name, &PostParams::default(), &edited)
        .await
        .expect("failed to update work");

    // Assert: the edit lands and the dropped ConfigMap is garbage-collected
    assert!(
        wait_for(TIMEOUT, || async {
            configmap_value(&client, "lc-a").await.as_deref() == Some("2")
                && configmap_value(&client, "lc-b").await.is_none()
        })
        .await,
        "edit should apply and stale configmap should be removed"
    );

    // Act: the hub deletes the Work
    works
        .delete(name, &DeleteParams::default())
        .await
        .expect("failed to delete work");

    // Assert: the Work, its record and its resources all go away
    assert!(
        wait_for(TIMEOUT, || async {
            works.get_opt(name).await.ok().flatten().is_none()
                && applied.get_opt(name).await.ok().flatten().is_none()
        })
        .await,
        "work and appliedWork should be deleted"
    );
    assert!(
        wait_for(TIMEOUT, || async { configmap_value(&client, "lc-a").await.is_none() }).await,
        "owned configmap should be removed by the garbage collector"
    );

    agent.abort();
}

/// Story: an out-of-band edit to an applied resource is reverted
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_drift_is_repaired() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    ensure_namespace(&client, WORK_NAMESPACE)
        .await
        .expect("failed to create work namespace");
    let name = "drift-bundle";
    cleanup(&client, name).await;
    let agent = spawn_agent(&client, WORK_NAMESPACE);

    let works: Api<Work> = Api::namespaced(client.clone(), WORK_NAMESPACE);
    works
        .create(&PostParams::default(), &work(name, vec![configmap("drift-a", "desired")]))
        .await
        .expect("failed to create work");
    assert!(
        wait_for(TIMEOUT, || async {
            configmap_value(&client, "drift-a").await.as_deref() == Some("desired")
        })
        .await
    );

    // Act: someone edits the ConfigMap and drops the hash annotation
    let cms: Api<ConfigMap> = Api::namespaced(client.clone(), "default");
    let mut cm = cms.get("drift-a").await.expect("configmap exists");
    cm.data = Some([("value".to_string(), "tampered".to_string())].into());
    cm.metadata.annotations = None;
    cms.replace("drift-a", &PostParams::default(), &cm)
        .await
        .expect("failed to tamper configmap");

    // Assert: the periodic re-apply restores the desired state
    assert!(
        wait_for(TIMEOUT, || async {
            configmap_value(&client, "drift-a").await.as_deref() == Some("desired")
        })
        .await,
        "drifted configmap should be restored"
    );

    cleanup(&client, name).await;
    agent.abort();
}
