//! Shared helpers for kind integration tests

use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;

use fleetwork_agent::controller_runner::build_work_controllers;
use fleetwork_agent::crds::ensure_crds;
use fleetwork_work::Context;

static CRYPTO: Once = Once::new();

/// Connect to the current kubeconfig context and install the CRDs
pub async fn ensure_test_cluster() -> anyhow::Result<Client> {
    CRYPTO.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
    let client = Client::try_default().await?;
    ensure_crds(&client, &client).await?;
    // Give the API server a moment to serve the new kinds
    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(client)
}

/// Create (or keep) a namespace for test Works
pub async fn ensure_namespace(client: &Client, name: &str) -> anyhow::Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns: Namespace = serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    }))?;
    api.patch(name, &PatchParams::apply("fleetwork-tests"), &Patch::Apply(&ns))
        .await?;
    Ok(())
}

/// Run the agent's controllers against `client` in the background
pub fn spawn_agent(client: &Client, work_namespace: &str) -> tokio::task::JoinHandle<()> {
    let ctx = Arc::new(
        Context::builder(client.clone(), client.clone(), work_namespace)
            .resync_interval(Duration::from_secs(5))
            .build(),
    );
    let controllers = build_work_controllers(
        client.clone(),
        client.clone(),
        ctx,
        Duration::from_secs(30),
    );
    tokio::spawn(async move {
        futures::future::join_all(controllers).await;
    })
}

/// Poll `check` until it returns true or `timeout` elapses
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    false
}
