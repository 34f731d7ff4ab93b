//! Hub client construction

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};

use fleetwork_common::kube_utils::{create_client, create_client_from_yaml};
use fleetwork_common::Error;

use crate::config::HubSource;

/// Secret key holding the hub kubeconfig
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Pull the kubeconfig YAML out of a Secret
pub fn kubeconfig_from_secret(secret: &Secret) -> Result<String, Error> {
    let name = secret.metadata.name.as_deref().unwrap_or_default();
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(KUBECONFIG_KEY))
        .map(|b| b.0.clone())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|d| d.get(KUBECONFIG_KEY))
                .map(|s| s.clone().into_bytes())
        })
        .ok_or_else(|| {
            Error::internal_with_context(
                "hub_client",
                format!("secret {} has no '{}' key", name, KUBECONFIG_KEY),
            )
        })?;
    String::from_utf8(bytes).map_err(|e| {
        Error::internal_with_context(
            "hub_client",
            format!("secret {} kubeconfig is not UTF-8: {}", name, e),
        )
    })
}

/// Build the hub client from the configured source.
///
/// `spoke` is used to read the kubeconfig Secret and is returned as-is in
/// single-cluster mode.
pub async fn hub_client(source: &HubSource, spoke: &Client) -> Result<Client, Error> {
    match source {
        HubSource::File(path) => {
            tracing::info!(path = %path.display(), "loading hub kubeconfig from file");
            create_client(Some(path)).await
        }
        HubSource::Secret { namespace, name } => {
            tracing::info!(%namespace, %name, "loading hub kubeconfig from secret");
            let secrets: Api<Secret> = Api::namespaced(spoke.clone(), namespace);
            let secret = secrets.get(name).await?;
            create_client_from_yaml(&kubeconfig_from_secret(&secret)?).await
        }
        HubSource::InCluster => {
            tracing::info!("no hub kubeconfig given, using the member cluster as hub");
            Ok(spoke.clone())
        }
    }
}
