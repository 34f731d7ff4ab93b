//! Kubernetes helpers shared by the hub and member-cluster sides

use std::path::Path;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::{Error, SPEC_HASH_ANNOTATION};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Parse an apiVersion into (group, version)
///
/// ```
/// use fleetwork_common::kube_utils::parse_api_version;
///
/// assert_eq!(parse_api_version("apps/v1"), ("apps".to_string(), "v1".to_string()));
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Compute a short deterministic hash of `input`.
///
/// Truncated SHA-256, 16 hex chars. Used as the spec-hash annotation value.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Strip server-populated and agent-stamped metadata before hashing.
///
/// Removes everything a round trip through the API server (or through this
/// agent) would change without the desired content changing:
/// - uid, resourceVersion, creationTimestamp, generation, managedFields, selfLink
/// - ownerReferences (merged separately from the desired content)
/// - the spec-hash annotation itself
pub fn strip_server_metadata(meta: &mut ObjectMeta) {
    meta.uid = None;
    meta.resource_version = None;
    meta.creation_timestamp = None;
    meta.managed_fields = None;
    meta.generation = None;
    meta.self_link = None;
    meta.owner_references = None;
    if let Some(annotations) = meta.annotations.as_mut() {
        annotations.remove(SPEC_HASH_ANNOTATION);
        if annotations.is_empty() {
            meta.annotations = None;
        }
    }
}

/// Content hash of a desired object.
///
/// Server-populated metadata and `status` are excluded. serde_json orders
/// object keys, so equal content always serializes to the same string.
pub fn manifest_hash(obj: &DynamicObject) -> Result<String, Error> {
    let mut normalized = obj.clone();
    strip_server_metadata(&mut normalized.metadata);
    let mut value = serde_json::to_value(&normalized)?;
    if let Some(map) = value.as_object_mut() {
        map.remove("status");
    }
    Ok(deterministic_hash(&value.to_string()))
}

/// Read the spec-hash annotation of an object, if stamped
pub fn spec_hash_of(meta: &ObjectMeta) -> Option<&str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(SPEC_HASH_ANNOTATION))
        .map(String::as_str)
}

/// Create a kube client from an optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            config_from_kubeconfig(kubeconfig).await?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    client_with_timeouts(config)
}

/// Create a kube client from kubeconfig YAML held in memory (e.g. a Secret)
pub async fn create_client_from_yaml(yaml: &str) -> Result<Client, Error> {
    let kubeconfig = Kubeconfig::from_yaml(yaml).map_err(|e| {
        Error::internal_with_context("create_client", format!("invalid kubeconfig: {}", e))
    })?;
    client_with_timeouts(config_from_kubeconfig(kubeconfig).await?)
}

async fn config_from_kubeconfig(kubeconfig: Kubeconfig) -> Result<Config, Error> {
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "create_client",
                format!("failed to load kubeconfig: {}", e),
            )
        })
}

fn client_with_timeouts(mut config: Config) -> Result<Client, Error> {
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}
