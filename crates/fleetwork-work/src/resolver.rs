//! Manifest decoding and kind resolution
//!
//! A manifest is decoded into a [`DynamicObject`] and its kind resolved to a
//! concrete resource through the member cluster's discovery data. The
//! discovery cache is an injected [`RestMapper`] that refreshes itself when a
//! lookup misses, so newly installed CRDs become mappable without a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use kube::api::{DynamicObject, GroupVersionKind};
use kube::discovery::{ApiResource, Discovery, Scope};
use kube::Client;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use fleetwork_common::crd::{AppliedResourceMeta, ResourceIdentifier};
use fleetwork_common::kube_utils::parse_api_version;
use fleetwork_common::{Error, DEFAULT_RESOURCE_NAMESPACE};

/// Concrete resource a kind maps to on the member cluster
#[derive(Clone, Debug)]
pub struct ResourceMapping {
    /// Group, version, kind, and plural resource name
    pub api_resource: ApiResource,
    /// Whether objects of this resource live in a namespace
    pub namespaced: bool,
}

impl ResourceMapping {
    /// Mapping that addresses an already-tracked resource.
    ///
    /// Only the plural is needed to reach the object, so kind is left empty.
    pub fn for_tracked(meta: &AppliedResourceMeta) -> Self {
        let api_version = if meta.group.is_empty() {
            meta.version.clone()
        } else {
            format!("{}/{}", meta.group, meta.version)
        };
        Self {
            api_resource: ApiResource {
                group: meta.group.clone(),
                version: meta.version.clone(),
                api_version,
                kind: String::new(),
                plural: meta.resource.clone(),
            },
            namespaced: !meta.namespace.is_empty(),
        }
    }
}

/// Kind to resource lookup
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RestMapper: Send + Sync {
    /// Resolve a kind, returning `None` if the cluster does not serve it
    async fn mapping(&self, gvk: &GroupVersionKind) -> Result<Option<ResourceMapping>, Error>;
}

type GvkKey = (String, String, String);

fn gvk_key(gvk: &GroupVersionKind) -> GvkKey {
    (gvk.group.clone(), gvk.version.clone(), gvk.kind.clone())
}

/// [`RestMapper`] backed by API discovery.
///
/// Discovery runs lazily on first use. A miss triggers one full refresh
/// before the kind is reported unmappable.
pub struct DiscoveryRestMapper {
    client: Client,
    cache: RwLock<Option<HashMap<GvkKey, ResourceMapping>>>,
}

impl DiscoveryRestMapper {
    /// Create a mapper for the given cluster; no discovery happens yet
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: RwLock::new(None),
        }
    }

    async fn refresh(&self) -> Result<(), Error> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        let mut mappings = HashMap::new();
        for group in discovery.groups() {
            for version in group.versions() {
                for (ar, caps) in group.versioned_resources(version) {
                    let key = (ar.group.clone(), ar.version.clone(), ar.kind.clone());
                    mappings.insert(
                        key,
                        ResourceMapping {
                            api_resource: ar,
                            namespaced: caps.scope == Scope::Namespaced,
                        },
                    );
                }
            }
        }
        info!(resources = mappings.len(), "refreshed discovery cache");
        *self.cache.write().await = Some(mappings);
        Ok(())
    }

    async fn cached(&self, key: &GvkKey) -> Option<Option<ResourceMapping>> {
        let cache = self.cache.read().await;
        cache.as_ref().map(|m| m.get(key).cloned())
    }
}

#[async_trait]
impl RestMapper for DiscoveryRestMapper {
    async fn mapping(&self, gvk: &GroupVersionKind) -> Result<Option<ResourceMapping>, Error> {
        let key = gvk_key(gvk);
        if let Some(Some(mapping)) = self.cached(&key).await {
            return Ok(Some(mapping));
        }
        debug!(group = %gvk.group, version = %gvk.version, kind = %gvk.kind, "discovery cache miss");
        self.refresh().await?;
        Ok(self.cached(&key).await.flatten())
    }
}

/// A manifest that decoded and resolved to a concrete resource
#[derive(Clone, Debug)]
pub struct ResolvedManifest {
    /// Desired object with its namespace normalized for the resource's scope
    pub object: DynamicObject,
    /// Resource the object belongs to
    pub mapping: ResourceMapping,
    /// Identity reported in Work status
    pub identifier: ResourceIdentifier,
}

impl ResolvedManifest {
    /// Namespace to address the object in, empty for cluster-scoped resources
    pub fn namespace(&self) -> &str {
        &self.identifier.namespace
    }

    /// Object name
    pub fn name(&self) -> &str {
        &self.identifier.name
    }
}

/// A manifest that could not be resolved, with as much identity as was recovered
#[derive(Debug)]
pub struct ResolveFailure {
    /// Identifier with whatever fields decoding recovered
    pub identifier: ResourceIdentifier,
    /// Why resolution failed
    pub error: Error,
}

/// Decode a raw manifest into an object.
///
/// The manifest must be a JSON object with `apiVersion`, `kind`, and
/// `metadata.name`.
pub fn decode_manifest(ordinal: u32, manifest: &serde_json::Value) -> Result<DynamicObject, Error> {
    if !manifest.is_object() {
        return Err(Error::decode(
            ordinal,
            format!("manifest must be an object, found {}", json_type(manifest)),
        ));
    }
    let obj: DynamicObject = serde_json::from_value(manifest.clone())
        .map_err(|e| Error::decode(ordinal, e.to_string()))?;

    match &obj.types {
        Some(t) if !t.api_version.is_empty() && !t.kind.is_empty() => {}
        _ => return Err(Error::decode(ordinal, "missing apiVersion or kind")),
    }
    if obj.metadata.name.as_deref().unwrap_or_default().is_empty() {
        return Err(Error::decode(ordinal, "missing metadata.name"));
    }
    Ok(obj)
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Decode a manifest and resolve its kind to a resource on the member cluster
pub async fn resolve_manifest(
    mapper: &dyn RestMapper,
    ordinal: u32,
    manifest: &serde_json::Value,
) -> Result<ResolvedManifest, ResolveFailure> {
    let mut object = decode_manifest(ordinal, manifest).map_err(|error| ResolveFailure {
        identifier: ResourceIdentifier::for_ordinal(ordinal),
        error,
    })?;

    let (api_version, kind) = object
        .types
        .as_ref()
        .map(|t| (t.api_version.clone(), t.kind.clone()))
        .unwrap_or_default();
    let (group, version) = parse_api_version(&api_version);
    let mut identifier = ResourceIdentifier {
        ordinal,
        group: group.clone(),
        version: version.clone(),
        kind: kind.clone(),
        resource: String::new(),
        namespace: object.metadata.namespace.clone().unwrap_or_default(),
        name: object.metadata.name.clone().unwrap_or_default(),
    };

    let gvk = GroupVersionKind::gvk(&group, &version, &kind);
    let mapping = match mapper.mapping(&gvk).await {
        Ok(Some(mapping)) => mapping,
        Ok(None) => {
            return Err(ResolveFailure {
                identifier,
                error: Error::unmappable(api_version, kind),
            })
        }
        Err(error) => return Err(ResolveFailure { identifier, error }),
    };

    if mapping.namespaced {
        if identifier.namespace.is_empty() {
            identifier.namespace = DEFAULT_RESOURCE_NAMESPACE.to_string();
        }
        object.metadata.namespace = Some(identifier.namespace.clone());
    } else {
        identifier.namespace = String::new();
        object.metadata.namespace = None;
    }
    identifier.resource = mapping.api_resource.plural.clone();

    Ok(ResolvedManifest {
        object,
        mapping,
        identifier,
    })
}
