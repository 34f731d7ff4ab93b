//! Work: the hub-side bundle of manifests destined for one member cluster

use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{ArrayValidation, InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{is_condition_true, Condition};
use crate::{CONDITION_APPLIED, WORK_FINALIZER};

/// Specification for a Work
///
/// Manifests are kept as raw documents; they are decoded and resolved
/// against the member cluster's discovery data only when applied.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "multicluster.x-k8s.io",
    version = "v1alpha1",
    kind = "Work",
    plural = "works",
    status = "WorkStatus",
    namespaced,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkSpec {
    /// Manifests to apply on the member cluster
    #[serde(default)]
    pub workload: WorkloadTemplate,
}

/// Ordered manifests of a Work
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadTemplate {
    /// Raw manifests; a manifest's position is its ordinal
    #[serde(default)]
    #[schemars(schema_with = "manifests_schema")]
    pub manifests: Vec<serde_json::Value>,
}

fn manifests_schema(_: &mut SchemaGenerator) -> Schema {
    let mut item = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    item.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(Schema::Object(item).into()),
            ..Default::default()
        })),
        ..Default::default()
    }
    .into()
}

/// Identity of one manifest as declared in Work status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdentifier {
    /// Position of the manifest in `spec.workload.manifests`
    pub ordinal: u32,
    /// API group (empty for the core group)
    #[serde(default)]
    pub group: String,
    /// API version
    #[serde(default)]
    pub version: String,
    /// Kind as written in the manifest
    #[serde(default)]
    pub kind: String,
    /// Plural resource name from discovery; empty if the kind could not be mapped
    #[serde(default)]
    pub resource: String,
    /// Namespace on the member cluster; empty for cluster-scoped resources
    #[serde(default)]
    pub namespace: String,
    /// Object name
    #[serde(default)]
    pub name: String,
}

impl ResourceIdentifier {
    /// Identifier for a manifest that could not be decoded at all
    pub fn for_ordinal(ordinal: u32) -> Self {
        Self {
            ordinal,
            ..Default::default()
        }
    }

    /// Identity used to compare declared and applied resources
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            group: self.group.clone(),
            version: self.version.clone(),
            resource: self.resource.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// True if this identifier names a concrete resource on the member cluster
    pub fn is_resolved(&self) -> bool {
        !self.resource.is_empty() && !self.name.is_empty()
    }
}

/// Identity of a resource independent of ordinal and uid.
///
/// Two resources are the same resource iff their keys are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    /// API group
    pub group: String,
    /// API version
    pub version: String,
    /// Plural resource name
    pub resource: String,
    /// Namespace, empty for cluster-scoped resources
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let gr = if self.group.is_empty() {
            self.resource.clone()
        } else {
            format!("{}.{}", self.resource, self.group)
        };
        if self.namespace.is_empty() {
            write!(f, "{}/{}", gr, self.name)
        } else {
            write!(f, "{} {}/{}", gr, self.namespace, self.name)
        }
    }
}

/// Apply outcome of one manifest
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCondition {
    /// Which manifest (and which resource) this is
    pub identifier: ResourceIdentifier,
    /// Conditions for this manifest, at minimum `Applied`
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Status for a Work
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkStatus {
    /// Aggregate conditions for the whole Work
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Per-manifest outcomes, indexed by ordinal
    #[serde(default)]
    pub manifest_conditions: Vec<ManifestCondition>,
}

impl WorkStatus {
    /// Resources this Work currently declares as applied.
    ///
    /// Only manifests with `Applied=True` that resolved to a concrete
    /// resource count. Duplicates keep their first occurrence.
    pub fn declared_applied(&self) -> Vec<ResourceIdentifier> {
        let mut seen = std::collections::HashSet::new();
        self.manifest_conditions
            .iter()
            .filter(|mc| is_condition_true(&mc.conditions, CONDITION_APPLIED))
            .map(|mc| &mc.identifier)
            .filter(|id| id.is_resolved())
            .filter(|id| seen.insert(id.key()))
            .cloned()
            .collect()
    }
}

impl Work {
    /// True once deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// True if the cleanup finalizer is attached
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|s| s == WORK_FINALIZER))
    }
}
