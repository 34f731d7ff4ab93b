//! AppliedWork: the member-cluster record of what a Work actually applied

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::work::{ResourceIdentifier, ResourceKey, Work};

/// Specification for an AppliedWork
///
/// Cluster-scoped and named after its Work. Every resource applied for the
/// Work carries an owner reference to this object, so deleting it with
/// foreground propagation lets the cluster's garbage collector remove them.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "multicluster.x-k8s.io",
    version = "v1alpha1",
    kind = "AppliedWork",
    plural = "appliedworks",
    status = "AppliedWorkStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Work","type":"string","jsonPath":".spec.workName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppliedWorkSpec {
    /// Name of the Work on the hub
    pub work_name: String,
    /// Namespace of the Work on the hub
    pub work_namespace: String,
}

/// Status for an AppliedWork
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedWorkStatus {
    /// Resources currently live on this cluster because of the Work
    #[serde(default)]
    pub applied_resources: Vec<AppliedResourceMeta>,
}

/// One resource the Work has applied
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppliedResourceMeta {
    /// API group (empty for the core group)
    #[serde(default)]
    pub group: String,
    /// API version
    pub version: String,
    /// Plural resource name
    pub resource: String,
    /// Namespace, empty for cluster-scoped resources
    #[serde(default)]
    pub namespace: String,
    /// Object name
    pub name: String,
    /// UID observed for the live object, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl AppliedResourceMeta {
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
}

impl From<&ResourceIdentifier> for AppliedResourceMeta {
    fn from(id: &ResourceIdentifier) -> Self {
        Self {
            group: id.group.clone(),
            version: id.version.clone(),
            resource: id.resource.clone(),
            namespace: id.namespace.clone(),
            name: id.name.clone(),
            uid: None,
        }
    }
}

impl AppliedWork {
    /// Build the record for a Work, named after it
    pub fn for_work(work: &Work) -> Self {
        AppliedWork::new(
            &work.name_any(),
            AppliedWorkSpec {
                work_name: work.name_any(),
                work_namespace: work.namespace().unwrap_or_default(),
            },
        )
    }

    /// Currently tracked resources
    pub fn applied_resources(&self) -> &[AppliedResourceMeta] {
        self.status
            .as_ref()
            .map(|s| s.applied_resources.as_slice())
            .unwrap_or_default()
    }

    /// True once deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Owner reference stamped on every resource applied for this record.
    ///
    /// Returns `None` until the record has been persisted and has a uid.
    /// The reference blocks owner deletion but never claims controller
    /// status, so several records can own the same resource.
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        let uid = self.metadata.uid.clone()?;
        Some(OwnerReference {
            api_version: AppliedWork::api_version(&()).to_string(),
            kind: AppliedWork::kind(&()).to_string(),
            name: self.name_any(),
            uid,
            block_owner_deletion: Some(true),
            controller: None,
        })
    }
}
