//! Hub and member-cluster API seams
//!
//! Controllers talk to both clusters only through these traits so tests can
//! substitute mocks or in-memory fakes for the real kube clients.

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{
    Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams, Preconditions,
};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use fleetwork_common::crd::{AppliedResourceMeta, AppliedWork, Work, WorkStatus};
use fleetwork_common::Error;

use crate::resolver::ResourceMapping;

/// Result of deleting an applied resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Delete was accepted; carries the uid of the deleted object when returned
    Deleted {
        /// uid of the object the API server deleted
        uid: Option<String>,
    },
    /// Nothing to delete: not found, or the name now belongs to a different object
    AlreadyGone,
}

/// Operations against Work objects on the hub
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HubClient: Send + Sync {
    /// Get a Work by namespace and name
    async fn get_work(&self, namespace: &str, name: &str) -> Result<Option<Work>, Error>;

    /// Replace the status of a Work, conditional on its observed resourceVersion
    async fn patch_work_status(&self, work: &Work, status: &WorkStatus) -> Result<(), Error>;

    /// Add a finalizer, conditional on the Work's observed resourceVersion
    async fn add_work_finalizer(&self, work: &Work, finalizer: &str) -> Result<(), Error>;

    /// Remove a finalizer, conditional on the Work's observed resourceVersion
    async fn remove_work_finalizer(&self, work: &Work, finalizer: &str) -> Result<(), Error>;
}

/// Operations against the member cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpokeClient: Send + Sync {
    /// Get an AppliedWork by name
    async fn get_applied_work(&self, name: &str) -> Result<Option<AppliedWork>, Error>;

    /// Create an AppliedWork
    async fn create_applied_work(&self, applied: &AppliedWork) -> Result<AppliedWork, Error>;

    /// Delete an AppliedWork with foreground propagation; a missing record is not an error
    async fn delete_applied_work(&self, name: &str) -> Result<(), Error>;

    /// Persist the applied resource set, conditional on the record's resourceVersion
    async fn update_applied_resources(
        &self,
        applied: &AppliedWork,
        resources: &[AppliedResourceMeta],
    ) -> Result<(), Error>;

    /// Get an object; `namespace` is empty for cluster-scoped resources
    async fn get_resource(
        &self,
        mapping: &ResourceMapping,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// Create an object
    async fn create_resource(
        &self,
        mapping: &ResourceMapping,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Replace an object; `obj` carries the live resourceVersion
    async fn replace_resource(
        &self,
        mapping: &ResourceMapping,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Overwrite the owner references of a live object
    async fn patch_owner_references(
        &self,
        mapping: &ResourceMapping,
        live: &DynamicObject,
        owners: &[OwnerReference],
    ) -> Result<(), Error>;

    /// Live object behind a tracked entry, or `None` if it does not exist
    async fn get_tracked_resource(
        &self,
        meta: &AppliedResourceMeta,
    ) -> Result<Option<DynamicObject>, Error>;

    /// Delete a tracked resource, preconditioned on its uid when known
    async fn delete_resource(&self, meta: &AppliedResourceMeta) -> Result<DeleteOutcome, Error>;
}

/// Real hub client implementation
pub struct HubClientImpl {
    client: Client,
}

impl HubClientImpl {
    /// Create a new HubClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn patch_finalizers(&self, work: &Work, finalizers: Vec<String>) -> Result<(), Error> {
        let namespace = work.namespace().unwrap_or_default();
        let api: Api<Work> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": work.resource_version(),
                "finalizers": finalizers
            }
        });
        api.patch(&work.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl HubClient for HubClientImpl {
    async fn get_work(&self, namespace: &str, name: &str) -> Result<Option<Work>, Error> {
        let api: Api<Work> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_work_status(&self, work: &Work, status: &WorkStatus) -> Result<(), Error> {
        let namespace = work.namespace().unwrap_or_default();
        let api: Api<Work> = Api::namespaced(self.client.clone(), &namespace);
        let status_patch = serde_json::json!({
            "metadata": { "resourceVersion": work.resource_version() },
            "status": status
        });
        api.patch_status(
            &work.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&status_patch),
        )
        .await?;
        Ok(())
    }

    async fn add_work_finalizer(&self, work: &Work, finalizer: &str) -> Result<(), Error> {
        let mut finalizers = work.finalizers().to_vec();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());
        self.patch_finalizers(work, finalizers).await
    }

    async fn remove_work_finalizer(&self, work: &Work, finalizer: &str) -> Result<(), Error> {
        let finalizers: Vec<String> = work
            .finalizers()
            .iter()
            .filter(|f| *f != finalizer)
            .cloned()
            .collect();
        if finalizers.len() == work.finalizers().len() {
            return Ok(());
        }
        self.patch_finalizers(work, finalizers).await
    }
}

/// Real member-cluster client implementation
pub struct SpokeClientImpl {
    client: Client,
}

impl SpokeClientImpl {
    /// Create a new SpokeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, mapping: &ResourceMapping, namespace: &str) -> Api<DynamicObject> {
        if mapping.namespaced {
            Api::namespaced_with(self.client.clone(), namespace, &mapping.api_resource)
        } else {
            Api::all_with(self.client.clone(), &mapping.api_resource)
        }
    }

    fn tracked_api(&self, meta: &AppliedResourceMeta) -> Api<DynamicObject> {
        self.dynamic_api(&ResourceMapping::for_tracked(meta), &meta.namespace)
    }
}

#[async_trait]
impl SpokeClient for SpokeClientImpl {
    async fn get_applied_work(&self, name: &str) -> Result<Option<AppliedWork>, Error> {
        let api: Api<AppliedWork> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn create_applied_work(&self, applied: &AppliedWork) -> Result<AppliedWork, Error> {
        let api: Api<AppliedWork> = Api::all(self.client.clone());
        Ok(api.create(&PostParams::default(), applied).await?)
    }

    async fn delete_applied_work(&self, name: &str) -> Result<(), Error> {
        let api: Api<AppliedWork> = Api::all(self.client.clone());
        match api
            .delete(name, &DeleteParams::foreground())
            .await
            .map_err(Error::from)
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(applied_work = %name, "AppliedWork already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn update_applied_resources(
        &self,
        applied: &AppliedWork,
        resources: &[AppliedResourceMeta],
    ) -> Result<(), Error> {
        let api: Api<AppliedWork> = Api::all(self.client.clone());
        // resourceVersion in a merge patch makes the write conditional
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": applied.resource_version() },
            "status": { "appliedResources": resources }
        });
        api.patch_status(
            &applied.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    async fn get_resource(
        &self,
        mapping: &ResourceMapping,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.dynamic_api(mapping, namespace).get_opt(name).await?)
    }

    async fn create_resource(
        &self,
        mapping: &ResourceMapping,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let namespace = obj.namespace().unwrap_or_default();
        Ok(self
            .dynamic_api(mapping, &namespace)
            .create(&PostParams::default(), obj)
            .await?)
    }

    async fn replace_resource(
        &self,
        mapping: &ResourceMapping,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let namespace = obj.namespace().unwrap_or_default();
        Ok(self
            .dynamic_api(mapping, &namespace)
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await?)
    }

    async fn patch_owner_references(
        &self,
        mapping: &ResourceMapping,
        live: &DynamicObject,
        owners: &[OwnerReference],
    ) -> Result<(), Error> {
        let namespace = live.namespace().unwrap_or_default();
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": live.resource_version(),
                "ownerReferences": owners
            }
        });
        self.dynamic_api(mapping, &namespace)
            .patch(&live.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_tracked_resource(
        &self,
        meta: &AppliedResourceMeta,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.tracked_api(meta).get_opt(&meta.name).await?)
    }

    async fn delete_resource(&self, meta: &AppliedResourceMeta) -> Result<DeleteOutcome, Error> {
        let params = DeleteParams {
            preconditions: meta.uid.clone().map(|uid| Preconditions {
                uid: Some(uid),
                resource_version: None,
            }),
            ..DeleteParams::background()
        };
        match self
            .tracked_api(meta)
            .delete(&meta.name, &params)
            .await
            .map_err(Error::from)
        {
            Ok(deleted) => Ok(DeleteOutcome::Deleted {
                uid: deleted
                    .left()
                    .and_then(|obj| obj.metadata.uid)
                    .or_else(|| meta.uid.clone()),
            }),
            Err(e) if e.is_not_found() => Ok(DeleteOutcome::AlreadyGone),
            // A failed uid precondition means the name was reused by another object
            Err(e) if e.is_conflict() && meta.uid.is_some() => Ok(DeleteOutcome::AlreadyGone),
            Err(e) => Err(e),
        }
    }
}
