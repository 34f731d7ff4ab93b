//! In-memory hub and member cluster for multi-step controller tests
//!
//! The fakes honour resourceVersion and uid preconditions, AlreadyExists
//! and owner-reference garbage collection closely enough
//! to run whole lifecycles without an API server.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use kube::api::DynamicObject;
use kube::ResourceExt;

use fleetwork_common::crd::{AppliedResourceMeta, AppliedWork, AppliedWorkStatus, Work, WorkStatus};
use fleetwork_common::error::api_error;
use fleetwork_common::Error;

use crate::client::{DeleteOutcome, HubClient, SpokeClient};
use crate::resolver::ResourceMapping;

type ObjectKey = (String, String, String);

/// A ConfigMap manifest with the given data and no namespace
pub fn configmap_manifest(name: &str, data: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": name},
        "data": data,
    })
}

fn bump(rv: &Option<String>) -> Option<String> {
    let current: u64 = rv.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0);
    Some((current + 1).to_string())
}

fn conflict(what: &str) -> Error {
    api_error(409, "Conflict", format!("{} has been modified", what))
}

#[derive(Default)]
struct SpokeState {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    applied: BTreeMap<String, AppliedWork>,
    failing_deletes: BTreeSet<ObjectKey>,
    next_uid: u64,
    writes: usize,
}

impl SpokeState {
    fn uid(&mut self, prefix: &str) -> String {
        self.next_uid += 1;
        format!("{}-{}", prefix, self.next_uid)
    }

    /// Drop `owner_uid` from every object and delete objects left without owners
    fn collect_garbage(&mut self, owner_uid: &str) {
        let mut orphaned = Vec::new();
        for (key, obj) in self.objects.iter_mut() {
            let owners = obj.metadata.owner_references.get_or_insert_with(Vec::new);
            let before = owners.len();
            owners.retain(|o| o.uid != owner_uid);
            if before > 0 && owners.is_empty() {
                orphaned.push(key.clone());
            }
        }
        for key in orphaned {
            self.objects.remove(&key);
        }
    }
}

/// In-memory member cluster
#[derive(Default)]
pub struct FakeSpoke {
    state: Mutex<SpokeState>,
}

impl FakeSpoke {
    fn with_state<T>(&self, f: impl FnOnce(&mut SpokeState) -> T) -> T {
        f(&mut self.state.lock().expect("mutex should not be poisoned"))
    }

    /// Live object by plural, namespace, and name
    pub fn object(&self, resource: &str, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.with_state(|s| {
            s.objects
                .get(&(resource.to_string(), namespace.to_string(), name.to_string()))
                .cloned()
        })
    }

    /// Number of writes to applied resources (create, replace, owner patch)
    pub fn write_count(&self) -> usize {
        self.with_state(|s| s.writes)
    }

    /// AppliedWork by name
    pub fn applied_work(&self, name: &str) -> Option<AppliedWork> {
        self.with_state(|s| s.applied.get(name).cloned())
    }

    /// Names currently recorded in an AppliedWork's status
    pub fn tracked_names(&self, name: &str) -> Vec<String> {
        self.applied_work(name)
            .map(|a| a.applied_resources().iter().map(|r| r.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Make every delete of this object fail with a server error
    pub fn fail_deletes_of(&self, resource: &str, namespace: &str, name: &str) {
        self.with_state(|s| {
            s.failing_deletes
                .insert((resource.to_string(), namespace.to_string(), name.to_string()))
        });
    }

    /// Let deletes of this object succeed again
    pub fn heal_deletes_of(&self, resource: &str, namespace: &str, name: &str) {
        self.with_state(|s| {
            s.failing_deletes
                .remove(&(resource.to_string(), namespace.to_string(), name.to_string()))
        });
    }

    /// Delete an object behind the agent's back
    pub fn remove_object(&self, resource: &str, namespace: &str, name: &str) {
        self.with_state(|s| {
            s.objects
                .remove(&(resource.to_string(), namespace.to_string(), name.to_string()))
        });
    }

    /// Remove an AppliedWork without cascading, as an operator error would
    pub fn remove_applied_work(&self, name: &str) {
        self.with_state(|s| s.applied.remove(name));
    }

    /// Seed an AppliedWork with a tracked resource set
    pub fn seed_applied_work(&self, mut applied: AppliedWork, resources: Vec<AppliedResourceMeta>) -> AppliedWork {
        self.with_state(|s| {
            applied.metadata.uid = Some(s.uid("aw"));
            applied.metadata.resource_version = Some("1".to_string());
            applied.status = Some(AppliedWorkStatus {
                applied_resources: resources,
            });
            s.applied.insert(applied.name_any(), applied.clone());
            applied
        })
    }

    /// Mark an AppliedWork as being deleted without removing it
    pub fn mark_applied_work_deleting(&self, name: &str) {
        self.with_state(|s| {
            if let Some(applied) = s.applied.get_mut(name) {
                applied.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            }
        });
    }
}

#[async_trait]
impl SpokeClient for FakeSpoke {
    async fn get_applied_work(&self, name: &str) -> Result<Option<AppliedWork>, Error> {
        Ok(self.applied_work(name))
    }

    async fn create_applied_work(&self, applied: &AppliedWork) -> Result<AppliedWork, Error> {
        self.with_state(|s| {
            let name = applied.name_any();
            if s.applied.contains_key(&name) {
                return Err(api_error(409, "AlreadyExists", format!("appliedworks \"{}\" already exists", name)));
            }
            let mut created = applied.clone();
            created.metadata.uid = Some(s.uid("aw"));
            created.metadata.resource_version = Some("1".to_string());
            s.applied.insert(name, created.clone());
            Ok(created)
        })
    }

    async fn delete_applied_work(&self, name: &str) -> Result<(), Error> {
        self.with_state(|s| {
            if let Some(applied) = s.applied.remove(name) {
                if let Some(uid) = applied.metadata.uid {
                    s.collect_garbage(&uid);
                }
            }
        });
        Ok(())
    }

    async fn update_applied_resources(
        &self,
        applied: &AppliedWork,
        resources: &[AppliedResourceMeta],
    ) -> Result<(), Error> {
        self.with_state(|s| {
            let stored = s
                .applied
                .get_mut(&applied.name_any())
                .ok_or_else(|| api_error(404, "NotFound", "appliedwork not found"))?;
            if stored.metadata.resource_version != applied.metadata.resource_version {
                return Err(conflict("appliedwork"));
            }
            stored.status = Some(AppliedWorkStatus {
                applied_resources: resources.to_vec(),
            });
            stored.metadata.resource_version = bump(&stored.metadata.resource_version);
            Ok(())
        })
    }

    async fn get_resource(
        &self,
        mapping: &ResourceMapping,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.object(&mapping.api_resource.plural, namespace, name))
    }

    async fn create_resource(
        &self,
        mapping: &ResourceMapping,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        self.with_state(|s| {
            let key = (
                mapping.api_resource.plural.clone(),
                obj.namespace().unwrap_or_default(),
                obj.name_any(),
            );
            if s.objects.contains_key(&key) {
                return Err(api_error(409, "AlreadyExists", "object already exists"));
            }
            let mut created = obj.clone();
            created.metadata.uid = Some(s.uid("obj"));
            created.metadata.resource_version = Some("1".to_string());
            s.objects.insert(key, created.clone());
            s.writes += 1;
            Ok(created)
        })
    }

    async fn replace_resource(
        &self,
        mapping: &ResourceMapping,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        self.with_state(|s| {
            let key = (
                mapping.api_resource.plural.clone(),
                obj.namespace().unwrap_or_default(),
                obj.name_any(),
            );
            let stored = s
                .objects
                .get_mut(&key)
                .ok_or_else(|| api_error(404, "NotFound", "object not found"))?;
            if stored.metadata.resource_version != obj.metadata.resource_version {
                return Err(conflict("object"));
            }
            let mut replaced = obj.clone();
            replaced.metadata.uid = stored.metadata.uid.clone();
            replaced.metadata.resource_version = bump(&stored.metadata.resource_version);
            *stored = replaced.clone();
            s.writes += 1;
            Ok(replaced)
        })
    }

    async fn patch_owner_references(
        &self,
        mapping: &ResourceMapping,
        live: &DynamicObject,
        owners: &[OwnerReference],
    ) -> Result<(), Error> {
        self.with_state(|s| {
            let key = (
                mapping.api_resource.plural.clone(),
                live.namespace().unwrap_or_default(),
                live.name_any(),
            );
            let stored = s
                .objects
                .get_mut(&key)
                .ok_or_else(|| api_error(404, "NotFound", "object not found"))?;
            if stored.metadata.resource_version != live.metadata.resource_version {
                return Err(conflict("object"));
            }
            stored.metadata.owner_references = Some(owners.to_vec());
            stored.metadata.resource_version = bump(&stored.metadata.resource_version);
            s.writes += 1;
            Ok(())
        })
    }

    async fn get_tracked_resource(
        &self,
        meta: &AppliedResourceMeta,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.object(&meta.resource, &meta.namespace, &meta.name))
    }

    async fn delete_resource(&self, meta: &AppliedResourceMeta) -> Result<DeleteOutcome, Error> {
        self.with_state(|s| {
            let key = (meta.resource.clone(), meta.namespace.clone(), meta.name.clone());
            if s.failing_deletes.contains(&key) {
                return Err(api_error(500, "InternalError", "etcdserver: request timed out"));
            }
            let Some(obj) = s.objects.get(&key) else {
                return Ok(DeleteOutcome::AlreadyGone);
            };
            if meta.uid.is_some() && meta.uid != obj.metadata.uid {
                return Ok(DeleteOutcome::AlreadyGone);
            }
            let uid = obj.metadata.uid.clone();
            s.objects.remove(&key);
            Ok(DeleteOutcome::Deleted { uid })
        })
    }
}

/// In-memory hub holding Works
#[derive(Default)]
pub struct FakeHub {
    works: Mutex<BTreeMap<(String, String), Work>>,
}

impl FakeHub {
    fn with_works<T>(&self, f: impl FnOnce(&mut BTreeMap<(String, String), Work>) -> T) -> T {
        f(&mut self.works.lock().expect("mutex should not be poisoned"))
    }

    /// Store a Work, assigning uid, resourceVersion, and generation 1
    pub fn insert(&self, mut work: Work) -> Work {
        let name = work.name_any();
        work.metadata.uid.get_or_insert_with(|| format!("work-{}", name));
        work.metadata.resource_version = Some("1".to_string());
        work.metadata.generation.get_or_insert(1);
        self.with_works(|w| {
            w.insert((work.namespace().unwrap_or_default(), work.name_any()), work.clone())
        });
        work
    }

    /// Replace a Work's manifests, bumping its generation
    pub fn update_manifests(&self, namespace: &str, name: &str, manifests: Vec<serde_json::Value>) -> Work {
        self.with_works(|w| {
            let work = w
                .get_mut(&(namespace.to_string(), name.to_string()))
                .expect("work should exist");
            work.spec.workload.manifests = manifests;
            work.metadata.generation = work.metadata.generation.map(|g| g + 1);
            work.metadata.resource_version = bump(&work.metadata.resource_version);
            work.clone()
        })
    }

    /// Current copy of a Work
    pub fn work(&self, namespace: &str, name: &str) -> Option<Work> {
        self.with_works(|w| w.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    /// Request deletion: removed at once without finalizers, otherwise marked
    pub fn request_deletion(&self, namespace: &str, name: &str) {
        self.with_works(|w| {
            let key = (namespace.to_string(), name.to_string());
            let Some(work) = w.get_mut(&key) else { return };
            if work.finalizers().is_empty() {
                w.remove(&key);
            } else {
                work.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                work.metadata.resource_version = bump(&work.metadata.resource_version);
            }
        });
    }
}

#[async_trait]
impl HubClient for FakeHub {
    async fn get_work(&self, namespace: &str, name: &str) -> Result<Option<Work>, Error> {
        Ok(self.work(namespace, name))
    }

    async fn patch_work_status(&self, work: &Work, status: &WorkStatus) -> Result<(), Error> {
        self.with_works(|w| {
            let stored = w
                .get_mut(&(work.namespace().unwrap_or_default(), work.name_any()))
                .ok_or_else(|| api_error(404, "NotFound", "work not found"))?;
            if stored.metadata.resource_version != work.metadata.resource_version {
                return Err(conflict("work"));
            }
            stored.status = Some(status.clone());
            stored.metadata.resource_version = bump(&stored.metadata.resource_version);
            Ok(())
        })
    }

    async fn add_work_finalizer(&self, work: &Work, finalizer: &str) -> Result<(), Error> {
        self.with_works(|w| {
            let stored = w
                .get_mut(&(work.namespace().unwrap_or_default(), work.name_any()))
                .ok_or_else(|| api_error(404, "NotFound", "work not found"))?;
            if stored.metadata.resource_version != work.metadata.resource_version {
                return Err(conflict("work"));
            }
            let finalizers = stored.metadata.finalizers.get_or_insert_with(Vec::new);
            if !finalizers.iter().any(|f| f == finalizer) {
                finalizers.push(finalizer.to_string());
                stored.metadata.resource_version = bump(&stored.metadata.resource_version);
            }
            Ok(())
        })
    }

    async fn remove_work_finalizer(&self, work: &Work, finalizer: &str) -> Result<(), Error> {
        self.with_works(|w| {
            let key = (work.namespace().unwrap_or_default(), work.name_any());
            let stored = w
                .get_mut(&key)
                .ok_or_else(|| api_error(404, "NotFound", "work not found"))?;
            if stored.metadata.resource_version != work.metadata.resource_version {
                return Err(conflict("work"));
            }
            if let Some(finalizers) = stored.metadata.finalizers.as_mut() {
                finalizers.retain(|f| f != finalizer);
            }
            stored.metadata.resource_version = bump(&stored.metadata.resource_version);
            if stored.is_deleting() && stored.finalizers().is_empty() {
                w.remove(&key);
            }
            Ok(())
        })
    }
}
