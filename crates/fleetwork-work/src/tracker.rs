//! Applied-resource tracking and garbage collection
//!
//! Compares the resources a Work declares as applied with the resources its
//! AppliedWork recorded, releases what fell out of the Work, and persists the
//! new set. A stale resource that other AppliedWorks still own only loses this
//! record's owner reference; it is deleted once no other owner is left. The
//! record is only rewritten after every stale resource has been released, so
//! a crash mid-cleanup replays the same diff.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use fleetwork_common::crd::{
    AppliedResourceMeta, AppliedWork, ResourceIdentifier, ResourceKey, Work,
};
use fleetwork_common::Error;

use crate::client::{DeleteOutcome, SpokeClient};
use crate::context::Context;
use crate::resolver::ResourceMapping;

/// Result of comparing declared and tracked resources
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppliedDiff {
    /// Every declared resource, reusing the tracked entry when one exists
    pub retained_or_new: Vec<AppliedResourceMeta>,
    /// Tracked resources that are no longer declared
    pub stale: Vec<AppliedResourceMeta>,
}

/// Diff declared identifiers against tracked entries by identity.
///
/// Ordinal and uid take no part in the comparison. Existing entries are kept
/// as-is so their uid survives; output follows declaration order.
pub fn compute_applied_diff(
    declared: &[ResourceIdentifier],
    tracked: &[AppliedResourceMeta],
) -> AppliedDiff {
    let tracked_by_key: HashMap<ResourceKey, &AppliedResourceMeta> =
        tracked.iter().map(|m| (m.key(), m)).collect();

    let mut declared_keys = HashSet::new();
    let retained_or_new = declared
        .iter()
        .filter(|id| declared_keys.insert(id.key()))
        .map(|id| {
            tracked_by_key
                .get(&id.key())
                .map(|m| (*m).clone())
                .unwrap_or_else(|| AppliedResourceMeta::from(id))
        })
        .collect();

    let mut stale_keys = HashSet::new();
    let stale = tracked
        .iter()
        .filter(|m| !declared_keys.contains(&m.key()))
        .filter(|m| stale_keys.insert(m.key()))
        .cloned()
        .collect();

    AppliedDiff {
        retained_or_new,
        stale,
    }
}

/// Check that a Work and its AppliedWork exist together.
///
/// Returns the pair when both exist and neither is mid-transition, `None`
/// while the lifecycle controller is creating or tearing down the record,
/// and a consistency error when one side is missing outside that window.
pub fn check_consistent_exist<'a>(
    name: &str,
    work: Option<&'a Work>,
    applied: Option<&'a AppliedWork>,
) -> Result<Option<(&'a Work, &'a AppliedWork)>, Error> {
    match (work, applied) {
        (None, None) => Ok(None),
        (None, Some(applied)) if applied.is_deleting() => Ok(None),
        (None, Some(_)) => Err(Error::consistency(
            name,
            "work finalizer didn't delete the appliedWork",
        )),
        (Some(work), None) if !work.has_finalizer() || work.is_deleting() => Ok(None),
        (Some(_), None) => Err(Error::consistency(
            name,
            "work controller didn't create the appliedWork",
        )),
        (Some(work), Some(applied)) => {
            if !work.has_finalizer() || work.is_deleting() || applied.is_deleting() {
                Ok(None)
            } else {
                Ok(Some((work, applied)))
            }
        }
    }
}

/// What releasing one stale resource did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Release {
    /// This record was the last owner and the object was deleted
    Deleted(DeleteOutcome),
    /// Other owners remain; only this record's owner reference was removed
    OwnerRemoved {
        /// Number of owners left on the object
        remaining: usize,
    },
    /// The object belongs to others only and was left untouched
    NotOwned,
}

/// Release one stale resource held by the AppliedWork with uid `owner_uid`.
///
/// A missing object, or one whose uid no longer matches the tracked entry,
/// counts as already gone.
pub async fn release_stale(
    spoke: &dyn SpokeClient,
    owner_uid: &str,
    meta: &AppliedResourceMeta,
) -> Result<Release, Error> {
    let Some(live) = spoke.get_tracked_resource(meta).await? else {
        return Ok(Release::Deleted(DeleteOutcome::AlreadyGone));
    };
    if meta.uid.is_some() && live.metadata.uid != meta.uid {
        return Ok(Release::Deleted(DeleteOutcome::AlreadyGone));
    }

    let owners = live.owner_references();
    let others: Vec<OwnerReference> = owners
        .iter()
        .filter(|o| o.uid != owner_uid)
        .cloned()
        .collect();
    if others.is_empty() {
        return Ok(Release::Deleted(spoke.delete_resource(meta).await?));
    }
    if others.len() == owners.len() {
        return Ok(Release::NotOwned);
    }
    spoke
        .patch_owner_references(&ResourceMapping::for_tracked(meta), &live, &others)
        .await?;
    Ok(Release::OwnerRemoved {
        remaining: others.len(),
    })
}

/// Release every stale resource, aggregating failures.
pub async fn delete_stale(
    spoke: &dyn SpokeClient,
    owner_uid: &str,
    stale: &[AppliedResourceMeta],
) -> Result<(), Error> {
    let mut failures = Vec::new();
    for meta in stale {
        match release_stale(spoke, owner_uid, meta).await {
            Ok(Release::Deleted(DeleteOutcome::Deleted { uid })) => {
                info!(resource = %meta.key(), ?uid, "deleted stale resource");
            }
            Ok(Release::Deleted(DeleteOutcome::AlreadyGone)) => {
                debug!(resource = %meta.key(), "stale resource already gone");
            }
            Ok(Release::OwnerRemoved { remaining }) => {
                info!(resource = %meta.key(), remaining, "stale resource kept for its other owners");
            }
            Ok(Release::NotOwned) => {
                debug!(resource = %meta.key(), "stale resource is not owned by this record");
            }
            Err(e) => {
                warn!(resource = %meta.key(), error = %e, "failed to release stale resource");
                failures.push(format!("{}: {}", meta.key(), e));
            }
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::deletion(failures))
    }
}

/// Record the uid of each entry's live object, clearing it if the object is gone
async fn refresh_uids(
    spoke: &dyn SpokeClient,
    resources: &mut [AppliedResourceMeta],
) -> Result<(), Error> {
    for meta in resources.iter_mut() {
        let uid = spoke
            .get_tracked_resource(meta)
            .await?
            .and_then(|obj| obj.metadata.uid);
        if uid.is_none() {
            info!(resource = %meta.key(), "tracked resource is missing from the cluster");
        }
        meta.uid = uid;
    }
    Ok(())
}

/// Bring an AppliedWork's resource set in line with its Work's status.
///
/// Either object may be passed in when the caller already holds a fresh
/// copy; missing ones are read from their cluster.
pub async fn sync_applied_resources(
    ctx: &Context,
    namespace: &str,
    name: &str,
    work: Option<Work>,
    applied: Option<AppliedWork>,
) -> Result<(), Error> {
    let work = match work {
        Some(work) => Some(work),
        None => ctx.hub.get_work(namespace, name).await?,
    };
    let applied = match applied {
        Some(applied) => Some(applied),
        None => ctx.spoke.get_applied_work(name).await?,
    };

    let Some((work, applied)) = check_consistent_exist(name, work.as_ref(), applied.as_ref())?
    else {
        debug!(work = %name, "work is in a lifecycle transition, skipping sync");
        return Ok(());
    };

    let declared = work
        .status
        .as_ref()
        .map(|s| s.declared_applied())
        .unwrap_or_default();
    let diff = compute_applied_diff(&declared, applied.applied_resources());

    let owner_uid = applied.uid().unwrap_or_default();
    delete_stale(ctx.spoke.as_ref(), &owner_uid, &diff.stale).await?;

    let mut resources = diff.retained_or_new;
    refresh_uids(ctx.spoke.as_ref(), &mut resources).await?;

    if resources.as_slice() != applied.applied_resources() {
        ctx.spoke
            .update_applied_resources(applied, &resources)
            .await?;
        info!(
            work = %name,
            tracked = resources.len(),
            removed = diff.stale.len(),
            "updated applied resources"
        );
    }
    Ok(())
}

/// Reconcile the applied resource set after a Work's status changed
#[instrument(skip(work, ctx), fields(work = %work.name_any(), namespace = ?work.namespace()))]
pub async fn reconcile(work: Arc<Work>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = work.namespace().unwrap_or_else(|| ctx.work_namespace.clone());
    sync_applied_resources(
        &ctx,
        &namespace,
        &work.name_any(),
        Some(work.as_ref().clone()),
        None,
    )
    .await?;
    Ok(Action::await_change())
}
