//! Apply engine and apply-work controller
//!
//! Each manifest of a Work is resolved, then created or replaced on the
//! member cluster with a content-hash annotation and an owner reference to
//! the Work's AppliedWork. The outcome of every manifest is reported
//! independently in `status.manifestConditions`.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use fleetwork_common::crd::{
    set_condition, AppliedWork, Condition, ConditionStatus, ManifestCondition, Work, WorkStatus,
};
use fleetwork_common::kube_utils::{manifest_hash, spec_hash_of};
use fleetwork_common::{Error, CONDITION_APPLIED, SPEC_HASH_ANNOTATION};

use crate::client::SpokeClient;
use crate::context::Context;
use crate::resolver::{resolve_manifest, RestMapper, ResolvedManifest};

/// Requeue delay while waiting for the lifecycle controller to attach the finalizer
pub const FINALIZER_WAIT: Duration = Duration::from_secs(5);

const REASON_MANIFEST_COMPLETE: &str = "AppliedManifestComplete";
const REASON_WORK_COMPLETE: &str = "WorkAppliedComplete";
const REASON_WORK_FAILED: &str = "WorkAppliedFailed";

/// What applying one manifest did to the live object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyAction {
    /// Object did not exist and was created
    Created,
    /// Content hash differed and the object was replaced
    Updated,
    /// Content matched; only our owner reference was added
    OwnerAdded,
    /// Content and ownership already matched; nothing was written
    Unchanged,
}

/// Add `owner` to `existing` unless an owner with the same uid is present.
///
/// Returns `None` when nothing needs to change. Other owners are kept in
/// their original order.
pub fn merge_owner_references(
    existing: &[OwnerReference],
    owner: &OwnerReference,
) -> Option<Vec<OwnerReference>> {
    if existing.iter().any(|o| o.uid == owner.uid) {
        return None;
    }
    let mut merged = existing.to_vec();
    merged.push(owner.clone());
    Some(merged)
}

fn stamp_desired(
    resolved: &ResolvedManifest,
    hash: &str,
    owners: Vec<OwnerReference>,
) -> kube::api::DynamicObject {
    let mut desired = resolved.object.clone();
    desired
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(SPEC_HASH_ANNOTATION.to_string(), hash.to_string());
    desired.metadata.owner_references = Some(owners);
    desired
}

/// Create or update one resolved manifest on the member cluster.
///
/// A live object whose spec-hash annotation matches the desired content is
/// never rewritten; at most its owner references are patched.
pub async fn apply_manifest(
    spoke: &dyn SpokeClient,
    resolved: &ResolvedManifest,
    owner: &OwnerReference,
) -> Result<ApplyAction, Error> {
    let hash = manifest_hash(&resolved.object)?;
    let live = spoke
        .get_resource(&resolved.mapping, resolved.namespace(), resolved.name())
        .await?;

    let Some(live) = live else {
        let own = resolved.object.owner_references();
        let owners = merge_owner_references(own, owner).unwrap_or_else(|| own.to_vec());
        let desired = stamp_desired(resolved, &hash, owners);
        spoke.create_resource(&resolved.mapping, &desired).await?;
        return Ok(ApplyAction::Created);
    };

    let live_owners = live.owner_references();
    if spec_hash_of(&live.metadata) == Some(hash.as_str()) {
        return match merge_owner_references(live_owners, owner) {
            None => Ok(ApplyAction::Unchanged),
            Some(owners) => {
                spoke
                    .patch_owner_references(&resolved.mapping, &live, &owners)
                    .await?;
                Ok(ApplyAction::OwnerAdded)
            }
        };
    }

    let owners =
        merge_owner_references(live_owners, owner).unwrap_or_else(|| live_owners.to_vec());
    let mut desired = stamp_desired(resolved, &hash, owners);
    desired.metadata.resource_version = live.metadata.resource_version.clone();
    spoke.replace_resource(&resolved.mapping, &desired).await?;
    Ok(ApplyAction::Updated)
}

/// Outcome of applying every manifest of a Work
#[derive(Clone, Debug, PartialEq)]
pub struct WorkApplyResult {
    /// Status to report on the Work
    pub status: WorkStatus,
    /// Number of manifests that failed to apply
    pub failed: usize,
    /// True if some manifest failed for a reason that may clear up by itself
    pub retry: bool,
}

/// Apply every manifest of `work` under `owner` and build its new status.
///
/// Manifests are independent: a failure is recorded on that manifest's
/// condition and the rest are still attempted. Conditions are merged into
/// the previous status so unchanged outcomes keep their transition times.
pub async fn apply_work(
    spoke: &dyn SpokeClient,
    mapper: &dyn RestMapper,
    work: &Work,
    owner: &OwnerReference,
) -> WorkApplyResult {
    let generation = work.metadata.generation;
    let previous = work.status.clone().unwrap_or_default();
    let manifests = &work.spec.workload.manifests;

    let mut manifest_conditions = Vec::with_capacity(manifests.len());
    let mut failed = 0usize;
    let mut retry = false;

    for (ordinal, manifest) in (0u32..).zip(manifests) {
        let (identifier, condition) = match resolve_manifest(mapper, ordinal, manifest).await {
            Err(failure) => {
                warn!(ordinal, error = %failure.error, "manifest could not be resolved");
                failed += 1;
                retry |= failure.error.is_retryable();
                (failure.identifier, failed_condition(&failure.error))
            }
            Ok(resolved) => match apply_manifest(spoke, &resolved, owner).await {
                Ok(action) => {
                    debug!(
                        ordinal,
                        kind = %resolved.identifier.kind,
                        name = %resolved.name(),
                        ?action,
                        "manifest applied"
                    );
                    let condition = Condition::new(
                        CONDITION_APPLIED,
                        ConditionStatus::True,
                        REASON_MANIFEST_COMPLETE,
                        "Apply manifest complete",
                    );
                    (resolved.identifier, condition)
                }
                Err(e) => {
                    warn!(
                        ordinal,
                        kind = %resolved.identifier.kind,
                        name = %resolved.name(),
                        error = %e,
                        "failed to apply manifest"
                    );
                    failed += 1;
                    retry = true;
                    (resolved.identifier, failed_condition(&e))
                }
            },
        };

        let mut conditions = previous
            .manifest_conditions
            .iter()
            .find(|mc| mc.identifier.ordinal == ordinal)
            .map(|mc| mc.conditions.clone())
            .unwrap_or_default();
        set_condition(&mut conditions, condition.with_observed_generation(generation));
        manifest_conditions.push(ManifestCondition {
            identifier,
            conditions,
        });
    }

    let aggregate = if failed == 0 {
        Condition::new(
            CONDITION_APPLIED,
            ConditionStatus::True,
            REASON_WORK_COMPLETE,
            "Apply work complete",
        )
    } else {
        Condition::new(
            CONDITION_APPLIED,
            ConditionStatus::False,
            REASON_WORK_FAILED,
            format!("{} of {} manifests failed to apply", failed, manifests.len()),
        )
    };
    let mut conditions = previous.conditions.clone();
    set_condition(&mut conditions, aggregate.with_observed_generation(generation));

    WorkApplyResult {
        status: WorkStatus {
            conditions,
            manifest_conditions,
        },
        failed,
        retry,
    }
}

fn failed_condition(error: &Error) -> Condition {
    Condition::new(
        CONDITION_APPLIED,
        ConditionStatus::False,
        error.reason(),
        error.to_string(),
    )
}

/// Look up the AppliedWork a Work's resources are owned by.
///
/// Errors if the record is missing even though the finalizer says it was
/// created.
pub(crate) async fn owning_record(
    spoke: &dyn SpokeClient,
    work: &Work,
) -> Result<AppliedWork, Error> {
    spoke.get_applied_work(&work.name_any()).await?.ok_or_else(|| {
        Error::consistency(work.name_any(), "work controller didn't create the appliedWork")
    })
}

/// Reconcile a Work by applying its manifests to the member cluster
#[instrument(skip(work, ctx), fields(work = %work.name_any(), namespace = ?work.namespace()))]
pub async fn reconcile(work: Arc<Work>, ctx: Arc<Context>) -> Result<Action, Error> {
    if work.is_deleting() {
        debug!("work is being deleted, skipping apply");
        return Ok(Action::await_change());
    }
    if !work.has_finalizer() {
        debug!("finalizer not attached yet, waiting");
        return Ok(Action::requeue(FINALIZER_WAIT));
    }

    let applied = owning_record(ctx.spoke.as_ref(), &work).await?;
    if applied.is_deleting() {
        debug!("appliedWork is being deleted, skipping apply");
        return Ok(Action::await_change());
    }
    let owner = applied.owner_reference().ok_or_else(|| {
        Error::internal_with_context("apply-work", "appliedWork has no uid")
    })?;

    let result = apply_work(ctx.spoke.as_ref(), ctx.mapper.as_ref(), &work, &owner).await;

    if work.status.as_ref() != Some(&result.status) {
        ctx.hub.patch_work_status(&work, &result.status).await?;
        info!(
            manifests = result.status.manifest_conditions.len(),
            "updated work status"
        );
    }

    // Periodic re-apply restores out-of-band edits; spec-only failures wait for a change
    if result.failed > 0 && !result.retry {
        Ok(Action::await_change())
    } else {
        Ok(Action::requeue(ctx.resync_interval))
    }
}
