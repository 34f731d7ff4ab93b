//! Periodic consistency monitor for AppliedWork records
//!
//! Re-runs the applied-resource sync on a timer, independent of hub events,
//! so drift on the member cluster is noticed even when no Work changes.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, instrument};

use fleetwork_common::crd::AppliedWork;
use fleetwork_common::Error;

use crate::context::Context;
use crate::tracker::sync_applied_resources;

/// Resync one AppliedWork and schedule the next run
#[instrument(skip(applied, ctx), fields(applied_work = %applied.name_any()))]
pub async fn reconcile(applied: Arc<AppliedWork>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = applied.name_any();
    let Some(current) = ctx.spoke.get_applied_work(&name).await? else {
        debug!("appliedWork is gone, stopping resync");
        return Ok(Action::await_change());
    };

    let namespace = if current.spec.work_namespace.is_empty() {
        ctx.work_namespace.clone()
    } else {
        current.spec.work_namespace.clone()
    };
    sync_applied_resources(&ctx, &namespace, &name, None, Some(current)).await?;
    Ok(Action::requeue(ctx.resync_interval))
}
