//! Work lifecycle controller
//!
//! The cleanup finalizer gates the AppliedWork record: the record is created
//! before the finalizer is attached, and the finalizer is only removed after
//! the record has been deleted with foreground propagation.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use fleetwork_common::crd::{AppliedWork, Work};
use fleetwork_common::{Error, WORK_FINALIZER};

use crate::context::Context;

/// Where a Work is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// No finalizer and no deletion requested
    Unmanaged,
    /// Finalizer attached; the AppliedWork exists
    Tracked,
    /// Deletion requested while the finalizer is still attached
    Terminating,
    /// Deletion requested and the finalizer removed
    Gone,
}

impl LifecycleState {
    /// Classify a Work from its finalizers and deletion timestamp
    pub fn of(work: &Work) -> Self {
        match (work.has_finalizer(), work.is_deleting()) {
            (false, false) => Self::Unmanaged,
            (true, false) => Self::Tracked,
            (true, true) => Self::Terminating,
            (false, true) => Self::Gone,
        }
    }
}

/// Create the AppliedWork, then attach the finalizer
async fn start_tracking(work: &Work, ctx: &Context) -> Result<(), Error> {
    match ctx.spoke.create_applied_work(&AppliedWork::for_work(work)).await {
        Ok(_) => info!("created appliedWork"),
        Err(e) if e.is_already_exists() => debug!("appliedWork already exists"),
        Err(e) => return Err(e),
    }
    ctx.hub.add_work_finalizer(work, WORK_FINALIZER).await?;
    info!("attached finalizer");
    Ok(())
}

/// Foreground-delete the AppliedWork, then release the finalizer
async fn finish_tracking(work: &Work, ctx: &Context) -> Result<(), Error> {
    ctx.spoke.delete_applied_work(&work.name_any()).await?;
    info!("deleted appliedWork with foreground propagation");
    ctx.hub.remove_work_finalizer(work, WORK_FINALIZER).await?;
    info!("removed finalizer");
    Ok(())
}

/// Reconcile a Work's finalizer and AppliedWork record
#[instrument(skip(work, ctx), fields(work = %work.name_any(), namespace = ?work.namespace()))]
pub async fn reconcile(work: Arc<Work>, ctx: Arc<Context>) -> Result<Action, Error> {
    let state = LifecycleState::of(&work);
    debug!(?state, "reconciling work lifecycle");
    match state {
        LifecycleState::Unmanaged => start_tracking(&work, &ctx).await?,
        LifecycleState::Terminating => finish_tracking(&work, &ctx).await?,
        LifecycleState::Tracked | LifecycleState::Gone => {}
    }
    Ok(Action::await_change())
}
