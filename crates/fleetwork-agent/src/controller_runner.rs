//! Controller runner - builds the four work controllers
//!
//! Hub-side controllers watch Works in one namespace through a reflector and
//! an [`EventFilter`], so each only wakes for the changes it cares about.
//! The member-side monitor watches AppliedWorks and relies on its own requeue.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client};

use fleetwork_common::crd::{AppliedWork, Work};
use fleetwork_common::Error;
use fleetwork_work::{
    applied_work, apply, error_policy, filter_events, finalize, tracker, Context, EventFilter,
    EventPredicate, GenerationChanged, UpdateOnly,
};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Run a reconcile under a deadline, turning expiry into a timeout error
async fn bounded<F>(context: &'static str, deadline: Duration, reconcile: F) -> Result<Action, Error>
where
    F: Future<Output = Result<Action, Error>>,
{
    match tokio::time::timeout(deadline, reconcile).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(context, deadline.as_secs())),
    }
}

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Controller over namespaced Works, triggered only by events `predicate` admits
fn filtered_work_controller<P>(works: Api<Work>, predicate: P) -> Controller<Work>
where
    P: EventPredicate<Work> + 'static,
{
    let (reader, writer) = reflector::store();
    let events = watcher(works, watcher_config())
        .default_backoff()
        .reflect(writer);
    let triggers = filter_events(events, EventFilter::new(predicate));
    Controller::for_stream(triggers, reader)
}

/// Build the lifecycle, apply, status and applied-work controllers
pub fn build_work_controllers(
    hub: Client,
    spoke: Client,
    ctx: Arc<Context>,
    reconcile_timeout: Duration,
) -> Vec<ControllerFuture> {
    let works: Api<Work> = Api::namespaced(hub, &ctx.work_namespace);
    let applied_works: Api<AppliedWork> = Api::all(spoke);

    tracing::info!(namespace = %ctx.work_namespace, "starting work controllers");

    let finalize_ctrl = filtered_work_controller(works.clone(), GenerationChanged)
        .shutdown_on_signal()
        .run(
            move |work, ctx| bounded("finalize-work", reconcile_timeout, finalize::reconcile(work, ctx)),
            error_policy,
            ctx.clone(),
        )
        .for_each(log_reconcile_result("FinalizeWork"));

    let apply_ctrl = filtered_work_controller(works.clone(), GenerationChanged)
        .shutdown_on_signal()
        .run(
            move |work, ctx| bounded("apply-work", reconcile_timeout, apply::reconcile(work, ctx)),
            error_policy,
            ctx.clone(),
        )
        .for_each(log_reconcile_result("ApplyWork"));

    let status_ctrl = filtered_work_controller(works, UpdateOnly)
        .shutdown_on_signal()
        .run(
            move |work, ctx| bounded("work-status", reconcile_timeout, tracker::reconcile(work, ctx)),
            error_policy,
            ctx.clone(),
        )
        .for_each(log_reconcile_result("WorkStatus"));

    let applied_ctrl = Controller::new(applied_works, watcher_config())
        .shutdown_on_signal()
        .run(
            move |applied, ctx| {
                bounded("applied-work", reconcile_timeout, applied_work::reconcile(applied, ctx))
            },
            error_policy,
            ctx,
        )
        .for_each(log_reconcile_result("AppliedWork"));

    tracing::info!("- FinalizeWork controller");
    tracing::info!("- ApplyWork controller");
    tracing::info!("- WorkStatus controller");
    tracing::info!("- AppliedWork controller");

    vec![
        Box::pin(finalize_ctrl),
        Box::pin(apply_ctrl),
        Box::pin(status_ctrl),
        Box::pin(applied_ctrl),
    ]
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
