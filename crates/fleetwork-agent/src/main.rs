//! fleetwork-agent - applies hub Work objects to a member cluster

use std::sync::Arc;

use clap::Parser;

use fleetwork_agent::config::Cli;
use fleetwork_agent::controller_runner::build_work_controllers;
use fleetwork_agent::crds::{ensure_crds, render_crds};
use fleetwork_agent::hub::hub_client;
use fleetwork_common::kube_utils::create_client;
use fleetwork_common::telemetry::init_logging;
use fleetwork_work::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        print!("{}", render_crds()?);
        return Ok(());
    }

    init_logging(cli.log_format)?;
    run(cli).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let work_namespace = cli
        .work_namespace
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--work-namespace is required"))?;
    tracing::info!(namespace = %work_namespace, "fleetwork agent starting...");

    let spoke = create_client(None)
        .await
        .map_err(|e| anyhow::anyhow!("failed to create member cluster client: {}", e))?;
    let hub = hub_client(&cli.hub_source(), &spoke)
        .await
        .map_err(|e| anyhow::anyhow!("failed to create hub client: {}", e))?;

    if cli.install_crds {
        ensure_crds(&hub, &spoke).await?;
    }

    let ctx = Arc::new(
        Context::builder(hub.clone(), spoke.clone(), work_namespace)
            .resync_interval(cli.resync_interval())
            .build(),
    );

    let controllers = build_work_controllers(hub, spoke, ctx, cli.reconcile_timeout());
    futures::future::join_all(controllers).await;

    tracing::info!("fleetwork agent stopped");
    Ok(())
}
