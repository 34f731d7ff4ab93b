//! Command-line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use fleetwork_common::telemetry::LogFormat;

/// Namespace searched for the hub kubeconfig Secret when none is given
pub const DEFAULT_SECRET_NAMESPACE: &str = "work";

/// fleetwork-agent - applies hub Work objects to this member cluster
#[derive(Parser, Debug, Clone)]
#[command(name = "fleetwork-agent", version, about, long_about = None)]
pub struct Cli {
    /// Print the Work and AppliedWork CRDs as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Apply both CRDs to the hub and the member cluster at start-up
    #[arg(long, env = "INSTALL_CRDS")]
    pub install_crds: bool,

    /// Kubeconfig file for the hub cluster
    #[arg(long, env = "HUB_KUBECONFIG", conflicts_with = "hub_kubeconfig_secret")]
    pub hub_kubeconfig: Option<PathBuf>,

    /// Secret on the member cluster whose `kubeconfig` key points at the hub
    #[arg(long, env = "HUB_KUBECONFIG_SECRET")]
    pub hub_kubeconfig_secret: Option<String>,

    /// Namespace of the hub kubeconfig Secret
    #[arg(long, env = "HUB_KUBECONFIG_SECRET_NAMESPACE", default_value = DEFAULT_SECRET_NAMESPACE)]
    pub hub_kubeconfig_secret_namespace: String,

    /// Hub namespace holding this cluster's Works
    #[arg(long, env = "WORK_NAMESPACE", required_unless_present = "crd")]
    pub work_namespace: Option<String>,

    /// Interval between periodic resyncs, in seconds
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub resync_interval_secs: u64,

    /// Deadline for a single reconcile, in seconds
    #[arg(long, env = "RECONCILE_TIMEOUT_SECS", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub reconcile_timeout_secs: u64,

    /// Log output format (json or text)
    #[arg(long, env = "LOG_FORMAT", default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

/// Where the hub client comes from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HubSource {
    /// A kubeconfig file on disk
    File(PathBuf),
    /// The `kubeconfig` key of a Secret on the member cluster
    Secret {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
    },
    /// Same cluster as the member (single-cluster mode)
    InCluster,
}

impl Cli {
    /// Resolve the hub client source from the flags
    pub fn hub_source(&self) -> HubSource {
        match (&self.hub_kubeconfig, &self.hub_kubeconfig_secret) {
            (Some(path), _) => HubSource::File(path.clone()),
            (None, Some(name)) => HubSource::Secret {
                namespace: self.hub_kubeconfig_secret_namespace.clone(),
                name: name.clone(),
            },
            (None, None) => HubSource::InCluster,
        }
    }

    /// Periodic resync interval
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Per-reconcile deadline
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }
}
