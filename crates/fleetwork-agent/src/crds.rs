//! CRD printing and installation
//!
//! Work lives on the hub and AppliedWork on the member cluster, so each
//! cluster only gets the definition it serves.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use fleetwork_common::crd::{AppliedWork, Work};
use fleetwork_common::FIELD_MANAGER;

/// CRD definition with name and resource
struct CrdDef {
    name: String,
    crd: CustomResourceDefinition,
}

impl CrdDef {
    fn of<K: CustomResourceExt>() -> Self {
        Self {
            name: K::crd_name().to_string(),
            crd: K::crd(),
        }
    }
}

fn hub_crds() -> Vec<CrdDef> {
    vec![CrdDef::of::<Work>()]
}

fn spoke_crds() -> Vec<CrdDef> {
    vec![CrdDef::of::<AppliedWork>()]
}

/// Render both CRDs as a multi-document YAML stream
pub fn render_crds() -> anyhow::Result<String> {
    let mut out = String::new();
    for def in hub_crds().into_iter().chain(spoke_crds()) {
        let yaml = serde_yaml::to_string(&def.crd)
            .map_err(|e| anyhow::anyhow!("failed to serialize {} CRD: {}", def.name, e))?;
        out.push_str("---\n");
        out.push_str(&yaml);
    }
    Ok(out)
}

/// Install a set of CRDs using server-side apply
async fn install_crds(client: &Client, crds_to_install: Vec<CrdDef>) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in crds_to_install {
        tracing::info!(crd = %def.name, "installing CRD");
        crds.patch(&def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }
    Ok(())
}

/// Ensure the Work CRD exists on the hub and the AppliedWork CRD on the member cluster
pub async fn ensure_crds(hub: &Client, spoke: &Client) -> anyhow::Result<()> {
    install_crds(hub, hub_crds()).await?;
    install_crds(spoke, spoke_crds()).await?;
    tracing::info!("CRDs installed/updated");
    Ok(())
}
