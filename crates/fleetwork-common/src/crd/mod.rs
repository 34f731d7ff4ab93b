//! Custom Resource Definitions for fleetwork
//!
//! `Work` lives on the hub in the member cluster's namespace; `AppliedWork`
//! is its cluster-scoped counterpart on the member cluster.

mod applied_work;
mod types;
mod work;

pub use applied_work::{AppliedResourceMeta, AppliedWork, AppliedWorkSpec, AppliedWorkStatus};
pub use types::{find_condition, is_condition_true, set_condition, Condition, ConditionStatus};
pub use work::{
    ManifestCondition, ResourceIdentifier, ResourceKey, Work, WorkSpec, WorkStatus, WorkloadTemplate,
};
