//! Common types for fleetwork: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// API version shared by Work and AppliedWork
pub const WORK_API_VERSION: &str = "multicluster.x-k8s.io/v1alpha1";

/// Finalizer placed on a Work once its AppliedWork record exists
pub const WORK_FINALIZER: &str = "multicluster.x-k8s.io/work-cleanup";

/// Annotation carrying the content hash of an applied manifest
pub const SPEC_HASH_ANNOTATION: &str = "multicluster.x-k8s.io/spec-hash";

/// Condition type reported on Work and per manifest
pub const CONDITION_APPLIED: &str = "Applied";

/// Namespace used for namespaced manifests that omit one
pub const DEFAULT_RESOURCE_NAMESPACE: &str = "default";

/// Field manager name used for writes issued by the agent
pub const FIELD_MANAGER: &str = "fleetwork-agent";
