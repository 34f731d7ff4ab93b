//! Work controllers for a member cluster
//!
//! Watches Work objects in the cluster's hub namespace, applies their
//! manifests to the member cluster, records what was applied in an
//! AppliedWork, and removes resources that leave a Work.

#![deny(missing_docs)]

/// Manifest apply controller
pub mod apply;
/// Periodic resync of AppliedWork records
pub mod applied_work;
/// Hub and member-cluster API seams
pub mod client;
/// Shared controller context and error policy
pub mod context;
/// Finalizer and AppliedWork lifecycle controller
pub mod finalize;
/// Watch event predicates
pub mod predicates;
/// Manifest decoding and kind resolution
pub mod resolver;
/// Applied-resource tracking and garbage collection
pub mod tracker;

#[cfg(test)]
mod testing;

pub use client::{
    DeleteOutcome, HubClient, HubClientImpl, SpokeClient, SpokeClientImpl,
};
pub use context::{error_policy, Context, ContextBuilder, DEFAULT_RESYNC_INTERVAL};
pub use predicates::{filter_events, EventFilter, EventPredicate, GenerationChanged, UpdateOnly};
pub use resolver::{DiscoveryRestMapper, ResourceMapping, RestMapper};
