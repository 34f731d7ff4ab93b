//! fleetwork agent wiring: configuration, clients, CRDs and controllers

#![deny(missing_docs)]

/// Command-line and environment configuration
pub mod config;
/// Controller construction
pub mod controller_runner;
/// CRD printing and installation
pub mod crds;
/// Hub client construction
pub mod hub;
