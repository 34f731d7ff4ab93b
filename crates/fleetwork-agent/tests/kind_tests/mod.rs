//! Integration tests for the fleetwork agent
//!
//! - `work_lifecycle`: Stories about a Work being created, edited and deleted
//!   on the hub while the agent keeps the member cluster in step

mod helpers;
mod work_lifecycle;
