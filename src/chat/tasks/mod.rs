//! Long-running task tracking and periodic maintenance.

pub mod maintenance;
pub mod registry;

pub use maintenance::{MaintenanceConfig, MaintenanceStats, MaintenanceWorker};
pub use registry::TaskRegistry;
