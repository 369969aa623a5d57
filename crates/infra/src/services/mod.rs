//! Long-running background services

pub mod maintenance;

pub use maintenance::MaintenanceService;
