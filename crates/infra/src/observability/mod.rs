//! Observability infrastructure
//!
//! Resilience components emit structured `tracing` events; this module
//! installs the subscriber that renders them.

pub mod logging;

pub use logging::{init, LogFormat};
