//! Configuration loading and management
//!
//! Settings for the resilience layer, loaded from environment variables and
//! files.

pub mod loader;
pub mod settings;

// Re-export commonly used items
pub use loader::{load, load_from_env, load_from_file, load_or_default, probe_config_paths};
pub use settings::{HealthCheckSettings, ResilienceSettings};
