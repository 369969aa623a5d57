//! # ProjectHub Infrastructure
//!
//! Wires the resilience primitives from `projecthub-common` to the
//! inference service.
//!
//! This crate contains:
//! - Settings loading from environment variables and config files
//! - Logging initialisation
//! - The resilient inference client and its backend port
//! - Background health monitoring and circuit maintenance
//!
//! ## Architecture
//! - The inference backend is a port ([`inference::InferenceBackend`]); the
//!   HTTP adapter lives with the application
//! - Every backend call runs inside a retry executor inside a named circuit

pub mod config;
pub mod errors;
pub mod inference;
pub mod observability;
pub mod services;

// Re-export commonly used items
pub use config::ResilienceSettings;
pub use errors::{InfraError, Result};
pub use inference::{InferenceBackend, ResilientInferenceClient};
