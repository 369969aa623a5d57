//! Shared helpers used by the resilience layer and its configuration
//!
//! - **[`serde`]**: millisecond encodings for `Duration` fields

pub mod serde;

pub use self::serde::duration_millis;
