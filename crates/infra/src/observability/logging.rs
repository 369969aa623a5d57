//! Tracing subscriber setup
//!
//! `RUST_LOG` controls filtering (default `info`). Output is either
//! human-readable or one JSON object per line.

use std::str::FromStr;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{InfraError, Result};

static INSTALLED: OnceCell<LogFormat> = OnceCell::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = InfraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(InfraError::Config(format!("Unknown log format: {other}"))),
        }
    }
}

/// Install the global subscriber.
///
/// Calling it again after a successful install is a no-op, whatever format
/// is requested.
///
/// # Errors
/// Returns `InfraError::Internal` if another subscriber was installed by
/// someone else.
pub fn init(format: LogFormat) -> Result<()> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => {
            registry.with(fmt::layer().json().with_current_span(true)).try_init()
        }
    };
    installed
        .map_err(|e| InfraError::Internal(format!("Failed to install tracing subscriber: {e}")))?;

    let _ = INSTALLED.set(format);
    tracing::debug!(?format, "Tracing subscriber installed");
    Ok(())
}
