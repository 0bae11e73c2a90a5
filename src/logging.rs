//! Log output setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Installs a formatting subscriber filtered by `RUST_LOG`, or by
/// `default_directive` when `RUST_LOG` is unset or invalid.
///
/// # Errors
///
/// [`Error::Configuration`] if a global subscriber is already installed.
pub fn init_with_default(default_directive: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| Error::Configuration(format!("cannot install log subscriber: {e}")))
}

/// [`init_with_default`] with `"info"`.
pub fn init() -> Result<()> {
    init_with_default("info")
}
