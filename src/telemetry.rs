//! Tracing initialisation shared by every entry point.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to initialise tracing: {0}")]
    Init(String),
}

/// Initialise structured JSON logging.
///
/// Respects `RUST_LOG`; defaults to info globally with debug for the
/// bridge's own crates. Call once per process.
pub fn init_tracing() -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,coinbridge=debug"));

    let fmt_layer = fmt::layer().with_target(true).with_level(true).json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    Ok(())
}

/// Plain (non-JSON) variant for interactive runs and tests.
pub fn init_tracing_pretty() -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,coinbridge=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    Ok(())
}
