/*!
 * Logging functionality for snesgate.
 *
 * This module provides tracing setup and span helpers so every crate logs
 * backend traffic and device lifecycle the same way.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "snesgate_devices=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Initialize the logging system from the `[logging]` configuration section
pub fn init_with_config(config: &LoggingConfig) -> Result<()> {
    if !config.json_format {
        return init_with_filter(&config.level);
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(fmt::layer().json().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a new span for a device instance
///
/// # Arguments
///
/// * `kind` - The backend kind (e.g. "RetroArch")
/// * `name` - The device name, if one is attached
pub fn device_span(kind: &str, name: Option<&str>) -> Span {
    match name {
        Some(name) => tracing::info_span!("device", kind = %kind, name = %name),
        None => tracing::info_span!("device", kind = %kind),
    }
}

/// Create a new span for a client command
///
/// # Arguments
///
/// * `opcode` - The command being executed
/// * `device` - The device executing it
pub fn command_span(opcode: &str, device: &str) -> Span {
    tracing::debug_span!("command", opcode = %opcode, device = %device)
}
