/*!
 * Prelude module for snesgate core.
 *
 * This module re-exports commonly used types and functions from the core
 * crate to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export config types
pub use crate::config::{Config, ConfigBuilder, DispatcherConfig, LoggingConfig, RetroArchConfig};

// Re-export utility functions
pub use crate::utils::{spawn_and_log, with_timeout};

// Re-export logging helpers
pub use crate::logging::{command_span, device_span};
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
