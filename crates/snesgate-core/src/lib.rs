/*!
 * snesgate Core
 *
 * This crate provides the ambient layer shared by every snesgate crate:
 * configuration, logging, the common error type and async helpers.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod utils;

/// snesgate core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("snesgate core {} initialized", VERSION);
    Ok(())
}

/// Library initialization driven by a loaded configuration
pub fn init_with_config(config: &config::Config) -> Result<(), error::Error> {
    logging::init_with_config(&config.logging)?;
    tracing::info!("snesgate core {} initialized", VERSION);
    Ok(())
}
