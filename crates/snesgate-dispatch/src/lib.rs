/*!
 * snesgate Dispatch
 *
 * Routes uniform client requests to attached devices. Each device gets a
 * worker that serializes its commands and watches it for disconnects and
 * wedged backends.
 */

#![warn(missing_docs)]

// Re-export core types
pub use snesgate_core::prelude;

pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod session;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use protocol::{ClientReply, ClientRequest, Opcode};
pub use session::Session;
pub use worker::{DeviceHandle, SharedFactory};

/// snesgate dispatch crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the dispatch layer
pub fn init() -> Result<()> {
    snesgate_devices::init()?;
    tracing::info!("snesgate dispatch {} initialized", VERSION);
    Ok(())
}
