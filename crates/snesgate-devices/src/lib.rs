/*!
 * snesgate devices
 *
 * The uniform device contract, the factory contract, address-space
 * translation and the backend adapters behind them.
 */

#![warn(missing_docs)]

// Re-export core types
pub use snesgate_core::prelude;

pub mod address;
pub mod device;
pub mod devices;
pub mod factory;
pub mod protocols;
pub mod registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use device::{
    AddressSpace, ControlCommand, Device, DeviceError, DeviceEvent, DeviceFlag, DeviceInfo,
    DeviceState, FileCommand, Result, SharedDevice,
};
pub use factory::{BoxedFactory, DeviceFactory};
pub use registry::FactorySlot;
pub use transport::{Connector, SharedTransport, Transport, UdpConnector, UdpTransport};

/// snesgate devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device layer
pub fn init() -> std::result::Result<(), snesgate_core::error::Error> {
    tracing::info!("snesgate devices {} initialized", VERSION);
    Ok(())
}

/// Backend kinds compiled into this build
pub fn available_backends() -> Vec<&'static str> {
    let mut backends = Vec::new();

    #[cfg(feature = "retroarch")]
    backends.push(devices::RETROARCH_FACTORY_NAME);

    backends
}
