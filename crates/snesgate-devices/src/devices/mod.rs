/*!
 * Backend device implementations.
 *
 * Each backend kind provides a [`Device`](crate::device::Device) adapter and
 * the [`DeviceFactory`](crate::factory::DeviceFactory) that discovers it.
 */

#[cfg(feature = "retroarch")]
pub mod retroarch;
#[cfg(feature = "retroarch")]
pub mod retroarch_factory;

#[cfg(feature = "retroarch")]
pub use retroarch::{RetroArchDevice, DEVICE_NAME as RETROARCH_DEVICE_NAME};
#[cfg(feature = "retroarch")]
pub use retroarch_factory::{RetroArchFactory, FACTORY_NAME as RETROARCH_FACTORY_NAME};
