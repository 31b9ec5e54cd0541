/*!
 * Device factory contract.
 *
 * A factory discovers backends of one kind and attaches at most one live
 * device for that kind. Discovery failures are never errors: they are
 * recorded and reported through [`DeviceFactory::status`].
 */
use std::fmt::Debug;

use async_trait::async_trait;

use crate::device::SharedDevice;

/// Discovers and owns the device of one backend kind
#[async_trait]
pub trait DeviceFactory: Send + Sync + Debug {
    /// Backend kind name, e.g. `RetroArch`
    fn name(&self) -> &str;

    /// Names of the attached devices, discovering one if none is attached
    async fn list_devices(&mut self) -> Vec<String>;

    /// Re-run discovery and describe the outcome
    async fn status(&mut self) -> String;

    /// Look up an attached device by name
    fn device(&self, name: &str) -> Option<SharedDevice>;

    /// Detach the named device. Returns whether a device was present.
    async fn delete_device(&mut self, name: &str) -> bool;

    /// Forget everything after the backend connection dropped
    async fn handle_disconnect(&mut self);
}

/// A factory owned by the dispatcher
pub type BoxedFactory = Box<dyn DeviceFactory>;
