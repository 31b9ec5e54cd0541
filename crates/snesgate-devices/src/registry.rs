/*!
 * Per-factory device slot.
 *
 * Each factory keeps one [`FactorySlot`]: at most one attached device, the
 * last discovery error and the last backend version seen.
 */
use tracing::{debug, info};

use crate::device::SharedDevice;

/// Registry entry of a single factory
#[derive(Debug, Default)]
pub struct FactorySlot {
    device: Option<SharedDevice>,
    attach_error: Option<String>,
    backend_version: Option<String>,
}

impl FactorySlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// The attached device, if any
    pub fn device(&self) -> Option<&SharedDevice> {
        self.device.as_ref()
    }

    /// Check whether a device with `name` is attached
    pub fn holds(&self, name: &str) -> bool {
        self.device.as_ref().map_or(false, |d| d.name() == name)
    }

    /// Attach a device, clearing any recorded error
    pub fn attach(&mut self, device: SharedDevice) {
        info!("Attached {}", device.name());
        self.attach_error = None;
        self.device = Some(device);
    }

    /// Detach and return the device
    pub fn detach(&mut self) -> Option<SharedDevice> {
        let device = self.device.take();
        if let Some(device) = &device {
            debug!("Detached {}", device.name());
        }
        device
    }

    /// Record why discovery did not attach a device
    pub fn record_error<S: Into<String>>(&mut self, message: S) {
        let message = message.into();
        debug!("Attach error: {}", message);
        self.attach_error = Some(message);
    }

    /// Last recorded attach error
    pub fn attach_error(&self) -> Option<&str> {
        self.attach_error.as_deref()
    }

    /// Remember the backend version
    pub fn set_backend_version<S: Into<String>>(&mut self, version: S) {
        self.backend_version = Some(version.into());
    }

    /// Last backend version seen
    pub fn backend_version(&self) -> Option<&str> {
        self.backend_version.as_deref()
    }

    /// Drop the device, the error and the version
    pub fn clear(&mut self) -> Option<SharedDevice> {
        self.attach_error = None;
        self.backend_version = None;
        self.detach()
    }
}
