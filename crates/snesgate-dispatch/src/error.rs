/*!
 * Error types for the snesgate dispatcher crate.
 */
use thiserror::Error;

/// Error type for dispatcher operations
#[derive(Error, Debug)]
pub enum Error {
    /// Device contract violation or transport failure
    #[error("Device error: {0}")]
    Device(#[from] snesgate_devices::DeviceError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] snesgate_core::error::Error),

    /// No device with that name is known to any factory
    #[error("Not found: {0}")]
    NotFound(String),

    /// The attached backend does not implement the command
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The device did not complete a command in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The device went away
    #[error("Device closed: {0}")]
    DeviceClosed(String),

    /// Malformed client request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for dispatcher operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new not found error
    pub fn not_found<S: AsRef<str>>(msg: S) -> Self {
        Error::NotFound(msg.as_ref().to_string())
    }

    /// Create a new unsupported error
    pub fn unsupported<S: AsRef<str>>(msg: S) -> Self {
        Error::Unsupported(msg.as_ref().to_string())
    }

    /// Create a new timeout error
    pub fn timeout<S: AsRef<str>>(msg: S) -> Self {
        Error::Timeout(msg.as_ref().to_string())
    }

    /// Create a new device closed error
    pub fn device_closed<S: AsRef<str>>(msg: S) -> Self {
        Error::DeviceClosed(msg.as_ref().to_string())
    }

    /// Create a new invalid request error
    pub fn invalid_request<S: AsRef<str>>(msg: S) -> Self {
        Error::InvalidRequest(msg.as_ref().to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
