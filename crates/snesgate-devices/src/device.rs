/*!
 * Device trait and core device abstractions.
 *
 * Every backend (USB cartridge, emulator bridge, network console) is
 * adapted to the same [`Device`] contract. Commands are issued through the
 * trait and their results come back as a stream of [`DeviceEvent`]s: for
 * every accepted command exactly one `CommandFinished` is emitted, preceded
 * by one `DataReceived` for reads.
 */
use std::collections::BTreeSet;
use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use snesgate_core::error::Error as CoreError;

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// A command was issued while another one is still outstanding
    #[error("Device busy: {0}")]
    Busy(String),

    /// The call sequence violates the device contract
    #[error("Invalid device state: {0}")]
    InvalidState(String),

    /// Transport-level failure
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Device lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    /// No command outstanding
    Ready,
    /// A command is outstanding
    Busy,
    /// Terminal state; every further request is ignored
    Closed,
}

/// Address space targeted by a memory command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressSpace {
    /// Console memory (WRAM, SRAM, ROM)
    #[serde(rename = "SNES")]
    Snes,
    /// Cartridge control registers
    #[serde(rename = "CMD")]
    Cmd,
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpace::Snes => write!(f, "SNES"),
            AddressSpace::Cmd => write!(f, "CMD"),
        }
    }
}

/// Capability flag reported by an info query
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceFlag {
    /// The ROM itself cannot be read or written
    #[serde(rename = "NO_ROM_ACCESS")]
    NoRomAccess,
    /// File commands are not implemented
    #[serde(rename = "NO_FILE_CMD")]
    NoFileCommands,
    /// Control commands are not implemented
    #[serde(rename = "NO_CONTROL_CMD")]
    NoControlCommands,
}

impl fmt::Display for DeviceFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DeviceFlag::NoRomAccess => "NO_ROM_ACCESS",
            DeviceFlag::NoFileCommands => "NO_FILE_CMD",
            DeviceFlag::NoControlCommands => "NO_CONTROL_CMD",
        };
        f.write_str(text)
    }
}

/// Snapshot returned by an info query. Recomputed on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Label of the content currently running
    pub running: String,
    /// Backend version string
    pub version: String,
    /// Declared capability absences
    pub flags: BTreeSet<DeviceFlag>,
}

impl DeviceInfo {
    /// Check whether a flag is set
    pub fn has_flag(&self, flag: DeviceFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// File-system command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileCommand {
    /// List a directory
    List(String),
    /// Read a file
    Get(String),
    /// Announce a file upload of `size` bytes
    Put {
        /// Destination path
        path: String,
        /// Upload size in bytes
        size: u32,
    },
    /// Rename a file
    Rename {
        /// Current path
        from: String,
        /// New path
        to: String,
    },
    /// Remove a file
    Remove(String),
    /// Create a directory
    MakeDir(String),
}

/// Console control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Reset the console
    Reset,
    /// Return to the cartridge menu
    Menu,
    /// Boot the given ROM
    Boot(String),
}

/// Events emitted by a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Payload of a read; always precedes the matching `CommandFinished`
    DataReceived(Bytes),
    /// The outstanding command has completed
    CommandFinished,
    /// The device (or its transport) was closed
    Closed,
}

/// The uniform device contract
///
/// Requests are asynchronous: a call returns once the backend request has
/// been issued and the outcome arrives on the event stream. Requests made
/// after `close()` are ignored without error. Issuing a request while the
/// device is `Busy` is a caller bug and is rejected.
#[async_trait]
pub trait Device: Send + Sync + Debug {
    /// Human readable device name
    fn name(&self) -> &str;

    /// Current lifecycle state
    fn state(&self) -> DeviceState;

    /// Whether the device is usable. Does not re-establish a dropped transport.
    fn open(&self) -> bool {
        self.state() != DeviceState::Closed
    }

    /// Close the device and release its transport. Idempotent.
    async fn close(&self);

    /// Subscribe to the device's event stream
    fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent>;

    /// Begin reading `size` bytes at `address` in `space`
    async fn request_read(&self, space: AddressSpace, address: u32, size: u32) -> Result<()>;

    /// First phase of a write: set the target address. Must be followed by
    /// exactly one [`Device::write_data`].
    async fn request_write(&self, space: AddressSpace, address: u32, size: u32) -> Result<()>;

    /// Second phase of a write: supply and transmit the payload
    async fn write_data(&self, data: Bytes) -> Result<()>;

    /// Synchronous info snapshot; a `CommandFinished` follows on the event stream
    async fn info_query(&self) -> Result<DeviceInfo>;

    /// Execute a file-system command
    async fn file_command(&self, command: FileCommand) -> Result<()>;

    /// Execute a console control command
    async fn control_command(&self, command: ControlCommand) -> Result<()>;

    /// Whether file commands are implemented
    fn supports_file_commands(&self) -> bool;

    /// Whether control commands are implemented
    fn supports_control_commands(&self) -> bool;
}

/// A device shared between its factory and the dispatcher
pub type SharedDevice = Arc<dyn Device>;
