//! Scripted devices and factories for dispatcher tests.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use snesgate_devices::device::Result;
use snesgate_devices::{
    AddressSpace, ControlCommand, Device, DeviceError, DeviceEvent, DeviceFactory, DeviceFlag,
    DeviceInfo, DeviceState, FileCommand, SharedDevice,
};

/// How a [`ScriptedDevice`] answers accepted commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Script {
    /// Events are queued before the request call returns
    Immediate,
    /// Busy for a few milliseconds, then completes
    Delayed,
    /// Busy forever
    Hang,
    /// Accepts the request and never answers
    Dropping,
    /// Closes itself on the first request
    Vanish,
}

pub(crate) const LISTING: &[u8] = b"a.sfc\nb.sfc\n";

#[derive(Debug)]
pub(crate) struct ScriptedDevice {
    name: String,
    script: Script,
    commands: bool,
    state: Arc<StdMutex<DeviceState>>,
    events: broadcast::Sender<DeviceEvent>,
    pending_write: StdMutex<Option<(AddressSpace, u32)>>,
    log: StdMutex<Vec<String>>,
}

impl ScriptedDevice {
    pub(crate) fn new(name: &str, script: Script) -> Arc<Self> {
        Self::build(name, script, false)
    }

    /// A device that also implements file and control commands
    pub(crate) fn with_commands(name: &str, script: Script) -> Arc<Self> {
        Self::build(name, script, true)
    }

    fn build(name: &str, script: Script, commands: bool) -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            name: name.to_string(),
            script,
            commands,
            state: Arc::new(StdMutex::new(DeviceState::Ready)),
            events,
            pending_write: StdMutex::new(None),
            log: StdMutex::new(Vec::new()),
        })
    }

    /// Every request the device accepted
    pub(crate) fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn begin(&self, entry: String, data: Option<Bytes>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match *state {
            DeviceState::Closed => return Ok(()),
            DeviceState::Busy => return Err(DeviceError::Busy(entry)),
            DeviceState::Ready => {}
        }
        self.log.lock().unwrap().push(entry);

        match self.script {
            Script::Immediate => {
                if let Some(data) = data {
                    let _ = self.events.send(DeviceEvent::DataReceived(data));
                }
                let _ = self.events.send(DeviceEvent::CommandFinished);
            }
            Script::Delayed => {
                *state = DeviceState::Busy;
                let events = self.events.clone();
                let shared = Arc::clone(&self.state);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let mut state = shared.lock().unwrap();
                    if *state != DeviceState::Busy {
                        return;
                    }
                    if let Some(data) = data {
                        let _ = events.send(DeviceEvent::DataReceived(data));
                    }
                    let _ = events.send(DeviceEvent::CommandFinished);
                    *state = DeviceState::Ready;
                });
            }
            Script::Hang => *state = DeviceState::Busy,
            Script::Dropping => {}
            Script::Vanish => {
                *state = DeviceState::Closed;
                let _ = self.events.send(DeviceEvent::Closed);
            }
        }
        Ok(())
    }
}

fn pattern(address: u32, size: u32) -> Bytes {
    (0..size).map(|i| address.wrapping_add(i) as u8).collect()
}

#[async_trait]
impl Device for ScriptedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> DeviceState {
        *self.state.lock().unwrap()
    }

    async fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if *state != DeviceState::Closed {
            *state = DeviceState::Closed;
            let _ = self.events.send(DeviceEvent::Closed);
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    async fn request_read(&self, space: AddressSpace, address: u32, size: u32) -> Result<()> {
        self.begin(
            format!("read {} {:x} {}", space, address, size),
            Some(pattern(address, size)),
        )
    }

    async fn request_write(&self, space: AddressSpace, address: u32, _size: u32) -> Result<()> {
        *self.pending_write.lock().unwrap() = Some((space, address));
        Ok(())
    }

    async fn write_data(&self, data: Bytes) -> Result<()> {
        let (space, address) = self
            .pending_write
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| DeviceError::InvalidState("no write requested".into()))?;
        self.begin(format!("write {} {:x} {}", space, address, data.len()), None)
    }

    async fn info_query(&self) -> Result<DeviceInfo> {
        self.begin("info".to_string(), None)?;
        let mut flags = std::collections::BTreeSet::new();
        if !self.commands {
            flags.insert(DeviceFlag::NoFileCommands);
            flags.insert(DeviceFlag::NoControlCommands);
        }
        Ok(DeviceInfo {
            running: "scripted.sfc".to_string(),
            version: "0.1".to_string(),
            flags,
        })
    }

    async fn file_command(&self, command: FileCommand) -> Result<()> {
        let data = matches!(command, FileCommand::List(_)).then(|| Bytes::from_static(LISTING));
        self.begin(format!("file {:?}", command), data)
    }

    async fn control_command(&self, command: ControlCommand) -> Result<()> {
        self.begin(format!("control {:?}", command), None)
    }

    fn supports_file_commands(&self) -> bool {
        self.commands
    }

    fn supports_control_commands(&self) -> bool {
        self.commands
    }
}

/// Factory holding at most one scripted device. Clones share state.
#[derive(Debug, Clone)]
pub(crate) struct FakeFactory {
    device: Arc<StdMutex<Option<Arc<ScriptedDevice>>>>,
    deleted: Arc<StdMutex<Vec<String>>>,
    pub(crate) disconnects: Arc<AtomicUsize>,
}

impl FakeFactory {
    pub(crate) fn new(device: Arc<ScriptedDevice>) -> Self {
        Self {
            device: Arc::new(StdMutex::new(Some(device))),
            deleted: Arc::new(StdMutex::new(Vec::new())),
            disconnects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Names passed to successful `delete_device` calls
    pub(crate) fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn current(&self) -> Option<Arc<ScriptedDevice>> {
        self.device.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceFactory for FakeFactory {
    fn name(&self) -> &str {
        "Fake"
    }

    async fn list_devices(&mut self) -> Vec<String> {
        self.current()
            .map(|device| vec![device.name().to_string()])
            .unwrap_or_default()
    }

    async fn status(&mut self) -> String {
        match self.current() {
            Some(device) => format!("{} device ready", device.name()),
            None => "No device".to_string(),
        }
    }

    fn device(&self, name: &str) -> Option<SharedDevice> {
        self.current()
            .filter(|device| device.name() == name)
            .map(|device| device as SharedDevice)
    }

    async fn delete_device(&mut self, name: &str) -> bool {
        let Some(device) = self.current().filter(|device| device.name() == name) else {
            return false;
        };
        device.close().await;
        *self.device.lock().unwrap() = None;
        self.deleted.lock().unwrap().push(name.to_string());
        true
    }

    async fn handle_disconnect(&mut self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        *self.device.lock().unwrap() = None;
    }
}
