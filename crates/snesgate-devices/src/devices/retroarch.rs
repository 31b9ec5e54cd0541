/*!
 * RetroArch network-command device.
 *
 * Talks to the emulator's UDP command interface. Reads larger than the
 * backend's payload ceiling are split into sequential chunks, and only the
 * assembled result is reported. Writes, info queries and unsupported
 * commands get no reply from the backend, so their completion is
 * synthesized by a short timer.
 *
 * All mutable state sits behind one async mutex shared by the command
 * methods, the reader task and the completion timers. Events are emitted
 * while that lock is held, so they leave in the order commands were issued.
 */
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use snesgate_core::config::RetroArchConfig;
use snesgate_core::logging::device_span;

use crate::address::{self, RETROARCH_WINDOWS};
use crate::device::{
    AddressSpace, ControlCommand, Device, DeviceError, DeviceEvent, DeviceFlag, DeviceInfo,
    DeviceState, FileCommand, Result,
};
use crate::protocols::retroarch::{self as wire, ReadReply};
use crate::transport::SharedTransport;

/// Name under which the device is listed
pub const DEVICE_NAME: &str = "EMU RetroArch";

const INFO_RUNNING: &str = "not available";
const INFO_VERSION: &str = "1.0.0";
const EVENT_CAPACITY: usize = 64;
const INITIAL_BUFFER: usize = 4096;

/// Progress of one read, possibly spanning several backend requests.
///
/// `requested` counts every byte asked for so far, including the chunk in
/// flight, and never exceeds `total`.
#[derive(Debug)]
struct TransferSession {
    base: u32,
    total: u32,
    requested: u32,
    chunk: u32,
    buffer: BytesMut,
}

impl TransferSession {
    fn new(base: u32, total: u32) -> Self {
        Self {
            base,
            total,
            requested: 0,
            chunk: 0,
            buffer: BytesMut::with_capacity((total as usize).min(INITIAL_BUFFER)),
        }
    }

    /// Backend address of the chunk in flight
    fn address(&self) -> u32 {
        self.base.wrapping_add(self.requested - self.chunk)
    }

    /// Move on to the next chunk. Returns false once everything was requested.
    fn advance(&mut self, ceiling: u32) -> bool {
        if self.requested >= self.total {
            return false;
        }
        self.chunk = ceiling.min(self.total - self.requested);
        self.requested += self.chunk;
        true
    }

    fn accept(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn into_data(self) -> Bytes {
        self.buffer.freeze()
    }
}

/// What the device is waiting for
#[derive(Debug)]
enum Pending {
    Idle,
    Read(TransferSession),
    Completion,
}

/// Two-phase write progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Idle,
    AwaitingPayload { address: u32, size: u32 },
    /// The target cannot be written; the payload is swallowed
    Discarded,
}

#[derive(Debug)]
struct Inner {
    pending: Pending,
    write: WriteState,
    generation: u64,
}

struct Shared {
    name: String,
    version: String,
    transport: SharedTransport,
    chunk_size: u32,
    completion_delay: Duration,
    state: RwLock<DeviceState>,
    events: broadcast::Sender<DeviceEvent>,
    inner: Mutex<Inner>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn state(&self) -> DeviceState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: DeviceState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn emit(&self, event: DeviceEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    async fn send(&self, request: &str) -> std::io::Result<()> {
        debug!(">> {}", request);
        self.transport.send(request.as_bytes()).await.map(|_| ())
    }

    /// Check whether a new command may start. `Ok(false)` means closed.
    fn admit(&self, inner: &Inner) -> Result<bool> {
        match self.state() {
            DeviceState::Closed => return Ok(false),
            DeviceState::Busy => {
                return Err(DeviceError::Busy(format!(
                    "{} already has a command outstanding",
                    self.name
                )))
            }
            DeviceState::Ready => {}
        }
        if inner.write != WriteState::Idle {
            return Err(DeviceError::InvalidState(
                "a write is waiting for its payload".to_string(),
            ));
        }
        Ok(true)
    }

    /// Emit the completion, then go Ready. Anyone who sees Ready without the
    /// lock can rely on the events already being queued.
    fn finish(&self, inner: &mut Inner, data: Option<Bytes>) {
        inner.pending = Pending::Idle;
        if let Some(data) = data {
            self.emit(DeviceEvent::DataReceived(data));
        }
        self.emit(DeviceEvent::CommandFinished);
        self.set_state(DeviceState::Ready);
    }

    /// Arm the completion timer for a command the backend will not answer
    fn schedule_completion(self: &Arc<Self>, inner: &mut Inner, data: Option<Bytes>) {
        inner.generation += 1;
        inner.pending = Pending::Completion;
        let generation = inner.generation;
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(shared.completion_delay).await;
            let mut inner = shared.inner.lock().await;
            if inner.generation != generation || shared.state() == DeviceState::Closed {
                return;
            }
            shared.finish(&mut inner, data);
        });
    }

    async fn handle_datagram(&self, datagram: Bytes) -> std::io::Result<()> {
        let mut inner = self.inner.lock().await;
        let text = String::from_utf8_lossy(&datagram);
        let session = match &mut inner.pending {
            Pending::Read(session) => session,
            _ => {
                debug!("<< {} (unsolicited, ignored)", text.trim_end());
                return Ok(());
            }
        };
        debug!("<< {}", text.trim_end());

        let expected_address = session.address();
        let expected_len = session.chunk as usize;
        let chunk = match wire::parse_read_reply(&datagram) {
            ReadReply::Data { address, .. } | ReadReply::Unavailable { address }
                if address != expected_address =>
            {
                debug!(
                    "Reply for {:x} while waiting for {:x}, ignored",
                    address, expected_address
                );
                return Ok(());
            }
            ReadReply::Data { bytes, .. } if bytes.len() == expected_len => bytes,
            ReadReply::Data { bytes, .. } => {
                warn!(
                    "RetroArch returned {} bytes for a {} byte read at {:x}",
                    bytes.len(),
                    expected_len,
                    expected_address
                );
                vec![0; expected_len]
            }
            ReadReply::Unavailable { .. } => {
                debug!("No data at {:x}, substituting zeros", expected_address);
                vec![0; expected_len]
            }
            ReadReply::Malformed(reason) => {
                warn!("Unexpected RetroArch reply {:?}: {}", text.trim_end(), reason);
                vec![0; expected_len]
            }
        };

        session.accept(&chunk);
        if session.advance(self.chunk_size) {
            let request = wire::read_request(session.address(), session.chunk);
            return self.send(&request).await;
        }

        if let Pending::Read(session) = std::mem::replace(&mut inner.pending, Pending::Idle) {
            self.finish(&mut inner, Some(session.into_data()));
        }
        Ok(())
    }

    async fn shutdown(&self) {
        {
            let mut inner = self.inner.lock().await;
            if self.state() == DeviceState::Closed {
                return;
            }
            inner.pending = Pending::Idle;
            inner.write = WriteState::Idle;
            inner.generation += 1;
            self.set_state(DeviceState::Closed);
        }
        self.transport.close();
        info!("{} closed", self.name);
        self.emit(DeviceEvent::Closed);

        let reader = self.reader.lock().ok().and_then(|mut slot| slot.take());
        if let Some(reader) = reader {
            reader.abort();
        }
    }
}

async fn read_loop(shared: Arc<Shared>) {
    loop {
        match shared.transport.recv().await {
            Ok(datagram) if datagram.is_empty() => {
                info!("RetroArch closed the connection");
                break;
            }
            Ok(datagram) => {
                if let Err(e) = shared.handle_datagram(datagram).await {
                    error!("Failed to request next chunk: {}", e);
                    break;
                }
            }
            Err(e) => {
                if shared.state() != DeviceState::Closed {
                    error!("RetroArch receive failed: {}", e);
                }
                break;
            }
        }
    }
    shared.shutdown().await;
}

/// Device backed by RetroArch's network command interface
pub struct RetroArchDevice {
    shared: Arc<Shared>,
}

impl fmt::Debug for RetroArchDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetroArchDevice")
            .field("name", &self.shared.name)
            .field("version", &self.shared.version)
            .field("state", &self.shared.state())
            .field("transport", &self.shared.transport)
            .finish()
    }
}

impl RetroArchDevice {
    /// Create the device over an already probed transport and start its reader
    pub fn new(transport: SharedTransport, version: String, config: &RetroArchConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            name: DEVICE_NAME.to_string(),
            version,
            transport,
            chunk_size: config.chunk_size.clamp(1, wire::MAX_CHUNK),
            completion_delay: config.completion_delay(),
            state: RwLock::new(DeviceState::Ready),
            events,
            inner: Mutex::new(Inner {
                pending: Pending::Idle,
                write: WriteState::Idle,
                generation: 0,
            }),
            reader: StdMutex::new(None),
        });

        let span = device_span("RetroArch", Some(DEVICE_NAME));
        let reader = tokio::spawn(read_loop(Arc::clone(&shared)).instrument(span));
        if let Ok(mut slot) = shared.reader.lock() {
            *slot = Some(reader);
        }
        Arc::new(Self { shared })
    }

    /// Version reported by the backend during discovery
    pub fn backend_version(&self) -> &str {
        &self.shared.version
    }

    fn info(&self) -> DeviceInfo {
        let mut flags: std::collections::BTreeSet<_> = [DeviceFlag::NoRomAccess].into();
        if !self.supports_file_commands() {
            flags.insert(DeviceFlag::NoFileCommands);
        }
        if !self.supports_control_commands() {
            flags.insert(DeviceFlag::NoControlCommands);
        }
        DeviceInfo {
            running: INFO_RUNNING.to_string(),
            version: INFO_VERSION.to_string(),
            flags,
        }
    }

    /// Accept a command the backend cannot execute and complete it on a timer
    async fn fake_command(&self, what: &str) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if !shared.admit(&inner)? {
            return Ok(());
        }
        debug!("{} is not supported by RetroArch, completing without effect", what);
        shared.set_state(DeviceState::Busy);
        shared.schedule_completion(&mut inner, None);
        Ok(())
    }
}

impl Drop for RetroArchDevice {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.shared.reader.lock() {
            if let Some(reader) = slot.take() {
                reader.abort();
            }
        }
    }
}

#[async_trait]
impl Device for RetroArchDevice {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn state(&self) -> DeviceState {
        self.shared.state()
    }

    async fn close(&self) {
        self.shared.shutdown().await;
    }

    fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.shared.events.subscribe()
    }

    async fn request_read(&self, space: AddressSpace, address: u32, size: u32) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if !shared.admit(&inner)? {
            return Ok(());
        }
        if space != AddressSpace::Snes {
            warn!("RetroArch cannot read the {} space, request dropped", space);
            return Ok(());
        }

        shared.set_state(DeviceState::Busy);
        if size == 0 {
            shared.schedule_completion(&mut inner, Some(Bytes::new()));
            return Ok(());
        }

        let base = match address::translate(&RETROARCH_WINDOWS, address) {
            Some(base) => base,
            None => {
                debug!("{:06x} has no RetroArch mapping, answering with zeros", address);
                let zeros = Bytes::from(vec![0u8; size as usize]);
                shared.schedule_completion(&mut inner, Some(zeros));
                return Ok(());
            }
        };

        let mut session = TransferSession::new(base, size);
        session.advance(shared.chunk_size);
        let request = wire::read_request(session.address(), session.chunk);
        inner.generation += 1;
        inner.pending = Pending::Read(session);

        if let Err(e) = shared.send(&request).await {
            inner.pending = Pending::Idle;
            shared.set_state(DeviceState::Ready);
            return Err(e.into());
        }
        Ok(())
    }

    async fn request_write(&self, space: AddressSpace, address: u32, size: u32) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if !shared.admit(&inner)? {
            return Ok(());
        }

        inner.write = if space != AddressSpace::Snes {
            warn!("RetroArch cannot write the {} space, request dropped", space);
            WriteState::Discarded
        } else {
            match address::translate(&RETROARCH_WINDOWS, address) {
                Some(address) => WriteState::AwaitingPayload { address, size },
                None => {
                    warn!("{:06x} has no RetroArch mapping, write dropped", address);
                    WriteState::Discarded
                }
            }
        };
        Ok(())
    }

    async fn write_data(&self, data: Bytes) -> Result<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if shared.state() == DeviceState::Closed {
            return Ok(());
        }

        match std::mem::replace(&mut inner.write, WriteState::Idle) {
            WriteState::Idle => Err(DeviceError::InvalidState(
                "write_data called without request_write".to_string(),
            )),
            WriteState::Discarded => {
                debug!("Discarding {} byte payload", data.len());
                Ok(())
            }
            WriteState::AwaitingPayload { address, size } => {
                if data.len() != size as usize {
                    warn!(
                        "Write announced {} bytes but carries {}",
                        size,
                        data.len()
                    );
                }
                shared.set_state(DeviceState::Busy);
                if let Err(e) = shared.send(&wire::write_request(address, &data)).await {
                    shared.set_state(DeviceState::Ready);
                    return Err(e.into());
                }
                shared.schedule_completion(&mut inner, None);
                Ok(())
            }
        }
    }

    async fn info_query(&self) -> Result<DeviceInfo> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;
        if shared.admit(&inner)? {
            shared.set_state(DeviceState::Busy);
            shared.schedule_completion(&mut inner, None);
        }
        Ok(self.info())
    }

    async fn file_command(&self, command: FileCommand) -> Result<()> {
        self.fake_command(&format!("{:?}", command)).await
    }

    async fn control_command(&self, command: ControlCommand) -> Result<()> {
        self.fake_command(&format!("{:?}", command)).await
    }

    fn supports_file_commands(&self) -> bool {
        false
    }

    fn supports_control_commands(&self) -> bool {
        false
    }
}
