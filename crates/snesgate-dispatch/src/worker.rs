/*!
 * Per-device command worker.
 *
 * Every attached device gets one worker task that owns the device's
 * command queue. Commands run strictly one at a time: the next one is only
 * issued after the previous one finished, timed out or failed. Clients talk
 * to the worker through cloneable [`DeviceHandle`]s.
 */
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, info, warn, Instrument};

use snesgate_core::logging::command_span;
use snesgate_core::utils::spawn_and_log;
use snesgate_devices::{
    AddressSpace, ControlCommand, DeviceEvent, DeviceFactory, DeviceInfo, DeviceState,
    FileCommand, SharedDevice,
};

use crate::error::{Error, Result};

/// A factory shared between the dispatcher and its workers
pub type SharedFactory = Arc<Mutex<Box<dyn DeviceFactory>>>;

type Reply<T> = oneshot::Sender<Result<T>>;

#[derive(Debug)]
enum DeviceCommand {
    GetAddress {
        space: AddressSpace,
        address: u32,
        size: u32,
        reply: Reply<Bytes>,
    },
    PutAddress {
        space: AddressSpace,
        address: u32,
        data: Bytes,
        reply: Reply<()>,
    },
    Info {
        reply: Reply<DeviceInfo>,
    },
    File {
        command: FileCommand,
        reply: Reply<Bytes>,
    },
    Control {
        command: ControlCommand,
        reply: Reply<()>,
    },
    Detach {
        reply: Reply<bool>,
    },
}

impl DeviceCommand {
    fn opcode(&self) -> &'static str {
        match self {
            DeviceCommand::GetAddress { .. } => "GetAddress",
            DeviceCommand::PutAddress { .. } => "PutAddress",
            DeviceCommand::Info { .. } => "Info",
            DeviceCommand::File { .. } => "File",
            DeviceCommand::Control { .. } => "Control",
            DeviceCommand::Detach { .. } => "Detach",
        }
    }

    fn fail(self, err: Error) {
        // The client may have given up already
        match self {
            DeviceCommand::GetAddress { reply, .. } | DeviceCommand::File { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            DeviceCommand::PutAddress { reply, .. } | DeviceCommand::Control { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            DeviceCommand::Info { reply } => {
                let _ = reply.send(Err(err));
            }
            DeviceCommand::Detach { reply } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

/// Client side of a device worker
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    name: String,
    commands: mpsc::Sender<DeviceCommand>,
    file_commands: bool,
    control_commands: bool,
}

impl DeviceHandle {
    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the worker is still running
    pub fn is_connected(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Read `size` bytes at `address`
    pub async fn get_address(&self, space: AddressSpace, address: u32, size: u32) -> Result<Bytes> {
        self.call(|reply| DeviceCommand::GetAddress {
            space,
            address,
            size,
            reply,
        })
        .await
    }

    /// Write `data` at `address`
    pub async fn put_address(&self, space: AddressSpace, address: u32, data: Bytes) -> Result<()> {
        self.call(|reply| DeviceCommand::PutAddress {
            space,
            address,
            data,
            reply,
        })
        .await
    }

    /// Device info snapshot
    pub async fn info(&self) -> Result<DeviceInfo> {
        self.call(|reply| DeviceCommand::Info { reply }).await
    }

    /// Run a file command and return whatever data it produced.
    ///
    /// Backends without file commands answer `List` with nothing and
    /// everything else with [`Error::Unsupported`].
    pub async fn file_command(&self, command: FileCommand) -> Result<Bytes> {
        if !self.file_commands {
            return match command {
                FileCommand::List(_) => Ok(Bytes::new()),
                other => Err(Error::unsupported(format!(
                    "{} has no file commands ({:?})",
                    self.name, other
                ))),
            };
        }
        self.call(|reply| DeviceCommand::File { command, reply }).await
    }

    /// Run a control command
    pub async fn control_command(&self, command: ControlCommand) -> Result<()> {
        if !self.control_commands {
            return Err(Error::unsupported(format!(
                "{} has no control commands ({:?})",
                self.name, command
            )));
        }
        self.call(|reply| DeviceCommand::Control { command, reply }).await
    }

    /// Detach the device from its factory and stop the worker
    pub async fn detach(&self) -> Result<bool> {
        self.call(|reply| DeviceCommand::Detach { reply }).await
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> DeviceCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| Error::device_closed(&self.name))?;
        rx.await.map_err(|_| Error::device_closed(&self.name))?
    }
}

/// What happened to the device while running a command
enum Outcome {
    Alive,
    Closed,
    Detached,
}

/// Worker task state
struct DeviceWorker {
    name: String,
    device: SharedDevice,
    factory: SharedFactory,
    events: broadcast::Receiver<DeviceEvent>,
    commands: mpsc::Receiver<DeviceCommand>,
    command_timeout: Duration,
}

/// Start a worker for `device` and return its handle
pub(crate) fn spawn_worker(
    device: SharedDevice,
    factory: SharedFactory,
    command_timeout: Duration,
    queue_depth: usize,
) -> DeviceHandle {
    let (tx, rx) = mpsc::channel(queue_depth.max(1));
    let handle = DeviceHandle {
        name: device.name().to_string(),
        commands: tx,
        file_commands: device.supports_file_commands(),
        control_commands: device.supports_control_commands(),
    };
    let worker = DeviceWorker {
        name: device.name().to_string(),
        events: device.subscribe_events(),
        device,
        factory,
        commands: rx,
        command_timeout,
    };
    let task = format!("worker {}", handle.name);
    spawn_and_log(&task, worker.run());
    handle
}

impl DeviceWorker {
    /// Run until the queue is dropped, the device closes or it is detached.
    /// A device that closed underneath the worker is reported as an error.
    async fn run(mut self) -> Result<()> {
        info!("Worker for {} started", self.name);
        let outcome = loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break Outcome::Alive };
                    let span = command_span(command.opcode(), &self.name);
                    match self.execute(command).instrument(span).await {
                        Outcome::Alive => {}
                        outcome => break outcome,
                    }
                }
                event = self.events.recv() => match event {
                    Ok(DeviceEvent::Closed) | Err(RecvError::Closed) => break Outcome::Closed,
                    Ok(event) => debug!("{}: stray {:?} between commands", self.name, event),
                    Err(RecvError::Lagged(n)) => warn!("{}: missed {} events", self.name, n),
                },
            }
        };

        if let Outcome::Closed = outcome {
            self.on_closed().await;
        }
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            command.fail(Error::device_closed(&self.name));
        }
        info!("Worker for {} stopped", self.name);

        match outcome {
            Outcome::Closed => Err(Error::device_closed(&self.name)),
            _ => Ok(()),
        }
    }

    async fn execute(&mut self, command: DeviceCommand) -> Outcome {
        if !self.drain_stale_events() {
            command.fail(Error::device_closed(&self.name));
            return Outcome::Closed;
        }

        match command {
            DeviceCommand::GetAddress {
                space,
                address,
                size,
                reply,
            } => {
                let result = self.get_address(space, address, size).await;
                self.respond(reply, result).await
            }
            DeviceCommand::PutAddress {
                space,
                address,
                data,
                reply,
            } => {
                let result = self.put_address(space, address, data).await;
                self.respond(reply, result).await
            }
            DeviceCommand::Info { reply } => {
                let result = match self.device.info_query().await {
                    Ok(info) => self.settle().await.map(|_| info),
                    Err(e) => Err(e.into()),
                };
                self.respond(reply, result).await
            }
            DeviceCommand::File { command, reply } => {
                let result = match self.device.file_command(command).await {
                    Ok(()) => self.settle().await.map(Option::unwrap_or_default),
                    Err(e) => Err(e.into()),
                };
                self.respond(reply, result).await
            }
            DeviceCommand::Control { command, reply } => {
                let result = match self.device.control_command(command).await {
                    Ok(()) => self.settle().await.map(|_| ()),
                    Err(e) => Err(e.into()),
                };
                self.respond(reply, result).await
            }
            DeviceCommand::Detach { reply } => {
                let removed = self.factory.lock().await.delete_device(&self.name).await;
                let _ = reply.send(Ok(removed));
                Outcome::Detached
            }
        }
    }

    async fn get_address(&mut self, space: AddressSpace, address: u32, size: u32) -> Result<Bytes> {
        debug!("{}: read {} {:06x} {}", self.name, space, address, size);
        self.device.request_read(space, address, size).await?;
        let data = self.settle().await?.unwrap_or_default();
        if data.len() == size as usize {
            return Ok(data);
        }
        // Dropped requests produce no data
        let mut padded = BytesMut::from(&data[..]);
        padded.resize(size as usize, 0);
        Ok(padded.freeze())
    }

    async fn put_address(&mut self, space: AddressSpace, address: u32, data: Bytes) -> Result<()> {
        debug!("{}: write {} {:06x} {}", self.name, space, address, data.len());
        self.device
            .request_write(space, address, data.len() as u32)
            .await?;
        self.device.write_data(data).await?;
        self.settle().await.map(|_| ())
    }

    /// Collect the outcome of the command just issued.
    ///
    /// A device that is not Busy right after a request either finished
    /// already, with its events queued, or dropped the request without
    /// any event. Only a Busy device is waited for.
    async fn settle(&mut self) -> Result<Option<Bytes>> {
        match self.device.state() {
            DeviceState::Busy => return self.wait_completion().await,
            DeviceState::Closed => return Err(Error::device_closed(&self.name)),
            DeviceState::Ready => {}
        }
        let mut data = None;
        loop {
            match self.events.try_recv() {
                Ok(DeviceEvent::DataReceived(bytes)) => data = Some(bytes),
                Ok(DeviceEvent::CommandFinished) => return Ok(data),
                Ok(DeviceEvent::Closed) | Err(TryRecvError::Closed) => {
                    return Err(Error::device_closed(&self.name))
                }
                Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty) => {
                    debug!("{}: request dropped by the device", self.name);
                    return Ok(None);
                }
            }
        }
    }

    /// Wait for `CommandFinished`, keeping the last data payload seen
    async fn wait_completion(&mut self) -> Result<Option<Bytes>> {
        let name = self.name.clone();
        let events = &mut self.events;
        let wait = async {
            let mut data = None;
            loop {
                match events.recv().await {
                    Ok(DeviceEvent::DataReceived(bytes)) => data = Some(bytes),
                    Ok(DeviceEvent::CommandFinished) => return Ok(data),
                    Ok(DeviceEvent::Closed) | Err(RecvError::Closed) => {
                        return Err(Error::device_closed(&name))
                    }
                    Err(RecvError::Lagged(n)) => warn!("{}: missed {} events", name, n),
                }
            }
        };

        match tokio::time::timeout(self.command_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "{} did not finish within {:?}",
                self.name, self.command_timeout
            ))),
        }
    }

    /// Drop events left over from an earlier command. Returns false if the
    /// device closed in the meantime.
    fn drain_stale_events(&mut self) -> bool {
        loop {
            match self.events.try_recv() {
                Ok(DeviceEvent::Closed) | Err(TryRecvError::Closed) => return false,
                Ok(event) => debug!("{}: dropping stale {:?}", self.name, event),
                Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty) => return true,
            }
        }
    }

    async fn respond<T>(&mut self, reply: Reply<T>, result: Result<T>) -> Outcome {
        let outcome = match &result {
            Err(Error::DeviceClosed(_)) => Outcome::Closed,
            Err(Error::Timeout(_)) if self.device.state() == DeviceState::Busy => {
                warn!("{} is wedged, detaching it", self.name);
                self.factory.lock().await.delete_device(&self.name).await;
                Outcome::Detached
            }
            _ => Outcome::Alive,
        };
        let _ = reply.send(result);
        outcome
    }

    async fn on_closed(&mut self) {
        info!("{} closed", self.name);
        let mut factory = self.factory.lock().await;
        // A replacement may already be attached under the same name
        let stale = factory
            .device(&self.name)
            .map_or(false, |current| !current.open());
        if stale {
            factory.handle_disconnect().await;
        }
    }
}
