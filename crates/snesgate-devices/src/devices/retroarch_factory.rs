/*!
 * RetroArch device factory.
 *
 * Discovery is a short, bounded conversation over the factory's transport:
 *
 * 1. connect, bounded by `connect_timeout_ms`
 * 2. `VERSION`, bounded by `probe_timeout_ms`
 * 3. `READ_CORE_RAM 0 1`, bounded by `probe_timeout_ms`
 *
 * Only a core that can actually read memory gets a device. The caller waits
 * for the whole conversation, so one attempt costs at most the sum of the
 * three bounds.
 */
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::timeout;
use tracing::{debug, info, Instrument};

use snesgate_core::config::RetroArchConfig;
use snesgate_core::error::Error as CoreError;
use snesgate_core::logging::device_span;
use snesgate_core::utils::with_timeout;

use crate::device::SharedDevice;
use crate::devices::retroarch::RetroArchDevice;
use crate::factory::DeviceFactory;
use crate::protocols::retroarch as wire;
use crate::registry::FactorySlot;
use crate::transport::{Connector, SharedTransport, UdpConnector};

/// Backend kind name
pub const FACTORY_NAME: &str = "RetroArch";

const CONNECT_ERROR: &str = "Can't connect to RetroArch";

/// Discovers a RetroArch instance and attaches it as a device
#[derive(Debug)]
pub struct RetroArchFactory {
    config: RetroArchConfig,
    connector: Arc<dyn Connector>,
    transport: Option<SharedTransport>,
    slot: FactorySlot,
}

impl RetroArchFactory {
    /// Create a factory talking UDP to `config.host`
    pub fn new(config: RetroArchConfig) -> Self {
        let connector = Arc::new(UdpConnector::new(config.host.clone()));
        Self::with_connector(config, connector)
    }

    /// Create a factory using a custom connector
    pub fn with_connector(config: RetroArchConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            transport: None,
            slot: FactorySlot::new(),
        }
    }

    /// Registry entry of this factory
    pub fn slot(&self) -> &FactorySlot {
        &self.slot
    }

    async fn transport(&mut self) -> Option<SharedTransport> {
        if let Some(transport) = &self.transport {
            if transport.is_open() {
                return Some(transport.clone());
            }
        }
        self.transport = None;

        let connect = async { self.connector.connect().await.map_err(CoreError::from) };
        match with_timeout(self.config.connect_timeout(), connect).await {
            Ok(transport) => {
                debug!("Connected to {}", self.connector.target());
                self.transport = Some(transport.clone());
                Some(transport)
            }
            Err(e) => {
                debug!("Connecting to {} failed: {}", self.connector.target(), e);
                None
            }
        }
    }

    /// Send `request` and wait a bounded time for one reply
    async fn probe(&self, transport: &SharedTransport, request: &str) -> Option<Bytes> {
        // Late answers to an earlier attempt must not be taken for this one
        while let Ok(Ok(stale)) = timeout(Duration::ZERO, transport.recv()).await {
            debug!("<< {} (stale, dropped)", String::from_utf8_lossy(&stale).trim_end());
        }

        debug!(">> {}", request);
        if let Err(e) = transport.send(request.as_bytes()).await {
            debug!("Probe {} failed: {}", request, e);
            return None;
        }
        match timeout(self.config.probe_timeout(), transport.recv()).await {
            Ok(Ok(reply)) => {
                debug!("<< {}", String::from_utf8_lossy(&reply).trim_end());
                Some(reply)
            }
            Ok(Err(e)) => {
                debug!("Probe {} failed: {}", request, e);
                None
            }
            Err(_) => {
                debug!("No reply to {} within {:?}", request, self.config.probe_timeout());
                None
            }
        }
    }

    async fn discover(&mut self) -> Result<SharedDevice, String> {
        let transport = self.transport().await.ok_or_else(|| CONNECT_ERROR.to_string())?;

        let version = match self.probe(&transport, wire::VERSION).await {
            Some(reply) => wire::parse_version(&reply),
            None => {
                return Err(format!(
                    "RetroArch did not answer at {}",
                    self.connector.target()
                ))
            }
        };
        self.slot.set_backend_version(version.clone());

        let reply = self.probe(&transport, &wire::read_request(0, 1)).await;
        if !reply.map_or(false, |reply| wire::probe_reply_has_memory(&reply)) {
            return Err(format!(
                "RetroArch {} - Current core does not support memory read",
                version
            ));
        }

        info!("Found RetroArch {} at {}", version, self.connector.target());
        Ok(RetroArchDevice::new(transport, version, &self.config))
    }
}

#[async_trait]
impl DeviceFactory for RetroArchFactory {
    fn name(&self) -> &str {
        FACTORY_NAME
    }

    async fn list_devices(&mut self) -> Vec<String> {
        if let Some(device) = self.slot.device() {
            if device.open() {
                return vec![device.name().to_string()];
            }
            debug!("{} was closed, discovering again", device.name());
            self.slot.detach();
            self.transport = None;
        }

        let span = device_span(FACTORY_NAME, None);
        match self.discover().instrument(span).await {
            Ok(device) => {
                let name = device.name().to_string();
                self.slot.attach(device);
                vec![name]
            }
            Err(message) => {
                self.slot.record_error(message);
                Vec::new()
            }
        }
    }

    async fn status(&mut self) -> String {
        self.list_devices().await;
        if self.slot.device().is_some() {
            format!(
                "RetroArch {} device ready",
                self.slot.backend_version().unwrap_or_default()
            )
        } else {
            self.slot.attach_error().unwrap_or(CONNECT_ERROR).to_string()
        }
    }

    fn device(&self, name: &str) -> Option<SharedDevice> {
        self.slot.device().filter(|d| d.name() == name).cloned()
    }

    async fn delete_device(&mut self, name: &str) -> bool {
        if !self.slot.holds(name) {
            return false;
        }
        if let Some(device) = self.slot.detach() {
            device.close().await;
        }
        self.transport = None;
        true
    }

    async fn handle_disconnect(&mut self) {
        info!("RetroArch disconnected");
        if let Some(device) = self.slot.clear() {
            device.close().await;
        }
        self.transport = None;
    }
}
