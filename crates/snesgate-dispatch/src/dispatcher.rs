/*!
 * Device dispatcher.
 *
 * The dispatcher owns every registered factory and one worker per attached
 * device. Clients never touch devices directly: they get a
 * [`DeviceHandle`] whose commands are queued to the device's worker.
 */
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::info;

use snesgate_core::config::{Config, DispatcherConfig};
#[cfg(feature = "retroarch")]
use snesgate_devices::devices::RetroArchFactory;
use snesgate_devices::BoxedFactory;

use crate::error::{Error, Result};
use crate::worker::{spawn_worker, DeviceHandle, SharedFactory};

/// Routes client commands to attached devices
#[derive(Debug)]
pub struct Dispatcher {
    config: DispatcherConfig,
    factories: Vec<SharedFactory>,
    workers: Mutex<HashMap<String, DeviceHandle>>,
}

impl Dispatcher {
    /// Create a dispatcher without factories
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            factories: Vec::new(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Create a dispatcher with every backend enabled in `config`
    pub fn from_config(config: &Config) -> Self {
        let mut dispatcher = Self::new(config.dispatcher.clone());
        dispatcher.register_backends(config);
        dispatcher
    }

    #[cfg(feature = "retroarch")]
    fn register_backends(&mut self, config: &Config) {
        if config.retroarch.enabled {
            self.register_factory(Box::new(RetroArchFactory::new(config.retroarch.clone())));
        } else {
            tracing::debug!("RetroArch backend disabled");
        }
    }

    #[cfg(not(feature = "retroarch"))]
    fn register_backends(&mut self, config: &Config) {
        if config.retroarch.enabled {
            tracing::warn!("RetroArch backend enabled but not compiled in");
        }
    }

    /// Add a factory
    pub fn register_factory(&mut self, factory: BoxedFactory) {
        info!("Registered {} factory", factory.name());
        self.factories.push(Arc::new(Mutex::new(factory)));
    }

    /// Number of registered factories
    pub fn factory_count(&self) -> usize {
        self.factories.len()
    }

    /// Largest total size of one memory request
    pub fn max_transfer(&self) -> u32 {
        self.config.max_transfer
    }

    /// Names of every device any factory can see
    pub async fn device_list(&self) -> Vec<String> {
        let lists = join_all(
            self.factories
                .iter()
                .map(|factory| async move { factory.lock().await.list_devices().await }),
        )
        .await;
        lists.into_iter().flatten().collect()
    }

    /// `(factory name, status text)` for every factory
    pub async fn status(&self) -> Vec<(String, String)> {
        join_all(self.factories.iter().map(|factory| async move {
            let mut factory = factory.lock().await;
            let status = factory.status().await;
            (factory.name().to_string(), status)
        }))
        .await
    }

    /// Get a handle to the named device, starting its worker if needed.
    ///
    /// All sessions attached to the same device share one worker, so their
    /// commands are serialized.
    pub async fn attach(&self, name: &str) -> Result<DeviceHandle> {
        let mut workers = self.workers.lock().await;
        if let Some(handle) = workers.get(name) {
            if handle.is_connected() {
                return Ok(handle.clone());
            }
            workers.remove(name);
        }

        for factory in &self.factories {
            let device = {
                let mut guard = factory.lock().await;
                if guard.device(name).is_none() {
                    guard.list_devices().await;
                }
                guard.device(name)
            };

            if let Some(device) = device.filter(|device| device.open()) {
                let handle = spawn_worker(
                    device,
                    Arc::clone(factory),
                    self.config.command_timeout(),
                    self.config.queue_depth,
                );
                info!("Attached to {}", name);
                workers.insert(name.to_string(), handle.clone());
                return Ok(handle);
            }
        }

        Err(Error::not_found(format!("No device named {}", name)))
    }

    /// Detach the named device. Returns whether it was attached.
    pub async fn detach(&self, name: &str) -> Result<bool> {
        let handle = self.workers.lock().await.remove(name);
        match handle {
            Some(handle) if handle.is_connected() => handle.detach().await,
            _ => {
                for factory in &self.factories {
                    if factory.lock().await.delete_device(name).await {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}
