/*!
 * Configuration management for snesgate.
 *
 * Configuration is loaded once at startup and handed explicitly to the
 * dispatcher and to every device factory. Nothing reads settings from a
 * process-wide store.
 */
use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Core configuration for snesgate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General configuration
    #[serde(default)]
    pub general: GeneralConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// RetroArch backend configuration
    #[serde(default)]
    pub retroarch: RetroArchConfig,

    /// Dispatcher configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, `snesgate_devices=debug`, ...)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to use JSON format for logs
    #[serde(default)]
    pub json_format: bool,
}

/// RetroArch network-command backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetroArchConfig {
    /// Whether the RetroArch factory is registered at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `host:port` of the emulator's network command interface
    #[serde(default = "default_retroarch_host")]
    pub host: String,

    /// Upper bound for establishing the transport, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound for each discovery probe reply, in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Delay before a synthesized completion is emitted, in milliseconds
    #[serde(default = "default_completion_delay_ms")]
    pub completion_delay_ms: u64,

    /// Largest payload requested from the backend in one datagram
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// How long a command may stay outstanding before the backend is
    /// considered wedged, in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Number of commands that may wait in a device queue
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Largest total size a single memory request may cover, in bytes
    #[serde(default = "default_max_transfer")]
    pub max_transfer: u32,
}

impl RetroArchConfig {
    /// Connect bound as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Probe bound as a duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Synthesized completion delay as a duration
    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.completion_delay_ms)
    }
}

impl DispatcherConfig {
    /// Command timeout as a duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for RetroArchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_retroarch_host(),
            connect_timeout_ms: default_connect_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            completion_delay_ms: default_completion_delay_ms(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            queue_depth: default_queue_depth(),
            max_transfer: default_max_transfer(),
        }
    }
}

fn default_app_name() -> String {
    "snesgate".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_retroarch_host() -> String {
    "127.0.0.1:55355".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    50
}

fn default_probe_timeout_ms() -> u64 {
    100
}

fn default_completion_delay_ms() -> u64 {
    5
}

fn default_chunk_size() -> u32 {
    78
}

fn default_command_timeout_ms() -> u64 {
    3000
}

fn default_queue_depth() -> usize {
    64
}

fn default_max_transfer() -> u32 {
    0x100_0000
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
    override_with: Option<Config>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Override with an existing config
    pub fn override_with(mut self, config: Config) -> Self {
        self.override_with = Some(config);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        if let Some(config) = self.override_with {
            return Ok(config);
        }

        let mut config_builder = ConfigLib::builder().add_source(
            ConfigLib::try_from(&Config::default())
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config_lib = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        let config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        if config.retroarch.chunk_size == 0 {
            return Err(Error::config("retroarch.chunk_size must be at least 1"));
        }
        if config.dispatcher.max_transfer == 0 {
            return Err(Error::config("dispatcher.max_transfer must be at least 1"));
        }

        info!("Configuration loaded successfully");
        Ok(config)
    }
}
