//! Gateway configuration
//!
//! The configuration lives in one JSON file. Every field has a default, so a
//! file holding only `{"port": "/dev/ttyUSB0"}` is valid. The `devices` table
//! is the only part the gateway writes back: it records devices registered at
//! runtime so they are bound again on the next start.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{
    Connector, ConnectionConfig, DeviceEvent, InitCommands, Platform, RadioOptions,
    SerialConnector, TcpConnector, DEFAULT_ACK_TIMEOUT_MS, DEFAULT_BAUD_RATE,
    DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_RECONNECT_INTERVAL_SECS,
};

/// Key of the device table inside the configuration document
const DEVICES_KEY: &str = "devices";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading or writing the configuration file failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The document is not JSON or does not match the schema
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How the transceiver is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// USB serial port
    #[default]
    Serial,
    /// Serial-over-TCP bridge; `port` is `host:port`
    Tcp,
}

/// A device registered at runtime, as stored in the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Identity the registry routes on
    pub event_id: String,
    /// Platform the device is bound on
    pub platform: Platform,
    /// Radio protocol, when known
    pub protocol: Option<String>,
    /// Protocol device id, when the event id carries one
    pub device_id: Option<String>,
    /// House/unit address, for legacy address keys
    pub device_address: Option<String>,
    /// Event that first announced the device
    pub seed: DeviceEvent,
    /// When the device was registered
    pub added: DateTime<Utc>,
}

impl DeviceDescriptor {
    /// Descriptor for a device first seen through `seed`
    pub fn from_event(platform: Platform, seed: DeviceEvent) -> Self {
        Self {
            event_id: seed.id().to_string(),
            platform,
            protocol: seed.protocol().map(str::to_string),
            device_id: None,
            device_address: None,
            seed,
            added: Utc::now(),
        }
    }
}

/// Top-level gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Serial device path, or `host:port` for TCP
    pub port: String,
    /// Serial port or TCP bridge
    pub transport: Transport,
    /// Serial line speed
    pub baud_rate: u32,
    /// Bound on one connection attempt
    pub connection_timeout_secs: u64,
    /// Delay before the next connection attempt
    pub reconnect_interval_secs: u64,
    /// How long a command waits for its acknowledgement
    pub ack_timeout_ms: u64,
    /// Register unseen devices automatically
    pub automatic_add: bool,
    /// Radio settings sent in the init batch
    pub radio: RadioOptions,
    /// Devices keyed by event id
    pub devices: BTreeMap<String, DeviceDescriptor>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            transport: Transport::Serial,
            baud_rate: DEFAULT_BAUD_RATE,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            reconnect_interval_secs: DEFAULT_RECONNECT_INTERVAL_SECS,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            automatic_add: true,
            radio: RadioOptions::default(),
            devices: BTreeMap::new(),
        }
    }
}

impl GatewayConfig {
    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate a configuration document
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject empty ports and zero timeouts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.trim().is_empty() {
            return Err(ConfigError::Invalid("port is required".to_string()));
        }
        if self.transport == Transport::Tcp && !self.port.contains(':') {
            return Err(ConfigError::Invalid(format!(
                "tcp port '{}' must be host:port",
                self.port
            )));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be positive".to_string()));
        }
        if self.connection_timeout_secs == 0 || self.reconnect_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "connection timeout and reconnect interval must be positive".to_string(),
            ));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::Invalid("ack_timeout_ms must be positive".to_string()));
        }
        for (key, device) in &self.devices {
            if key != &device.event_id {
                return Err(ConfigError::Invalid(format!(
                    "device '{}' stored under key '{}'",
                    device.event_id, key
                )));
            }
        }
        Ok(())
    }

    /// Acknowledgement timeout as a `Duration`
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Settings for the connection manager
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            connection_timeout: Duration::from_secs(self.connection_timeout_secs),
            reconnect_interval: Duration::from_secs(self.reconnect_interval_secs),
            init_commands: InitCommands::new(self.radio.clone()),
        }
    }

    /// Connector for the configured transport
    pub fn connector(&self) -> Arc<dyn Connector> {
        match self.transport {
            Transport::Serial => {
                Arc::new(SerialConnector::new(&self.port).with_baud_rate(self.baud_rate))
            }
            Transport::Tcp => Arc::new(TcpConnector::new(&self.port)),
        }
    }
}

/// Persisted-configuration collaborator the registry writes devices to
pub trait ConfigStore: Send + Sync {
    /// Record a device, replacing any descriptor with the same event id
    fn add_device(&self, descriptor: &DeviceDescriptor) -> Result<(), ConfigError>;

    /// Every recorded device
    fn devices(&self) -> Result<Vec<DeviceDescriptor>, ConfigError>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    devices: Mutex<BTreeMap<String, DeviceDescriptor>>,
}

impl MemoryConfigStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated from a configuration's device table
    pub fn with_devices(devices: BTreeMap<String, DeviceDescriptor>) -> Self {
        Self {
            devices: Mutex::new(devices),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn add_device(&self, descriptor: &DeviceDescriptor) -> Result<(), ConfigError> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(descriptor.event_id.clone(), descriptor.clone());
        Ok(())
    }

    fn devices(&self) -> Result<Vec<DeviceDescriptor>, ConfigError> {
        Ok(self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }
}

/// Store backed by the `devices` table of the JSON configuration file
///
/// Other keys of the document are preserved. Writes go to a sibling
/// temporary file which then replaces the original.
#[derive(Debug)]
pub struct JsonConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonConfigStore {
    /// Store over the configuration file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Configuration file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read_document(&self) -> Result<Map<String, Value>, ConfigError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(self.io_error(err)),
        };
        match serde_json::from_str(&content)? {
            Value::Object(document) => Ok(document),
            _ => Err(ConfigError::Invalid(format!(
                "{} is not a JSON object",
                self.path.display()
            ))),
        }
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}

impl ConfigStore for JsonConfigStore {
    fn add_device(&self, descriptor: &DeviceDescriptor) -> Result<(), ConfigError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut document = self.read_document()?;
        let devices = document
            .entry(DEVICES_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        let devices = devices
            .as_object_mut()
            .ok_or_else(|| ConfigError::Invalid("'devices' is not an object".to_string()))?;
        devices.insert(descriptor.event_id.clone(), serde_json::to_value(descriptor)?);

        self.write_document(&document)
    }

    fn devices(&self) -> Result<Vec<DeviceDescriptor>, ConfigError> {
        let mut document = self.read_document()?;
        match document.remove(DEVICES_KEY) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(devices) => {
                let devices: BTreeMap<String, DeviceDescriptor> = serde_json::from_value(devices)?;
                Ok(devices.into_values().collect())
            }
        }
    }
}
