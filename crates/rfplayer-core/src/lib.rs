//! # RFPlayer Gateway Core
//!
//! Protocol and device-lifecycle core of a gateway for the Ziblue RFPlayer
//! 433/868 MHz transceiver.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Decoding of `ZIA--` control lines and `ZIA33` JSON radio frames into
//!   typed device events
//! - Reversible device identity keys
//! - A supervised serial/TCP link with fixed-delay reconnection and an
//!   availability signal
//! - Command dispatch with acknowledgement
//! - A device registry routing events to consumers, with automatic add
//!
//! ## Example
//!
//! ```rust,ignore
//! use rfplayer_core::prelude::*;
//!
//! let config = GatewayConfig::load("rfplayer.json")?;
//! let store = Arc::new(JsonConfigStore::new("rfplayer.json"));
//! let gateway = Gateway::from_config(config, store);
//! gateway.start()?;
//!
//! let command = OutgoingCommand::new("X10", "ON").with_address("A1");
//! gateway.send_command(&command).await?;
//! ```

pub mod config;
pub mod gateway;
pub mod protocol;
pub mod registry;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{
        ConfigError, ConfigStore, DeviceDescriptor, GatewayConfig, JsonConfigStore,
        MemoryConfigStore, Transport,
    };
    pub use crate::gateway::{Gateway, GatewayStats};
    pub use crate::protocol::{
        codec, ConnectionState, Connector, DecodedPacket, DeviceEvent, DeviceIdentity,
        FieldValue, OutgoingCommand, Platform, ProtocolError,
    };
    pub use crate::registry::{ConsumerRef, Delivery, DeviceFactory, DeviceRegistry, RouteOutcome};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
