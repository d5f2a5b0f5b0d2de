//! RFPlayer Protocol Communication
//!
//! Implements the Ziblue RFPlayer line protocol: `ZIA--` control/status lines,
//! `ZIA33` JSON radio frames and `ZIA++` outgoing commands.
//!
//! Decoding is pure (`codec`, `identity`, `decoders`); the link itself is owned
//! by the connection manager and written to through the command dispatcher.

pub mod codec;
pub mod commands;
mod connection;
pub mod decoders;
mod dispatcher;
mod error;
pub mod event;
pub mod fields;
pub mod identity;
pub mod packet;
pub mod serial;
pub mod stream;

pub use commands::{InitCommands, OutgoingCommand, RadioOptions};
pub use connection::{ConnectionConfig, ConnectionCounters, ConnectionManager, ConnectionState};
pub use dispatcher::CommandDispatcher;
pub use error::ProtocolError;
pub use event::{DeviceEvent, Platform};
pub use identity::DeviceIdentity;
pub use packet::{DecodedPacket, Element, FieldValue, Node};
pub use serial::{list_ports, PortInfo};
pub use stream::{Connector, Link, SerialConnector, TcpConnector};

/// Default baud rate of the RFPlayer USB serial bridge
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default acknowledgement timeout in milliseconds
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 5000;

/// Default bound on opening the transport, in seconds
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;

/// Default fixed delay between reconnection attempts, in seconds
pub const DEFAULT_RECONNECT_INTERVAL_SECS: u64 = 10;

/// Maximum accepted length of one incoming line
pub const MAX_LINE_LENGTH: usize = 8192;

/// Header of control and status lines sent by the transceiver
pub const CONTROL_HEADER: &str = "ZIA--";

/// Header of JSON radio frames sent by the transceiver
pub const JSON_HEADER: &str = "ZIA33";

/// Prefix of every command line sent to the transceiver
pub const COMMAND_PREFIX: &str = "ZIA++";

/// Terminator appended to every outgoing line
pub const LINE_TERMINATOR: &str = "\r\n";

/// Separator between the parts of a serialized device identity
pub const PACKET_ID_SEP: &str = "_";
