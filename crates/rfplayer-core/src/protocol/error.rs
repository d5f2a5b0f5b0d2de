//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the transceiver
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The serial port could not be used
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// An open attempt did not finish in time
    #[error("Connection timeout")]
    Timeout,

    /// No link is up
    #[error("Not connected to RFPlayer")]
    NotConnected,

    /// The link could not be opened or started
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// No `ZIA--` reply within the timeout, in milliseconds
    #[error("No acknowledgement within {0} ms")]
    AckTimeout(u64),

    /// A command names neither an id nor an address
    #[error("Command for protocol {0} has neither a device id nor an address")]
    MissingTarget(String),

    /// Devices of this platform take no commands
    #[error("Devices of platform {0} cannot be commanded")]
    NotCommandable(String),

    /// An identity key could not be parsed
    #[error("Malformed device identity: '{0}'")]
    MalformedIdentity(String),

    /// No decoder or encoder for the protocol
    #[error("Protocol {0} not implemented")]
    UnsupportedProtocol(String),

    /// A frame does not have the expected shape
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The gateway was shut down
    #[error("Gateway is shut down")]
    Shutdown,

    /// I/O failure on the link
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::MalformedFrame(err.to_string())
    }
}
