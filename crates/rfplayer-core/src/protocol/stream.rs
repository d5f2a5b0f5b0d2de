//! Transport links
//!
//! A [`Connector`] opens a fresh byte link to the transceiver each time the
//! connection manager (re)connects. Serial and TCP links are provided; tests
//! plug in in-memory duplex pipes.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::SerialPortBuilderExt;

use super::{ProtocolError, DEFAULT_BAUD_RATE};

/// Boxed read half of a link
pub type LinkReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a link
pub type LinkWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An open, bidirectional byte link
pub struct Link {
    /// Receiving half
    pub reader: LinkReader,
    /// Sending half
    pub writer: LinkWriter,
}

impl Link {
    /// Link over separate halves
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Split a single duplex stream into a link
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens links to the transceiver
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new link; called once per connection attempt
    async fn open(&self) -> Result<Link, ProtocolError>;

    /// Human-readable endpoint for logs
    fn describe(&self) -> String;
}

/// USB serial link (8N1, no flow control)
#[derive(Debug, Clone)]
pub struct SerialConnector {
    /// Serial device path
    pub port: String,
    /// Line speed
    pub baud_rate: u32,
}

impl SerialConnector {
    /// Connector for `port` at the default speed
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    /// Override the line speed
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self) -> Result<Link, ProtocolError> {
        let stream = tokio_serial::new(&self.port, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .map_err(|e| ProtocolError::SerialError(format!("{}: {}", self.port, e)))?;
        Ok(Link::from_stream(stream))
    }

    fn describe(&self) -> String {
        format!("serial {} @ {}", self.port, self.baud_rate)
    }
}

/// Network link to a serial-over-TCP bridge (`host:port`)
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// `host:port` of the bridge
    pub address: String,
}

impl TcpConnector {
    /// Connector for a serial-over-TCP bridge
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self) -> Result<Link, ProtocolError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| ProtocolError::ConnectionFailed(format!("{}: {}", self.address, e)))?;
        stream.set_nodelay(true)?;
        Ok(Link::from_stream(stream))
    }

    fn describe(&self) -> String {
        format!("tcp {}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn test_describe() {
        let serial = SerialConnector::new("/dev/ttyUSB0");
        assert_eq!(serial.describe(), "serial /dev/ttyUSB0 @ 115200");
        assert_eq!(serial.with_baud_rate(9600).baud_rate, 9600);
        assert_eq!(TcpConnector::new("10.0.0.2:4000").describe(), "tcp 10.0.0.2:4000");
    }

    #[tokio::test]
    async fn test_serial_open_failure_is_serial_error() {
        let result = SerialConnector::new("/dev/does-not-exist-rfp").open().await;
        assert!(matches!(result, Err(ProtocolError::SerialError(_))));
    }

    #[tokio::test]
    async fn test_tcp_link_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(socket).lines();
            lines.next_line().await.unwrap()
        });

        let mut link = TcpConnector::new(address).open().await.unwrap();
        link.writer.write_all(b"ZIA++HELLO\r\n").await.unwrap();
        link.writer.flush().await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received.as_deref(), Some("ZIA++HELLO"));
    }
}
