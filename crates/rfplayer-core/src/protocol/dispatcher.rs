//! Command dispatch
//!
//! Sends one command at a time and resolves once the transceiver answers on
//! its control channel, or fails after the acknowledgement timeout. Commands
//! are never retried here.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::codec;
use super::commands::OutgoingCommand;
use super::connection::ConnectionManager;
use super::{ProtocolError, DEFAULT_ACK_TIMEOUT_MS};

/// Serializes outgoing commands and waits for their acknowledgement
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    connection: ConnectionManager,
    ack_timeout: Duration,
    /// Held for the whole send/ack exchange so replies cannot be mismatched
    in_flight: Arc<Mutex<()>>,
}

impl CommandDispatcher {
    /// Dispatcher over `connection` with the default acknowledgement timeout
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Override the acknowledgement timeout
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    /// Current acknowledgement timeout
    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Encode and send a device command; returns the acknowledgement line
    pub async fn send_command(&self, command: &OutgoingCommand) -> Result<String, ProtocolError> {
        let line = codec::encode(command)?;
        self.send_raw_command(&line).await
    }

    /// Send a literal line; returns the acknowledgement line
    pub async fn send_raw_command(&self, line: &str) -> Result<String, ProtocolError> {
        let _exclusive = self.in_flight.lock().await;

        if self.connection.is_shut_down() {
            return Err(ProtocolError::Shutdown);
        }
        if !self.connection.is_connected() {
            return Err(ProtocolError::NotConnected);
        }

        let (seq, reply) = self.connection.arm_ack();
        if let Err(err) = self.connection.write_line(line).await {
            self.connection.disarm_ack(seq);
            return Err(err);
        }
        debug!(line, seq, "Command sent, awaiting acknowledgement");

        match timeout(self.ack_timeout, reply).await {
            Ok(Ok(ack)) => {
                debug!(line, ack = %ack, "Command acknowledged");
                Ok(ack)
            }
            // reply channel dropped: link lost or shut down mid-flight
            Ok(Err(_)) => {
                warn!(line, "Link lost before acknowledgement");
                Err(if self.connection.is_shut_down() {
                    ProtocolError::Shutdown
                } else {
                    ProtocolError::NotConnected
                })
            }
            Err(_) => {
                self.connection.disarm_ack(seq);
                let ms = self.ack_timeout.as_millis() as u64;
                warn!(line, timeout_ms = ms, "No acknowledgement");
                Err(ProtocolError::AckTimeout(ms))
            }
        }
    }
}
