//! Connection management
//!
//! A single supervisor task owns the link to the transceiver. It cycles
//! `Disconnected → Connecting → Connected → Disconnected` until shutdown:
//! each attempt opens the link under a timeout and sends the initialization
//! batch before the link is published as connected. It then reads lines until
//! EOF, an I/O error or a disconnect signal.
//! After any failure it waits a fixed interval and tries again.
//!
//! Availability is broadcast on every connect (`true`) and every failed or
//! lost connection (`false`). Controlled shutdown closes the link once and
//! publishes nothing further.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::codec;
use super::commands::InitCommands;
use super::stream::{Connector, LinkReader, LinkWriter};
use super::{
    ProtocolError, DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_RECONNECT_INTERVAL_SECS,
    LINE_TERMINATOR, MAX_LINE_LENGTH,
};

/// Capacity of the availability broadcast channel
const AVAILABILITY_CAPACITY: usize = 16;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link open, waiting for the next attempt
    Disconnected,
    /// Opening the link
    Connecting,
    /// Link open and owned by the supervisor
    Connected,
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bound on a single open attempt
    pub connection_timeout: Duration,
    /// Fixed delay before the next attempt after a failure
    pub reconnect_interval: Duration,
    /// Batch written right after every successful open
    pub init_commands: InitCommands,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            reconnect_interval: Duration::from_secs(DEFAULT_RECONNECT_INTERVAL_SECS),
            init_commands: InitCommands::default(),
        }
    }
}

/// Snapshot of link traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionCounters {
    /// Non-empty lines read
    pub lines_received: u64,
    /// Lines written, init batches included
    pub lines_sent: u64,
    /// Links opened and initialized
    pub connects: u64,
    /// Connected links lost or closed
    pub disconnects: u64,
}

#[derive(Debug, Default)]
struct Counters {
    lines_received: AtomicU64,
    lines_sent: AtomicU64,
    connects: AtomicU64,
    disconnects: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ConnectionCounters {
        ConnectionCounters {
            lines_received: self.lines_received.load(Ordering::Relaxed),
            lines_sent: self.lines_sent.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
        }
    }
}

/// The command currently waiting for a `ZIA--` reply
struct PendingAck {
    seq: u64,
    reply: oneshot::Sender<String>,
}

/// Why a connected link was given up
#[derive(Debug)]
enum LinkEnd {
    Eof,
    Failed(String),
    Signalled,
    Shutdown,
}

struct Shared {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    availability_tx: broadcast::Sender<bool>,
    writer: tokio::sync::Mutex<Option<LinkWriter>>,
    /// Bumped on every successful open; tags disconnect signals
    generation: AtomicU64,
    disconnect_tx: mpsc::UnboundedSender<u64>,
    disconnect_rx: Mutex<Option<mpsc::UnboundedReceiver<u64>>>,
    pending: Mutex<Option<PendingAck>>,
    ack_seq: AtomicU64,
    counters: Counters,
}

/// Handle to the connection supervisor
///
/// Cheap to clone; every clone talks to the same link.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.shared.connector.describe())
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionManager {
    /// Create a manager; nothing is opened until [`start`](Self::start)
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (availability_tx, _) = broadcast::channel(AVAILABILITY_CAPACITY);
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();

        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                cancel: CancellationToken::new(),
                state_tx,
                availability_tx,
                writer: tokio::sync::Mutex::new(None),
                generation: AtomicU64::new(0),
                disconnect_tx,
                disconnect_rx: Mutex::new(Some(disconnect_rx)),
                pending: Mutex::new(None),
                ack_seq: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// Spawn the supervisor; recognized lines are forwarded to `frames`
    ///
    /// The sender is dropped when the supervisor exits, which ends the
    /// receiving side cleanly after shutdown.
    pub fn start(
        &self,
        frames: mpsc::UnboundedSender<String>,
    ) -> Result<JoinHandle<()>, ProtocolError> {
        let disconnects = self
            .shared
            .disconnect_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                ProtocolError::ConnectionFailed("connection manager already started".to_string())
            })?;

        let shared = Arc::clone(&self.shared);
        Ok(tokio::spawn(shared.supervise(frames, disconnects)))
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Whether commands can be written
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Receive availability changes
    pub fn subscribe_availability(&self) -> broadcast::Receiver<bool> {
        self.shared.availability_tx.subscribe()
    }

    /// Human-readable endpoint
    pub fn endpoint(&self) -> String {
        self.shared.connector.describe()
    }

    /// Traffic counters
    pub fn counters(&self) -> ConnectionCounters {
        self.shared.counters.snapshot()
    }

    /// Report the current link as lost
    ///
    /// No-op unless connected; repeated signals for the same link collapse
    /// into one reconnection.
    pub fn signal_disconnect(&self) {
        self.shared.signal_disconnect();
    }

    /// Write one line (terminator appended)
    pub async fn write_line(&self, line: &str) -> Result<(), ProtocolError> {
        self.shared.write_line(line).await
    }

    /// Register interest in the next `ZIA--` line; replaces any earlier waiter
    pub(crate) fn arm_ack(&self) -> (u64, oneshot::Receiver<String>) {
        let seq = self.shared.ack_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let (reply, rx) = oneshot::channel();
        *self.shared.lock_pending() = Some(PendingAck { seq, reply });
        (seq, rx)
    }

    /// Drop the waiter registered by `arm_ack`, if it is still current
    pub(crate) fn disarm_ack(&self, seq: u64) {
        let mut pending = self.shared.lock_pending();
        if pending.as_ref().is_some_and(|p| p.seq == seq) {
            *pending = None;
        }
    }

    /// Stop the supervisor, cancel any pending reconnect and close the link
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }

    /// Whether `shutdown` was called
    pub fn is_shut_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

impl Shared {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<PendingAck>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn publish_availability(&self, available: bool) {
        // no subscribers is fine
        let _ = self.availability_tx.send(available);
    }

    fn signal_disconnect(&self) {
        if *self.state_tx.borrow() != ConnectionState::Connected {
            debug!("Disconnect signal ignored, link not connected");
            return;
        }
        let generation = self.generation.load(Ordering::Acquire);
        let _ = self.disconnect_tx.send(generation);
    }

    async fn write_line(&self, line: &str) -> Result<(), ProtocolError> {
        if self.cancel.is_cancelled() {
            return Err(ProtocolError::Shutdown);
        }

        let result = {
            let mut writer = self.writer.lock().await;
            let writer = writer.as_mut().ok_or(ProtocolError::NotConnected)?;
            write_terminated(writer, line).await
        };

        match result {
            Ok(()) => {
                self.counters.lines_sent.fetch_add(1, Ordering::Relaxed);
                trace!(line, "Sent");
                Ok(())
            }
            Err(err) => {
                warn!(line, error = %err, "Write failed");
                self.signal_disconnect();
                Err(err.into())
            }
        }
    }

    async fn supervise(
        self: Arc<Self>,
        frames: mpsc::UnboundedSender<String>,
        mut disconnects: mpsc::UnboundedReceiver<u64>,
    ) {
        let endpoint = self.connector.describe();

        loop {
            self.set_state(ConnectionState::Connecting);
            debug!(endpoint = %endpoint, "Connecting to RFPlayer");

            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                opened = timeout(self.config.connection_timeout, self.connector.open()) => opened,
            };

            let reason = match opened {
                Ok(Ok(link)) => {
                    let mut writer = link.writer;
                    let initialized = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => None,
                        sent = self.send_init_batch(&mut writer) => Some(sent),
                    };

                    match initialized {
                        None => {
                            shutdown_writer(writer).await;
                            break;
                        }
                        Some(Err(err)) => {
                            shutdown_writer(writer).await;
                            format!("initialization failed: {}", err)
                        }
                        Some(Ok(())) => {
                            let generation = self.on_connected(writer).await;
                            info!(endpoint = %endpoint, generation, "Connected to RFPlayer");

                            let end = self
                                .read_lines(link.reader, generation, &frames, &mut disconnects)
                                .await;
                            self.close_link().await;
                            self.counters.disconnects.fetch_add(1, Ordering::Relaxed);
                            match end {
                                LinkEnd::Shutdown => break,
                                LinkEnd::Eof => "link closed by peer".to_string(),
                                LinkEnd::Failed(err) => err,
                                LinkEnd::Signalled => "disconnect signalled".to_string(),
                            }
                        }
                    }
                }
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!(
                    "no connection within {}s",
                    self.config.connection_timeout.as_secs_f32()
                ),
            };

            self.set_state(ConnectionState::Disconnected);
            self.fail_pending();
            self.publish_availability(false);
            warn!(
                endpoint = %endpoint,
                reason = %reason,
                retry_in_secs = self.config.reconnect_interval.as_secs_f32(),
                "RFPlayer unavailable"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.config.reconnect_interval) => {}
            }
        }

        self.close_link().await;
        self.set_state(ConnectionState::Disconnected);
        self.fail_pending();
        info!(endpoint = %endpoint, "Connection supervisor stopped");
    }

    /// Install an initialized writer and publish the new link; returns its generation
    ///
    /// Commands are refused until this runs, so nothing overtakes the init batch.
    async fn on_connected(&self, writer: LinkWriter) -> u64 {
        let mut installed = self.writer.lock().await;
        *installed = Some(writer);
        self.fail_pending();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.connects.fetch_add(1, Ordering::Relaxed);
        self.set_state(ConnectionState::Connected);
        self.publish_availability(true);
        generation
    }

    /// Write the initialization batch on a link not yet visible to callers
    async fn send_init_batch(&self, writer: &mut LinkWriter) -> Result<(), ProtocolError> {
        for line in self.config.init_commands.lines() {
            write_terminated(writer, &line).await?;
            self.counters.lines_sent.fetch_add(1, Ordering::Relaxed);
            trace!(line = %line, "Init");
        }
        Ok(())
    }

    async fn read_lines(
        &self,
        reader: LinkReader,
        generation: u64,
        frames: &mpsc::UnboundedSender<String>,
        disconnects: &mut mpsc::UnboundedReceiver<u64>,
    ) -> LinkEnd {
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return LinkEnd::Shutdown,
                Some(signalled) = disconnects.recv() => {
                    if signalled == generation {
                        return LinkEnd::Signalled;
                    }
                    trace!(signalled, generation, "Stale disconnect signal");
                }
                next = lines.next() => match next {
                    Some(Ok(line)) => self.handle_line(line, frames),
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!(max = MAX_LINE_LENGTH, "Discarding over-long line");
                    }
                    Some(Err(LinesCodecError::Io(err))) => return LinkEnd::Failed(err.to_string()),
                    None => return LinkEnd::Eof,
                },
            }
        }
    }

    fn handle_line(&self, line: String, frames: &mpsc::UnboundedSender<String>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.counters.lines_received.fetch_add(1, Ordering::Relaxed);
        trace!(line, "Received");

        if codec::is_acknowledgement(line) {
            if let Some(pending) = self.lock_pending().take() {
                let _ = pending.reply.send(line.to_string());
            }
        }

        if codec::is_recognized_frame(line) {
            if frames.send(line.to_string()).is_err() {
                debug!(line, "Frame receiver gone, dropping line");
            }
        } else {
            debug!(line, "Discarding unrecognized line");
        }
    }

    /// Take and shut down the writer; the link is closed at most once
    async fn close_link(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(writer) = writer {
            shutdown_writer(writer).await;
        }
    }

    /// Wake a waiting command; it observes a dropped reply channel
    fn fail_pending(&self) {
        self.lock_pending().take();
    }
}

async fn shutdown_writer(mut writer: LinkWriter) {
    if let Err(err) = writer.shutdown().await {
        debug!(error = %err, "Error closing link");
    }
}

async fn write_terminated<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(LINE_TERMINATOR.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::stream::Link;
    use async_trait::async_trait;

    struct NeverConnects;

    #[async_trait]
    impl Connector for NeverConnects {
        async fn open(&self) -> Result<Link, ProtocolError> {
            Err(ProtocolError::ConnectionFailed("unplugged".to_string()))
        }

        fn describe(&self) -> String {
            "nowhere".to_string()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_interval, Duration::from_secs(10));
        assert_eq!(config.init_commands.lines().len(), 18);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let manager = ConnectionManager::new(ConnectionConfig::default(), Arc::new(NeverConnects));
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = manager.start(tx.clone()).unwrap();
        assert!(manager.start(tx).is_err());
        manager.shutdown();
        handle.await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_write_while_disconnected() {
        let manager = ConnectionManager::new(ConnectionConfig::default(), Arc::new(NeverConnects));
        assert!(matches!(
            manager.write_line("ZIA++PING").await,
            Err(ProtocolError::NotConnected)
        ));
        manager.shutdown();
        assert!(matches!(
            manager.write_line("ZIA++PING").await,
            Err(ProtocolError::Shutdown)
        ));
    }

    #[test]
    fn test_disarm_only_current_waiter() {
        let manager = ConnectionManager::new(ConnectionConfig::default(), Arc::new(NeverConnects));
        let (first, _rx1) = manager.arm_ack();
        let (second, _rx2) = manager.arm_ack();
        manager.disarm_ack(first);
        assert!(manager.shared.lock_pending().is_some());
        manager.disarm_ack(second);
        assert!(manager.shared.lock_pending().is_none());
    }
}
