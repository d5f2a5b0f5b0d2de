//! Gateway service
//!
//! Owns one connection manager, one command dispatcher and one device
//! registry, and runs the router task that turns received lines into routed
//! events. Everything the host needs goes through this object; there is no
//! global state.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigStore, DeviceDescriptor, GatewayConfig};
use crate::protocol::{
    codec, CommandDispatcher, ConnectionCounters, ConnectionManager, Connector, OutgoingCommand,
    Platform, ProtocolError,
};
use crate::registry::{DeviceRegistry, RouteOutcome};

/// Snapshot of gateway activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    /// Link counters
    pub connection: ConnectionCounters,
    /// Recognized lines taken off the frame queue
    pub frames: u64,
    /// Frames that produced no packet
    pub undecoded_frames: u64,
    /// Events extracted from packets
    pub events: u64,
    /// Events handed to a bound consumer
    pub delivered: u64,
    /// Events that registered a new device
    pub registered: u64,
    /// Events nobody took
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct RouterCounters {
    frames: AtomicU64,
    undecoded_frames: AtomicU64,
    events: AtomicU64,
    delivered: AtomicU64,
    registered: AtomicU64,
    dropped: AtomicU64,
}

impl RouterCounters {
    fn record(&self, outcome: &RouteOutcome) {
        self.events.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            RouteOutcome::Delivered(_) => &self.delivered,
            RouteOutcome::Registered(_) => &self.registered,
            RouteOutcome::NoConsumers | RouteOutcome::UnknownDevice => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The running gateway
pub struct Gateway {
    config: GatewayConfig,
    connection: ConnectionManager,
    dispatcher: CommandDispatcher,
    registry: Arc<DeviceRegistry>,
    store: Arc<dyn ConfigStore>,
    cancel: CancellationToken,
    frames_tx: mpsc::UnboundedSender<String>,
    frames_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<RouterCounters>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("connection", &self.connection)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Build a gateway over an explicit transport
    pub fn new(
        config: GatewayConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        let connection = ConnectionManager::new(config.connection_config(), connector);
        let dispatcher =
            CommandDispatcher::new(connection.clone()).with_ack_timeout(config.ack_timeout());
        let registry = Arc::new(DeviceRegistry::new(store.clone(), config.automatic_add));
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        Self {
            config,
            connection,
            dispatcher,
            registry,
            store,
            cancel: CancellationToken::new(),
            frames_tx,
            frames_rx: Mutex::new(Some(frames_rx)),
            tasks: Mutex::new(Vec::new()),
            counters: Arc::new(RouterCounters::default()),
        }
    }

    /// Build a gateway over the transport named in the configuration
    pub fn from_config(config: GatewayConfig, store: Arc<dyn ConfigStore>) -> Self {
        let connector = config.connector();
        Self::new(config, connector, store)
    }

    /// Configuration the gateway was built with
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Device registry; bind consumers and factories here before `start`
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Connection manager
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Restore configured and stored devices, then start the connection supervisor and the router
    ///
    /// Consumers and factories should be registered before calling this so
    /// restored devices reach their factories.
    pub fn start(&self) -> Result<(), ProtocolError> {
        let frames = self
            .frames_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| ProtocolError::ConnectionFailed("gateway already started".to_string()))?;

        self.registry.restore(self.known_devices());

        let supervisor = self.connection.start(self.frames_tx.clone())?;
        let router = tokio::spawn(route_frames(
            frames,
            Arc::clone(&self.registry),
            Arc::clone(&self.counters),
            self.cancel.clone(),
        ));

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([supervisor, router]);
        info!(endpoint = %self.connection.endpoint(), "Gateway started");
        Ok(())
    }

    /// Devices from the configuration merged with the store, keyed by event id
    ///
    /// A stored descriptor replaces a configured one with the same event id.
    fn known_devices(&self) -> Vec<DeviceDescriptor> {
        let mut devices: BTreeMap<String, DeviceDescriptor> = self
            .config
            .devices
            .values()
            .map(|device| (device.event_id.clone(), device.clone()))
            .collect();
        match self.store.devices() {
            Ok(stored) => {
                devices.extend(stored.into_iter().map(|device| (device.event_id.clone(), device)))
            }
            Err(err) => warn!(error = %err, "Could not load stored devices"),
        }
        devices.into_values().collect()
    }

    /// Availability changes of the transceiver link
    pub fn subscribe_availability(&self) -> broadcast::Receiver<bool> {
        self.connection.subscribe_availability()
    }

    /// Whether the transceiver link is up
    pub fn is_available(&self) -> bool {
        self.connection.is_connected()
    }

    /// Send a device command and wait for its acknowledgement
    pub async fn send_command(&self, command: &OutgoingCommand) -> Result<String, ProtocolError> {
        self.dispatcher.send_command(command).await
    }

    /// Send a device command, then register the commanded device
    ///
    /// The device is registered whether or not the send succeeded; the send
    /// result is returned.
    pub async fn send_command_and_add(
        &self,
        command: &OutgoingCommand,
        platform: Platform,
    ) -> Result<String, ProtocolError> {
        if platform == Platform::Sensor {
            return Err(ProtocolError::NotCommandable(platform.to_string()));
        }
        let sent = self.dispatcher.send_command(command).await;
        if let Err(ProtocolError::MissingTarget(_)) = &sent {
            return sent;
        }
        self.registry.add_commanded_device(platform, command)?;
        sent
    }

    /// Send a literal line and wait for its acknowledgement
    pub async fn send_raw_command(&self, line: &str) -> Result<String, ProtocolError> {
        self.dispatcher.send_raw_command(line).await
    }

    /// Feed a line into the receive path as if the transceiver had sent it
    pub fn inject_test_frame(&self, line: &str) -> Result<(), ProtocolError> {
        if self.cancel.is_cancelled() {
            return Err(ProtocolError::Shutdown);
        }
        debug!(line, "Injecting test frame");
        self.frames_tx
            .send(line.trim().to_string())
            .map_err(|_| ProtocolError::Shutdown)
    }

    /// Current counters
    pub fn stats(&self) -> GatewayStats {
        let c = &self.counters;
        GatewayStats {
            connection: self.connection.counters(),
            frames: c.frames.load(Ordering::Relaxed),
            undecoded_frames: c.undecoded_frames.load(Ordering::Relaxed),
            events: c.events.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            registered: c.registered.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop routing, close the link and wait for the background tasks
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.connection.shutdown();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Gateway task ended abnormally");
            }
        }
        info!("Gateway stopped");
    }
}

async fn route_frames(
    mut frames: mpsc::UnboundedReceiver<String>,
    registry: Arc<DeviceRegistry>,
    counters: Arc<RouterCounters>,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = frames.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        counters.frames.fetch_add(1, Ordering::Relaxed);
        let packets = codec::decode(&line);
        if packets.is_empty() {
            counters.undecoded_frames.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        for packet in &packets {
            for event in codec::extract_events(packet) {
                let outcome = registry.route(event);
                counters.record(&outcome);
            }
        }
    }
    debug!("Router stopped");
}
