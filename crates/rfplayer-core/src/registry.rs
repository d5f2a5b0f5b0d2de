//! Device registry and event router
//!
//! Each platform has a table binding device identities to consumers, plus an
//! optional factory invoked for devices seen for the first time. A platform
//! without a table is not consumed at all and its events are dropped.
//!
//! Lookup and auto-registration happen under one lock, so concurrent events
//! for the same new identity register it once; the later ones are delivered
//! to the new binding.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::config::{ConfigStore, DeviceDescriptor};
use crate::protocol::{
    DeviceEvent, DeviceIdentity, FieldValue, OutgoingCommand, Platform, ProtocolError,
    PACKET_ID_SEP,
};

/// Capacity of the delivery and button broadcast channels
const BROADCAST_CAPACITY: usize = 256;

/// Opaque handle to the host object consuming a device's events
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerRef(pub String);

impl ConsumerRef {
    /// Reference named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Consumer name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Creates host objects for newly discovered devices
#[async_trait]
pub trait DeviceFactory: Send + Sync {
    /// Called once per new device with the event that revealed it
    async fn add_device(&self, seed: DeviceEvent);
}

/// An event handed to its bound consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Consumer bound to the event id
    pub consumer: ConsumerRef,
    /// The routed event
    pub event: DeviceEvent,
}

/// What routing did with one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Forwarded to an existing binding
    Delivered(ConsumerRef),
    /// New identity bound and handed to the factory
    Registered(ConsumerRef),
    /// Nothing consumes this platform (or the event has none)
    NoConsumers,
    /// Identity unknown and auto-add unavailable
    UnknownDevice,
}

#[derive(Default)]
struct ConsumerTable {
    consumers: HashMap<String, ConsumerRef>,
    factory: Option<Arc<dyn DeviceFactory>>,
}

/// Registry of consumers per platform
pub struct DeviceRegistry {
    tables: Mutex<HashMap<Platform, ConsumerTable>>,
    automatic_add: AtomicBool,
    store: Arc<dyn ConfigStore>,
    deliveries: broadcast::Sender<Delivery>,
    buttons: broadcast::Sender<DeviceEvent>,
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.lock_tables();
        let mut counts: Vec<(Platform, usize)> = tables
            .iter()
            .map(|(platform, table)| (*platform, table.consumers.len()))
            .collect();
        counts.sort();
        f.debug_struct("DeviceRegistry")
            .field("consumers", &counts)
            .field("automatic_add", &self.automatic_add())
            .finish()
    }
}

impl DeviceRegistry {
    /// Empty registry persisting new devices to `store`
    pub fn new(store: Arc<dyn ConfigStore>, automatic_add: bool) -> Self {
        let (deliveries, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (buttons, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tables: Mutex::new(HashMap::new()),
            automatic_add: AtomicBool::new(automatic_add),
            store,
            deliveries,
            buttons,
        }
    }

    fn lock_tables(&self) -> MutexGuard<'_, HashMap<Platform, ConsumerTable>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether unseen devices are registered
    pub fn automatic_add(&self) -> bool {
        self.automatic_add.load(Ordering::Relaxed)
    }

    /// Turn automatic registration on or off
    pub fn set_automatic_add(&self, enabled: bool) {
        self.automatic_add.store(enabled, Ordering::Relaxed);
    }

    /// Bind an identity to a consumer, replacing any earlier binding
    pub fn register_consumer(
        &self,
        platform: Platform,
        identity: impl Into<String>,
        consumer: ConsumerRef,
    ) {
        let identity = identity.into();
        debug!(%platform, identity = %identity, %consumer, "Consumer registered");
        self.lock_tables()
            .entry(platform)
            .or_default()
            .consumers
            .insert(identity, consumer);
    }

    /// Set the factory invoked for unseen devices of a platform
    pub fn register_factory(&self, platform: Platform, factory: Arc<dyn DeviceFactory>) {
        debug!(%platform, "Device factory registered");
        self.lock_tables().entry(platform).or_default().factory = Some(factory);
    }

    /// Remove an identity from whichever platform binds it
    pub fn unregister(&self, identity: &str) -> bool {
        let removed = self
            .lock_tables()
            .values_mut()
            .any(|table| table.consumers.remove(identity).is_some());
        if removed {
            debug!(identity, "Consumer removed");
        }
        removed
    }

    /// Consumer bound to `identity` on `platform`
    pub fn lookup(&self, platform: Platform, identity: &str) -> Option<ConsumerRef> {
        self.lock_tables()
            .get(&platform)
            .and_then(|table| table.consumers.get(identity).cloned())
    }

    /// Number of identities bound for a platform
    pub fn consumer_count(&self, platform: Platform) -> usize {
        self.lock_tables()
            .get(&platform)
            .map_or(0, |table| table.consumers.len())
    }

    /// Every event delivered to a bound consumer
    pub fn subscribe_deliveries(&self) -> broadcast::Receiver<Delivery> {
        self.deliveries.subscribe()
    }

    /// Every routed `command` event (button presses seen on air)
    pub fn subscribe_buttons(&self) -> broadcast::Receiver<DeviceEvent> {
        self.buttons.subscribe()
    }

    /// Route one event to its consumer, auto-registering it when allowed
    pub fn route(&self, event: DeviceEvent) -> RouteOutcome {
        let Some(platform) = event.platform() else {
            debug!(id = event.id(), field = event.field(), value = %event.value(), "Unclassified event dropped");
            return RouteOutcome::NoConsumers;
        };

        let (outcome, factory) = {
            let mut tables = self.lock_tables();
            let Some(table) = tables.get_mut(&platform) else {
                debug!(%platform, id = event.id(), "No consumers for platform, event dropped");
                return RouteOutcome::NoConsumers;
            };

            if let Some(consumer) = table.consumers.get(event.id()) {
                (RouteOutcome::Delivered(consumer.clone()), None)
            } else {
                let Some(factory) = table.factory.clone() else {
                    debug!(%platform, id = event.id(), "Unknown device and no factory, event dropped");
                    return RouteOutcome::UnknownDevice;
                };
                if !self.automatic_add() {
                    debug!(%platform, id = event.id(), "Unknown device and automatic add disabled");
                    return RouteOutcome::UnknownDevice;
                }
                let consumer = ConsumerRef::new(event.id());
                table
                    .consumers
                    .insert(event.id().to_string(), consumer.clone());
                (RouteOutcome::Registered(consumer), Some(factory))
            }
        };

        if platform == Platform::Command {
            let _ = self.buttons.send(event.clone());
        }

        match (&outcome, factory) {
            (RouteOutcome::Delivered(consumer), _) => {
                debug!(%consumer, value = %event.value(), "Event delivered");
                let _ = self.deliveries.send(Delivery {
                    consumer: consumer.clone(),
                    event,
                });
            }
            (RouteOutcome::Registered(consumer), Some(factory)) => {
                info!(%platform, %consumer, "New device added");
                self.persist(&descriptor_for(platform, &event));
                spawn_factory(factory, event);
            }
            _ => {}
        }
        outcome
    }

    /// Register the device a command was just sent to
    ///
    /// The identity is `<protocol>_<id or address>_<platform>`. Already bound
    /// identities are left untouched and reported as `Delivered`.
    pub fn add_commanded_device(
        &self,
        platform: Platform,
        command: &OutgoingCommand,
    ) -> Result<RouteOutcome, ProtocolError> {
        let value = match platform {
            Platform::Cover => FieldValue::from("DOWN"),
            Platform::Command => FieldValue::Bool(true),
            Platform::Sensor => return Err(ProtocolError::NotCommandable(platform.to_string())),
        };
        let target = command
            .target()
            .ok_or_else(|| ProtocolError::MissingTarget(command.protocol.clone()))?;
        let event_id = [command.protocol.as_str(), target, platform.as_str()].join(PACKET_ID_SEP);

        let factory = {
            let mut tables = self.lock_tables();
            let table = tables.entry(platform).or_default();
            if let Some(consumer) = table.consumers.get(&event_id) {
                return Ok(RouteOutcome::Delivered(consumer.clone()));
            }
            table
                .consumers
                .insert(event_id.clone(), ConsumerRef::new(&event_id));
            table.factory.clone()
        };

        let seed = DeviceEvent::new(
            Some(platform),
            event_id.clone(),
            Some(command.protocol.clone()),
            platform.as_str(),
            value,
            None,
        );
        let mut descriptor = DeviceDescriptor::from_event(platform, seed.clone());
        descriptor.device_id = command.device_id.clone();
        descriptor.device_address = command.device_address.clone();

        info!(%platform, id = %event_id, "Commanded device added");
        self.persist(&descriptor);
        if let Some(factory) = factory {
            spawn_factory(factory, seed);
        }
        Ok(RouteOutcome::Registered(ConsumerRef::new(event_id)))
    }

    /// Bind stored devices and hand their seeds to the matching factories
    pub fn restore(&self, descriptors: Vec<DeviceDescriptor>) -> usize {
        let mut restored = Vec::with_capacity(descriptors.len());
        {
            let mut tables = self.lock_tables();
            for descriptor in descriptors {
                let table = tables.entry(descriptor.platform).or_default();
                table.consumers.insert(
                    descriptor.event_id.clone(),
                    ConsumerRef::new(&descriptor.event_id),
                );
                restored.push((table.factory.clone(), descriptor.seed));
            }
        }

        let count = restored.len();
        for (factory, seed) in restored {
            if let Some(factory) = factory {
                spawn_factory(factory, seed);
            }
        }
        if count > 0 {
            info!(count, "Stored devices restored");
        }
        count
    }

    fn persist(&self, descriptor: &DeviceDescriptor) {
        if let Err(err) = self.store.add_device(descriptor) {
            error!(id = %descriptor.event_id, error = %err, "Failed to persist device");
        }
    }
}

fn descriptor_for(platform: Platform, event: &DeviceEvent) -> DeviceDescriptor {
    let mut descriptor = DeviceDescriptor::from_event(platform, event.clone());
    if let Ok(identity) = DeviceIdentity::deserialize(event.id()) {
        descriptor.device_id = identity.id;
        descriptor.device_address = identity.address;
    }
    descriptor
}

fn spawn_factory(factory: Arc<dyn DeviceFactory>, seed: DeviceEvent) {
    tokio::spawn(async move {
        factory.add_device(seed).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigStore;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    struct ChannelFactory(mpsc::UnboundedSender<DeviceEvent>);

    #[async_trait]
    impl DeviceFactory for ChannelFactory {
        async fn add_device(&self, seed: DeviceEvent) {
            let _ = self.0.send(seed);
        }
    }

    fn sensor(id: &str) -> DeviceEvent {
        DeviceEvent::new(
            Some(Platform::Sensor),
            id.to_string(),
            Some("VISONIC".into()),
            "detector",
            FieldValue::from("open"),
            None,
        )
    }

    fn registry() -> (DeviceRegistry, Arc<MemoryConfigStore>) {
        let store = Arc::new(MemoryConfigStore::new());
        (DeviceRegistry::new(store.clone(), true), store)
    }

    #[tokio::test]
    async fn test_no_table_drops() {
        let (registry, _) = registry();
        assert_eq!(registry.route(sensor("VISONIC_1_detector_detector")), RouteOutcome::NoConsumers);

        let unclassified = DeviceEvent::new(
            None,
            "rfplayer".into(),
            None,
            "info",
            FieldValue::from("banner"),
            None,
        );
        assert_eq!(registry.route(unclassified), RouteOutcome::NoConsumers);
    }

    #[tokio::test]
    async fn test_delivery_to_bound_consumer() {
        let (registry, _) = registry();
        let mut deliveries = registry.subscribe_deliveries();
        registry.register_consumer(Platform::Sensor, "VISONIC_1_detector_detector", ConsumerRef::new("hall"));

        let outcome = registry.route(sensor("VISONIC_1_detector_detector"));
        assert_eq!(outcome, RouteOutcome::Delivered(ConsumerRef::new("hall")));

        let delivery = deliveries.recv().await.unwrap();
        assert_eq!(delivery.consumer.as_str(), "hall");
        assert_eq!(delivery.event.id(), "VISONIC_1_detector_detector");
    }

    #[tokio::test]
    async fn test_unknown_without_factory_or_auto_add() {
        let (registry, store) = registry();
        registry.register_consumer(Platform::Sensor, "other", ConsumerRef::new("other"));
        assert_eq!(registry.route(sensor("new")), RouteOutcome::UnknownDevice);

        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register_factory(Platform::Sensor, Arc::new(ChannelFactory(tx)));
        registry.set_automatic_add(false);
        assert_eq!(registry.route(sensor("new")), RouteOutcome::UnknownDevice);
        assert!(store.devices().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auto_add_persists_and_invokes_factory() {
        let (registry, store) = registry();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register_factory(Platform::Sensor, Arc::new(ChannelFactory(tx)));

        let outcome = registry.route(sensor("VISONIC_77_detector_detector"));
        assert_eq!(
            outcome,
            RouteOutcome::Registered(ConsumerRef::new("VISONIC_77_detector_detector"))
        );

        let seed = rx.recv().await.unwrap();
        assert_eq!(seed.id(), "VISONIC_77_detector_detector");

        let stored = store.devices().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].device_id.as_deref(), Some("77"));
        assert_eq!(stored[0].platform, Platform::Sensor);

        assert!(matches!(
            registry.route(sensor("VISONIC_77_detector_detector")),
            RouteOutcome::Delivered(_)
        ));
    }

    #[tokio::test]
    async fn test_command_events_publish_buttons() {
        let (registry, _) = registry();
        let mut buttons = registry.subscribe_buttons();
        registry.register_consumer(Platform::Command, "X10_3_command_command", ConsumerRef::new("remote"));

        let press = DeviceEvent::new(
            Some(Platform::Command),
            "X10_3_command_command".into(),
            Some("X10".into()),
            "command",
            FieldValue::from("ON"),
            None,
        );
        registry.route(press.clone());
        assert_eq!(buttons.recv().await.unwrap(), press);
    }

    #[tokio::test]
    async fn test_unregister() {
        let (registry, _) = registry();
        registry.register_consumer(Platform::Cover, "RTS_1_shu", ConsumerRef::new("shutter"));
        assert_eq!(registry.consumer_count(Platform::Cover), 1);
        assert!(registry.unregister("RTS_1_shu"));
        assert!(!registry.unregister("RTS_1_shu"));
        assert_eq!(registry.lookup(Platform::Cover, "RTS_1_shu"), None);
    }

    #[tokio::test]
    async fn test_commanded_device() {
        let (registry, store) = registry();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register_factory(Platform::Cover, Arc::new(ChannelFactory(tx)));

        let command = OutgoingCommand::new("RTS", "DOWN").with_id("14813191");
        let outcome = registry.add_commanded_device(Platform::Cover, &command).unwrap();
        assert_eq!(outcome, RouteOutcome::Registered(ConsumerRef::new("RTS_14813191_cover")));

        let seed = rx.recv().await.unwrap();
        assert_eq!(seed.value(), &FieldValue::from("DOWN"));
        assert_eq!(store.devices().unwrap()[0].device_id.as_deref(), Some("14813191"));

        let again = registry.add_commanded_device(Platform::Cover, &command).unwrap();
        assert!(matches!(again, RouteOutcome::Delivered(_)));

        assert!(matches!(
            registry.add_commanded_device(Platform::Sensor, &command),
            Err(ProtocolError::NotCommandable(_))
        ));
        assert!(matches!(
            registry.add_commanded_device(Platform::Command, &OutgoingCommand::new("X10", "ON")),
            Err(ProtocolError::MissingTarget(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_binds_and_seeds() {
        let (registry, _) = registry();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register_factory(Platform::Sensor, Arc::new(ChannelFactory(tx)));

        let descriptor =
            DeviceDescriptor::from_event(Platform::Sensor, sensor("VISONIC_5_detector_detector"));
        assert_eq!(registry.restore(vec![descriptor]), 1);
        assert!(registry
            .lookup(Platform::Sensor, "VISONIC_5_detector_detector")
            .is_some());
        assert_eq!(rx.recv().await.unwrap().id(), "VISONIC_5_detector_detector");
    }
}
