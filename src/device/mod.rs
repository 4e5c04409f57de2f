//! Homie device model
//!
//! A [`Device`] owns its nodes, the bus it publishes through and the registration table
//! that binds nodes and the device itself to periodic publishers. Nodes and properties
//! only hold weak back-references, so dropping the device releases the whole tree.
//!
//! On every (re)connection the device runs its initialisation sequence:
//!
//! 1. subscribe the settable properties of every node
//! 2. publish `$homie`, `$name`, `$localip`, `$implementation`, `$state`,
//!    `$stats/interval` and `$nodes`
//! 3. publish every node (attributes, then property values)
//! 4. trigger the node publishers and the device publisher once, which starts them
//! 5. publish `$stats/uptime`

pub mod node;
pub mod property;
pub mod stats;

pub use node::Node;
pub use property::{HandlerResult, Property, PropertyHandler};
pub use stats::DeviceStats;

use crate::config::HomieConfig;
use crate::error::{HomieError, HomieResult};
use crate::protocol::{attributes, DeviceState, TopicBuilder, HOMIE_SPEC_VERSION};
use crate::publisher::{PeriodicPublisher, PublisherRegistry};
use crate::transport::mqtt::{configure_mqtt_options, MqttBus, OnConnect, ReconnectConfig, SessionOptions};
use crate::transport::{MessageBus, MessageCallback, QoS};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

/// Homie device
pub struct Device {
    name: String,
    config: HomieConfig,
    nodes: RwLock<BTreeMap<String, Arc<Node>>>,
    stats: DeviceStats,
    bus: RwLock<Option<Arc<dyn MessageBus>>>,
    publishers: PublisherRegistry,
    session: Mutex<Option<MqttBus>>,
}

impl Device {
    /// Create a device named `name`; the name is also the MQTT client id
    pub fn new<N: Into<String>>(name: N, config: HomieConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            nodes: RwLock::new(BTreeMap::new()),
            stats: DeviceStats::new(),
            bus: RwLock::new(None),
            publishers: PublisherRegistry::default(),
            session: Mutex::new(None),
        })
    }

    /// Create a device named after `config.device.id`
    pub fn from_config(config: HomieConfig) -> Arc<Self> {
        let name = config.device.id.clone();
        Self::new(name, config)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &HomieConfig {
        &self.config
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    /// Create a node and add it to this device
    pub fn new_node<N: Into<String>, T: Into<String>>(
        self: &Arc<Self>,
        name: N,
        node_type: T,
    ) -> HomieResult<Arc<Node>> {
        self.add_node(Node::new(name, node_type))
    }

    /// Add a node; a second node with the same name is rejected
    pub fn add_node(self: &Arc<Self>, node: Arc<Node>) -> HomieResult<Arc<Node>> {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(node.name()) {
            return Err(HomieError::duplicate_node(&self.name, node.name()));
        }
        node.set_device(self);
        nodes.insert(node.name().to_string(), node.clone());
        Ok(node)
    }

    pub fn node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.read().get(name).cloned()
    }

    /// Nodes ordered by name
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().values().cloned().collect()
    }

    /// Full topic for a device-relative part
    pub fn topic(&self, part: &str) -> String {
        TopicBuilder::device_topic(&self.config.device.base_topic, &self.name, part)
    }

    pub fn is_connected(&self) -> bool {
        self.bus
            .read()
            .as_ref()
            .is_some_and(|bus| bus.is_connected())
    }

    /// Publish `payload` retained with QoS 1 at `<base><device>/<part>`
    pub fn send_message(&self, part: &str, payload: &str) -> HomieResult<()> {
        let bus = self.connected_bus()?;
        bus.publish(&self.topic(part), QoS::AtLeastOnce, true, payload.as_bytes())?;
        Ok(())
    }

    /// Subscribe to `<base><device>/<part>` with QoS 1
    pub fn subscribe(&self, part: &str, callback: MessageCallback) -> HomieResult<()> {
        let bus = self.connected_bus()?;
        bus.subscribe(&self.topic(part), QoS::AtLeastOnce, callback)?;
        Ok(())
    }

    /// Publish the uptime in whole seconds
    pub fn publish_stats(&self) -> HomieResult<()> {
        let uptime = self.stats.uptime().as_secs();
        self.send_message(attributes::STATS_UPTIME, &uptime.to_string())
    }

    /// Address published as `$localip`
    pub fn local_ip(&self) -> String {
        match &self.config.device.local_ip {
            Some(ip) => ip.clone(),
            None => stats::outbound_ip().to_string(),
        }
    }

    /// Periodic publisher bound to the named node
    pub fn node_publisher(&self, node: &str) -> Option<PeriodicPublisher> {
        self.publishers.node(node)
    }

    /// Periodic publisher bound to the device slot
    pub fn device_publisher(&self) -> Option<PeriodicPublisher> {
        self.publishers.device()
    }

    pub(crate) fn publishers(&self) -> &PublisherRegistry {
        &self.publishers
    }

    /// Run the initialisation sequence against `bus`.
    ///
    /// Called on every ConnAck; running it again republishes everything.
    pub fn on_connect(self: &Arc<Self>, bus: Arc<dyn MessageBus>) -> HomieResult<()> {
        let span = crate::device_span!(device = %self.name);
        let _entered = span.enter();

        *self.bus.write() = Some(bus);
        self.stats.mark_connected();
        info!(device = %self.name, "Connected, initialising device");

        self.init_nodes()?;
        self.init_device()
    }

    fn init_nodes(&self) -> HomieResult<()> {
        for node in self.nodes() {
            node.subscribe()?;
        }
        Ok(())
    }

    fn init_device(&self) -> HomieResult<()> {
        let nodes = self.nodes();
        let node_names: Vec<&str> = nodes.iter().map(|node| node.name()).collect();

        self.send_message(attributes::HOMIE, HOMIE_SPEC_VERSION)?;
        self.send_message(attributes::NAME, &self.name)?;
        self.send_message(attributes::LOCAL_IP, &self.local_ip())?;
        self.send_message(attributes::IMPLEMENTATION, &self.config.device.implementation)?;
        self.send_message(attributes::STATE, DeviceState::Ready.as_str())?;
        self.send_message(
            attributes::STATS_INTERVAL,
            &self.config.device.stats_interval_secs.to_string(),
        )?;
        self.send_message(attributes::NODES, &node_names.join(","))?;

        for node in &nodes {
            node.publish()?;
        }

        for node in &nodes {
            if let Some(publisher) = self.publishers.node(node.name()) {
                if let Err(e) = publisher.trigger_node(node) {
                    warn!(device = %self.name, node = %node.name(), error = %e, "Node publisher trigger failed");
                }
            }
        }

        if let Some(publisher) = self.publishers.device() {
            if let Err(e) = publisher.trigger_device() {
                warn!(device = %self.name, error = %e, "Device publisher trigger failed");
            }
        }

        self.publish_stats()
    }

    /// Connect to the configured broker and wait for the first ConnAck.
    ///
    /// The initialisation sequence runs from the MQTT event loop on every ConnAck.
    pub async fn connect(self: &Arc<Self>) -> HomieResult<()> {
        let session = SessionOptions {
            client_id: self.name.clone(),
            state_topic: self.topic(attributes::STATE),
        };
        let options = configure_mqtt_options(&session, &self.config.mqtt);

        let weak = Arc::downgrade(self);
        let on_connect: OnConnect = Arc::new(move |bus| {
            if let Some(device) = weak.upgrade() {
                if let Err(e) = device.on_connect(bus) {
                    error!(device = %device.name, error = %e, "Device initialisation failed");
                }
            }
        });

        let bus = MqttBus::connect(
            options,
            ReconnectConfig::from_section(&self.config.mqtt),
            self.config.mqtt.connect_timeout(),
            on_connect,
        )
        .instrument(crate::mqtt_span!(device = %self.name, host = %self.config.mqtt.host))
        .await?;

        *self.session.lock() = Some(bus);
        Ok(())
    }

    /// Close every publisher bound to the device. Closing is terminal.
    pub fn close_publishers(&self) {
        for publisher in self.publishers.all() {
            publisher.close();
        }
    }

    /// Publish `$state = disconnected`, then close the MQTT session.
    ///
    /// Bound publishers keep running, and their ticks are skipped until the next
    /// [`Device::on_connect`] triggers them again. Use [`Device::close_publishers`] to stop them.
    pub async fn disconnect(&self) -> HomieResult<()> {
        if let Err(e) = self.send_message(attributes::STATE, DeviceState::Disconnected.as_str()) {
            warn!(device = %self.name, error = %e, "Could not announce disconnected state");
        }

        let session = self.session.lock().take();
        if let Some(bus) = session {
            bus.disconnect().await?;
        }
        *self.bus.write() = None;
        info!(device = %self.name, "Disconnected");
        Ok(())
    }

    fn connected_bus(&self) -> HomieResult<Arc<dyn MessageBus>> {
        match self.bus.read().as_ref() {
            Some(bus) if bus.is_connected() => Ok(bus.clone()),
            _ => Err(HomieError::NotConnected {
                device: self.name.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("base_topic", &self.config.device.base_topic)
            .field("nodes", &self.nodes.read().keys().collect::<Vec<_>>())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBus;

    fn device() -> Arc<Device> {
        Device::new("test-device", HomieConfig::test_config())
    }

    #[test]
    fn test_topic() {
        let device = device();
        assert_eq!(device.topic("$name"), "devices/test-device/$name");
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let device = device();
        device.new_node("n1", "Generic").unwrap();

        let err = device.new_node("n1", "Other").unwrap_err();
        assert!(err.is_configuration_error());
        assert!(matches!(err, HomieError::DuplicateNode { .. }));
        assert_eq!(device.node("n1").unwrap().node_type(), "Generic");
    }

    #[test]
    fn test_send_message_requires_bus() {
        let device = device();
        assert!(matches!(
            device.send_message("$name", "x"),
            Err(HomieError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_send_message_requires_connected_bus() {
        let device = device();
        let bus = MockBus::new();
        device.on_connect(bus.clone()).unwrap();

        bus.set_connected(false);
        assert!(matches!(
            device.send_message("$name", "x"),
            Err(HomieError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_on_connect_publishes_descriptors_in_order() {
        let device = device();
        let node = device.new_node("n1", "Generic").unwrap();
        node.new_property("p1", "integer").unwrap().set_value("7");

        let bus = MockBus::new();
        device.on_connect(bus.clone()).unwrap();

        let topics = bus.published_topics();
        assert_eq!(
            topics,
            vec![
                "devices/test-device/$homie",
                "devices/test-device/$name",
                "devices/test-device/$localip",
                "devices/test-device/$implementation",
                "devices/test-device/$state",
                "devices/test-device/$stats/interval",
                "devices/test-device/$nodes",
                "devices/test-device/n1/$name",
                "devices/test-device/n1/$type",
                "devices/test-device/n1/$properties",
                "devices/test-device/n1/p1",
                "devices/test-device/$stats/uptime",
            ]
        );
        assert_eq!(bus.payload_for("devices/test-device/$homie").as_deref(), Some("3.0.1"));
        assert_eq!(bus.payload_for("devices/test-device/$localip").as_deref(), Some("192.168.1.10"));
        assert_eq!(bus.payload_for("devices/test-device/$state").as_deref(), Some("ready"));
        assert_eq!(bus.payload_for("devices/test-device/$nodes").as_deref(), Some("n1"));
        assert_eq!(bus.payload_for("devices/test-device/n1/p1").as_deref(), Some("7"));
        assert!(device.stats().connect_time().is_some());
    }

    #[test]
    fn test_on_connect_fails_when_bus_disconnected() {
        let device = device();
        let bus = MockBus::new();
        bus.set_connected(false);

        let err = device.on_connect(bus).unwrap_err();
        assert!(matches!(err, HomieError::NotConnected { .. }));
    }
}
