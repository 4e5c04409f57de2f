//! Device nodes
//!
//! A node groups properties under `<device>/<node>/...` and aggregates their
//! publish and subscribe calls.

use super::property::Property;
use super::Device;
use crate::error::{HomieError, HomieResult};
use crate::protocol::{attributes, TopicBuilder};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Homie node
pub struct Node {
    name: String,
    node_type: String,
    device: RwLock<Weak<Device>>,
    properties: RwLock<BTreeMap<String, Arc<Property>>>,
}

impl Node {
    /// Create a detached node; attach it with [`Device::add_node`]
    pub fn new<N: Into<String>, T: Into<String>>(name: N, node_type: T) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            node_type: node_type.into(),
            device: RwLock::new(Weak::new()),
            properties: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// Owning device, if the node has been added to one
    pub fn device(&self) -> Option<Arc<Device>> {
        self.device.read().upgrade()
    }

    pub(crate) fn set_device(&self, device: &Arc<Device>) {
        *self.device.write() = Arc::downgrade(device);
    }

    pub(crate) fn attached_device(&self) -> HomieResult<Arc<Device>> {
        self.device().ok_or_else(|| HomieError::NodeDetached {
            node: self.name.clone(),
        })
    }

    /// Create a property and add it to this node
    pub fn new_property<N: Into<String>, T: Into<String>>(
        self: &Arc<Self>,
        name: N,
        property_type: T,
    ) -> HomieResult<Arc<Property>> {
        self.add_property(Property::new(name, property_type))
    }

    /// Add a property; a second property with the same name is rejected
    pub fn add_property(self: &Arc<Self>, property: Arc<Property>) -> HomieResult<Arc<Property>> {
        let mut properties = self.properties.write();
        if properties.contains_key(property.name()) {
            return Err(HomieError::duplicate_property(&self.name, property.name()));
        }
        property.set_node(self);
        properties.insert(property.name().to_string(), property.clone());
        Ok(property)
    }

    pub fn property(&self, name: &str) -> Option<Arc<Property>> {
        self.properties.read().get(name).cloned()
    }

    /// Properties ordered by name
    pub fn properties(&self) -> Vec<Arc<Property>> {
        self.properties.read().values().cloned().collect()
    }

    pub fn property_names(&self) -> Vec<String> {
        self.properties.read().keys().cloned().collect()
    }

    /// Relative topic for a part, for example `timeNode/currentTime`
    pub fn node_topic(&self, part: &str) -> String {
        TopicBuilder::node_topic(&self.name, part)
    }

    /// Subscribe every settable property
    pub fn subscribe(&self) -> HomieResult<()> {
        for property in self.properties() {
            property.subscribe()?;
        }
        Ok(())
    }

    /// Publish `$name`, `$type`, `$properties`, then every property value
    pub fn publish(&self) -> HomieResult<()> {
        let device = self.attached_device()?;
        device.send_message(&self.node_topic(attributes::NAME), &self.name)?;
        device.send_message(&self.node_topic(attributes::TYPE), &self.node_type)?;
        device.send_message(
            &self.node_topic(attributes::PROPERTIES),
            &self.property_names().join(","),
        )?;
        for property in self.properties() {
            property.publish()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("type", &self.node_type)
            .field("properties", &self.property_names())
            .finish()
    }
}
