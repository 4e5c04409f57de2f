//! Node properties
//!
//! A property holds the last value set by application code and publishes it retained
//! to `<device>/<node>/<property>`. Setting a handler makes the property settable:
//! only then does the node subscribe it to `<device>/<node>/<property>/set`.

use super::node::Node;
use crate::error::{HandlerError, HomieError, HomieResult};
use crate::protocol::TopicBuilder;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Acceptance flag or error returned by a property handler
pub type HandlerResult = Result<bool, HandlerError>;

/// Handler for inbound commands, called with `(property, payload, topic)`.
///
/// The value is not changed automatically when the handler accepts a command; the
/// handler calls [`Property::set_value`] and [`Property::publish`] itself when it wants
/// the change reflected and echoed.
pub type PropertyHandler = Arc<dyn Fn(&Property, &[u8], &str) -> HandlerResult + Send + Sync>;

/// Homie node property
pub struct Property {
    name: String,
    property_type: String,
    value: RwLock<String>,
    handler: RwLock<Option<PropertyHandler>>,
    node: RwLock<Weak<Node>>,
}

impl Property {
    /// Create a detached property; attach it with [`Node::add_property`]
    pub fn new<N: Into<String>, T: Into<String>>(name: N, property_type: T) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            property_type: property_type.into(),
            value: RwLock::new(String::new()),
            handler: RwLock::new(None),
            node: RwLock::new(Weak::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Semantic type tag (`integer`, `float`, ...), not enforced
    pub fn property_type(&self) -> &str {
        &self.property_type
    }

    pub fn value(&self) -> String {
        self.value.read().clone()
    }

    pub fn set_value<V: Into<String>>(&self, value: V) -> &Self {
        *self.value.write() = value.into();
        self
    }

    /// Owning node, if the property has been added to one
    pub fn node(&self) -> Option<Arc<Node>> {
        self.node.read().upgrade()
    }

    pub(crate) fn set_node(&self, node: &Arc<Node>) {
        *self.node.write() = Arc::downgrade(node);
    }

    pub fn handler(&self) -> Option<PropertyHandler> {
        self.handler.read().clone()
    }

    /// Set the handler for inbound commands, making the property settable
    pub fn set_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(&Property, &[u8], &str) -> HandlerResult + Send + Sync + 'static,
    {
        *self.handler.write() = Some(Arc::new(handler));
        self
    }

    pub fn is_settable(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Full value topic, e.g. `homie/device/node/property`
    pub fn topic(&self) -> HomieResult<String> {
        let node = self.attached_node()?;
        let device = node.attached_device()?;
        Ok(device.topic(&TopicBuilder::property_topic(node.name(), &self.name)))
    }

    /// Full command topic, e.g. `homie/device/node/property/set`
    pub fn set_topic(&self) -> HomieResult<String> {
        let node = self.attached_node()?;
        let device = node.attached_device()?;
        Ok(device.topic(&TopicBuilder::set_topic(node.name(), &self.name)))
    }

    /// Send the current value, retained, to the property topic
    pub fn publish(&self) -> HomieResult<()> {
        let node = self.attached_node()?;
        let device = node.attached_device()?;
        let value = self.value();
        device.send_message(&TopicBuilder::property_topic(node.name(), &self.name), &value)
    }

    /// Subscribe to the command topic when a handler is set; otherwise do nothing
    pub fn subscribe(self: &Arc<Self>) -> HomieResult<()> {
        if !self.is_settable() {
            return Ok(());
        }

        let node = self.attached_node()?;
        let device = node.attached_device()?;
        let part = TopicBuilder::set_topic(node.name(), &self.name);

        let weak = Arc::downgrade(self);
        device.subscribe(
            &part,
            Arc::new(move |topic: &str, payload: &[u8]| {
                if let Some(property) = weak.upgrade() {
                    property.dispatch(topic, payload);
                }
            }),
        )?;

        debug!(property = %self.name, topic = %device.topic(&part), "Subscribed settable property");
        Ok(())
    }

    /// Invoke the handler for an inbound command.
    ///
    /// A message without a handler should be unreachable because only settable properties
    /// subscribe; it is reported as [`HomieError::MissingHandler`].
    pub fn on_message(&self, topic: &str, payload: &[u8]) -> HomieResult<bool> {
        let handler = self.handler().ok_or_else(|| HomieError::MissingHandler {
            property: self.name.clone(),
            topic: topic.to_string(),
        })?;

        handler(self, payload, topic).map_err(|source| HomieError::Handler {
            property: self.name.clone(),
            source,
        })
    }

    /// Entry point for the bus: run the handler and log the outcome
    fn dispatch(&self, topic: &str, payload: &[u8]) {
        match self.on_message(topic, payload) {
            Ok(true) => debug!(property = %self.name, topic = %topic, "Command accepted"),
            Ok(false) => info!(property = %self.name, topic = %topic, "Command rejected"),
            Err(e @ HomieError::MissingHandler { .. }) => {
                error!(property = %self.name, topic = %topic, error = %e, "Inbound message without handler");
            }
            Err(e) => warn!(property = %self.name, topic = %topic, error = %e, "Command handler failed"),
        }
    }

    fn attached_node(&self) -> HomieResult<Arc<Node>> {
        self.node().ok_or_else(|| HomieError::PropertyDetached {
            property: self.name.clone(),
        })
    }
}

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("type", &self.property_type)
            .field("value", &*self.value.read())
            .field("settable", &self.is_settable())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_value() {
        let property = Property::new("p1", "integer");
        assert_eq!(property.value(), "");

        property.set_value("42").set_value("43");
        assert_eq!(property.value(), "43");
        assert_eq!(property.property_type(), "integer");
    }

    #[test]
    fn test_detached_property_cannot_publish() {
        let property = Property::new("p1", "integer");
        assert!(property.node().is_none());
        assert!(matches!(
            property.publish(),
            Err(HomieError::PropertyDetached { .. })
        ));
    }

    #[test]
    fn test_subscribe_without_handler_is_noop() {
        let property = Property::new("p1", "integer");
        assert!(!property.is_settable());
        assert!(property.subscribe().is_ok());
    }

    #[test]
    fn test_on_message_without_handler() {
        let property = Property::new("p1", "integer");
        let result = property.on_message("devices/d/n1/p1/set", b"1");
        assert!(matches!(result, Err(HomieError::MissingHandler { .. })));
    }

    #[test]
    fn test_on_message_invokes_handler() {
        let property = Property::new("p1", "string");
        property.set_handler(|p, payload, topic| {
            assert_eq!(topic, "devices/d/n1/p1/set");
            p.set_value(String::from_utf8_lossy(payload).to_string());
            Ok(true)
        });

        let accepted = property.on_message("devices/d/n1/p1/set", b"new-value").unwrap();
        assert!(accepted);
        assert_eq!(property.value(), "new-value");
    }

    #[test]
    fn test_handler_error_is_wrapped() {
        let property = Property::new("p1", "string");
        property.set_handler(|_, _, _| Err("rejected".into()));

        let result = property.on_message("t", b"x");
        match result {
            Err(HomieError::Handler { property, source }) => {
                assert_eq!(property, "p1");
                assert_eq!(source.to_string(), "rejected");
            }
            other => panic!("Expected handler error, got {other:?}"),
        }
        // value untouched
        assert_eq!(property.value(), "");
    }
}
