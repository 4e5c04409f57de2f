//! Pure message routing for MQTT events
//!
//! This module contains the routing decision for incoming MQTT events and the
//! subscription table that maps topics to their callbacks.

use crate::transport::MessageCallback;
use parking_lot::RwLock;
use rumqttc::v5::Event;
use std::collections::HashMap;
use tracing::debug;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => {
                use rumqttc::v5::mqttbytes::v5::Packet;
                match incoming {
                    Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                    Packet::Publish(publish) => EventRoute::MessageReceived {
                        topic: String::from_utf8_lossy(&publish.topic).to_string(),
                        payload: publish.payload.to_vec(),
                        retain: publish.retain,
                    },
                    Packet::Disconnect(_) => EventRoute::Disconnected,
                    Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                        packet_id: suback.pkid,
                    },
                    other => EventRoute::InfrastructureEvent(format!("{other:?}")),
                }
            }
            Event::Outgoing(rumqttc::Outgoing::Disconnect) => EventRoute::LocalDisconnect,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// Subscription confirmed
    SubscriptionConfirmed { packet_id: u16 },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Our own DISCONNECT went out
    LocalDisconnect,
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Exact-topic callback table for inbound messages
#[derive(Default)]
pub struct SubscriptionTable {
    callbacks: RwLock<HashMap<String, MessageCallback>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `topic`, replacing any previous one
    pub fn insert(&self, topic: &str, callback: MessageCallback) {
        self.callbacks.write().insert(topic.to_string(), callback);
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.callbacks.read().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Invoke the callback registered for `topic`.
    ///
    /// Returns false when nothing is subscribed at that topic. The table lock is not held
    /// while the callback runs, so callbacks may subscribe again.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> bool {
        let callback = self.callbacks.read().get(topic).cloned();
        match callback {
            Some(callback) => {
                callback(topic, payload);
                true
            }
            None => {
                debug!(topic = %topic, "No subscription for inbound message");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::Publish;
    use rumqttc::v5::mqttbytes::QoS;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_route_mqtt_event() {
        use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode, Disconnect, Packet};

        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        ));

        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: rumqttc::v5::mqttbytes::v5::DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        ));

        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("devices/device-1/n1/p1/set"),
            pkid: 1,
            payload: Bytes::from("new-value"),
            properties: None,
        }));

        if let EventRoute::MessageReceived {
            topic,
            payload,
            retain,
        } = MessageHandler::route_mqtt_event(&publish)
        {
            assert_eq!(topic, "devices/device-1/n1/p1/set");
            assert_eq!(payload, b"new-value");
            assert!(!retain);
        } else {
            panic!("Expected MessageReceived route");
        }

        let outgoing = Event::Outgoing(rumqttc::Outgoing::Disconnect);
        assert!(matches!(
            MessageHandler::route_mqtt_event(&outgoing),
            EventRoute::LocalDisconnect
        ));
    }

    #[test]
    fn test_subscription_table_dispatch() {
        let table = SubscriptionTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();

        table.insert(
            "devices/d/n/p/set",
            Arc::new(move |topic: &str, payload: &[u8]| {
                assert_eq!(topic, "devices/d/n/p/set");
                assert_eq!(payload, b"42");
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(table.dispatch("devices/d/n/p/set", b"42"));
        assert!(!table.dispatch("devices/d/n/other/set", b"42"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_table_replaces_callback() {
        let table = SubscriptionTable::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let first_clone = first.clone();
        table.insert(
            "t",
            Arc::new(move |_: &str, _: &[u8]| {
                first_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let second_clone = second.clone();
        table.insert(
            "t",
            Arc::new(move |_: &str, _: &[u8]| {
                second_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        table.dispatch("t", b"");
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(table.topics(), vec!["t".to_string()]);
    }
}
