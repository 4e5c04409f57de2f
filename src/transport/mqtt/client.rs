//! Impure I/O operations for the MQTT bus
//!
//! This module handles network communication, async coordination, and integration
//! with the rumqttc client. Two tasks run per session: the event loop task, which
//! polls rumqttc, dispatches inbound messages and runs the on-connect callback, and
//! the forwarder task, which drains the outbound request queue in order.

use super::connection::{ConnectionState, ReconnectConfig};
use super::message_handler::{EventRoute, MessageHandler, SubscriptionTable};
use crate::transport::{BusError, MessageBus, MessageCallback};
use bytes::Bytes;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Upper bound on how long `disconnect` waits for the DISCONNECT packet to go out
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Callback run on every successful (re)connection
pub type OnConnect = Arc<dyn Fn(Arc<dyn MessageBus>) + Send + Sync>;

/// Requests queued for the forwarder task
#[derive(Debug)]
enum Outbound {
    Publish {
        topic: String,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    },
    Subscribe {
        topic: String,
        qos: QoS,
    },
    Disconnect,
}

struct BusShared {
    client_id: String,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    subscriptions: SubscriptionTable,
    connected: AtomicBool,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
}

impl BusShared {
    fn set_state(&self, state: ConnectionState) {
        self.connected
            .store(state == ConnectionState::Connected, Ordering::SeqCst);
        self.state_tx.send_replace(state);
    }

    fn enqueue(&self, request: Outbound) -> Result<(), BusError> {
        if *self.shutdown_tx.borrow() {
            return Err(BusError::QueueClosed);
        }
        self.outbound_tx
            .send(request)
            .map_err(|_| BusError::QueueClosed)
    }

    fn stop_tasks(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// MQTT implementation of [`MessageBus`]
///
/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct MqttBus {
    inner: Arc<BusShared>,
}

impl MqttBus {
    /// Start a session and wait for the first ConnAck.
    ///
    /// `on_connect` runs on the event loop task after every ConnAck, including
    /// the ones that follow an automatic reconnection. Failure to connect within
    /// `connect_timeout` stops the session and returns an error.
    pub async fn connect(
        options: MqttOptions,
        reconnect_config: ReconnectConfig,
        connect_timeout: Duration,
        on_connect: OnConnect,
    ) -> Result<Self, BusError> {
        let client_id = options.client_id();
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(BusShared {
            client_id: client_id.clone(),
            outbound_tx,
            subscriptions: SubscriptionTable::new(),
            connected: AtomicBool::new(false),
            state_tx,
            shutdown_tx,
        });

        info!(client_id = %client_id, "Starting MQTT session");

        tokio::spawn(run_forwarder(client, outbound_rx, shutdown_rx.clone()));
        tokio::spawn(run_event_loop(
            shared.clone(),
            event_loop,
            reconnect_config,
            on_connect,
            shutdown_rx,
        ));

        let bus = MqttBus { inner: shared };
        if let Err(e) = wait_for_connection_confirmation(state_rx, connect_timeout).await {
            error!(client_id = %client_id, error = %e, "MQTT connection failed");
            bus.abort();
            return Err(e);
        }

        Ok(bus)
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    /// Topics that have a registered callback
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.inner.subscriptions.topics()
    }

    /// Flush queued requests, send DISCONNECT and stop the session tasks.
    ///
    /// A clean disconnect does not trigger the last will.
    pub async fn disconnect(&self) -> Result<(), BusError> {
        let mut state_rx = self.inner.state_tx.subscribe();
        self.inner.enqueue(Outbound::Disconnect)?;

        let flushed = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
            loop {
                if *state_rx.borrow_and_update() == ConnectionState::Closed {
                    return;
                }
                if state_rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;

        if flushed.is_err() {
            warn!(client_id = %self.inner.client_id, "Timed out waiting for DISCONNECT to flush");
        }

        self.abort();
        info!(client_id = %self.inner.client_id, "MQTT session closed");
        Ok(())
    }

    fn abort(&self) {
        self.inner.stop_tasks();
        self.inner.set_state(ConnectionState::Closed);
    }
}

impl MessageBus for MqttBus {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: &[u8]) -> Result<(), BusError> {
        self.inner.enqueue(Outbound::Publish {
            topic: topic.to_string(),
            qos,
            retain,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    fn subscribe(&self, topic: &str, qos: QoS, callback: MessageCallback) -> Result<(), BusError> {
        self.inner.subscriptions.insert(topic, callback);
        self.inner.enqueue(Outbound::Subscribe {
            topic: topic.to_string(),
            qos,
        })
    }
}

/// Wait for connection confirmation (ConnAck) with timeout
async fn wait_for_connection_confirmation(
    mut state_rx: watch::Receiver<ConnectionState>,
    timeout: Duration,
) -> Result<(), BusError> {
    let timeout_result = tokio::time::timeout(timeout, async {
        loop {
            if state_rx.changed().await.is_err() {
                return Err(BusError::ConnectionFailed(
                    "State channel closed".to_string(),
                ));
            }
            match *state_rx.borrow() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected(ref reason) => {
                    return Err(BusError::ConnectionFailed(reason.clone()));
                }
                ConnectionState::Closed => {
                    return Err(BusError::ConnectionFailed(
                        "Session closed before connecting".to_string(),
                    ));
                }
                ConnectionState::Connecting | ConnectionState::Reconnecting(_) => continue,
            }
        }
    })
    .await;

    match timeout_result {
        Ok(result) => result,
        Err(_) => Err(BusError::ConnectionFailed(
            "ConnAck timeout - no connection confirmation received".to_string(),
        )),
    }
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}

async fn run_event_loop(
    shared: Arc<BusShared>,
    mut event_loop: EventLoop,
    reconnect_config: ReconnectConfig,
    on_connect: OnConnect,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut reconnect_attempts = 0u32;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            event_result = event_loop.poll() => {
                match event_result {
                    Ok(event) => {
                        match MessageHandler::route_mqtt_event(&event) {
                            EventRoute::ConnectionAcknowledged => {
                                reconnect_attempts = 0;
                                shared.set_state(ConnectionState::Connected);
                                info!(client_id = %shared.client_id, "MQTT connected");
                                let bus: Arc<dyn MessageBus> = Arc::new(MqttBus { inner: shared.clone() });
                                on_connect(bus);
                            }
                            EventRoute::MessageReceived { topic, payload, retain } => {
                                debug!(topic = %topic, retain, "Received MQTT message");
                                shared.subscriptions.dispatch(&topic, &payload);
                            }
                            EventRoute::Disconnected => {
                                warn!(client_id = %shared.client_id, "MQTT broker disconnected device");
                                shared.set_state(ConnectionState::Disconnected(
                                    "Disconnected by broker".to_string(),
                                ));
                            }
                            EventRoute::SubscriptionConfirmed { packet_id } => {
                                debug!(packet_id, "Subscription confirmed");
                            }
                            EventRoute::InfrastructureEvent(event_str) => {
                                debug!("MQTT event: {}", event_str);
                            }
                            EventRoute::LocalDisconnect => {
                                shared.set_state(ConnectionState::Closed);
                                break;
                            }
                            EventRoute::OutgoingEvent => {}
                        }
                    }
                    Err(e) => {
                        shared.set_state(ConnectionState::Disconnected(e.to_string()));
                        reconnect_attempts = reconnect_attempts.saturating_add(1);
                        let delay_ms = reconnect_config.calculate_backoff_delay(reconnect_attempts);
                        warn!(
                            client_id = %shared.client_id,
                            error = %e,
                            attempt = reconnect_attempts,
                            delay_ms,
                            "MQTT connection error, reconnecting"
                        );

                        if !interruptible_sleep(shutdown_rx.clone(), delay_ms).await {
                            break;
                        }
                        shared.set_state(ConnectionState::Reconnecting(reconnect_attempts));
                    }
                }
            }
        }
    }

    debug!(client_id = %shared.client_id, "MQTT event loop stopped");
}

async fn run_forwarder(
    client: AsyncClient,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            request = outbound_rx.recv() => {
                let Some(request) = request else { break };
                match request {
                    Outbound::Publish { topic, qos, retain, payload } => {
                        if let Err(e) = client.publish(topic.clone(), qos, retain, payload).await {
                            error!(topic = %topic, error = %e, "Failed to publish");
                        }
                    }
                    Outbound::Subscribe { topic, qos } => {
                        if let Err(e) = client.subscribe(topic.clone(), qos).await {
                            error!(topic = %topic, error = %e, "Failed to subscribe");
                        } else {
                            debug!(topic = %topic, "Subscribed");
                        }
                    }
                    Outbound::Disconnect => {
                        if let Err(e) = client.disconnect().await {
                            warn!(error = %e, "Failed to queue DISCONNECT");
                        }
                    }
                }
            }
        }
    }
}
