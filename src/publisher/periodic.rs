//! Timer-driven publisher shared by many producers
//!
//! A [`PeriodicPublisher`] owns one tick loop and a set of producer callbacks: one per
//! registered node plus at most one device-level callback. Every tick the device callback
//! runs first, then each node callback, all on the loop task, so two batches of the same
//! instance never overlap.
//!
//! Lifecycle: `Idle -> Running -> Closed`. [`PeriodicPublisher::start`] is idempotent and
//! [`PeriodicPublisher::close`] is terminal, idempotent and never blocks. Changing the
//! interval means building a new instance; [`PeriodicPublisher::respawn`] does the swap.
//!
//! Callbacks must not block: nothing times them out, and a stalled callback stalls every
//! producer of that instance.

use crate::device::{Device, Node};
use crate::error::{HomieError, HomieResult};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

/// Producer invoked with its node on every tick
pub type NodePublisherFn = Arc<dyn Fn(&Node) -> HomieResult<()> + Send + Sync>;

/// Producer invoked with its device on every tick
pub type DevicePublisherFn = Arc<dyn Fn(&Device) -> HomieResult<()> + Send + Sync>;

static NEXT_PUBLISHER_ID: AtomicU64 = AtomicU64::new(1);

/// Longest accepted tick interval, one year
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Lifecycle state of a publisher instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Running,
    Closed,
}

struct NodeEntry {
    node: Arc<Node>,
    callback: NodePublisherFn,
}

struct DeviceEntry {
    device: Weak<Device>,
    device_name: String,
    callback: DevicePublisherFn,
}

struct PublisherShared {
    id: u64,
    interval: Duration,
    /// Keyed by node identity
    node_publishers: RwLock<HashMap<usize, NodeEntry>>,
    device_publisher: RwLock<Option<DeviceEntry>>,
    state: Mutex<PublisherState>,
    /// Serializes `respawn` so one instance has at most one successor
    respawn_lock: Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    active_loops: AtomicUsize,
}

impl PublisherShared {
    /// Run one batch. Returns false when shutdown was observed mid-batch.
    fn invoke_publishers(&self, shutdown_rx: &watch::Receiver<bool>) -> bool {
        let device_entry = self
            .device_publisher
            .read()
            .as_ref()
            .map(|entry| (entry.device.upgrade(), entry.device_name.clone(), entry.callback.clone()));

        if let Some((device, device_name, callback)) = device_entry {
            match device {
                Some(device) => {
                    if let Err(e) = callback(&device) {
                        log_producer_error(self.id, &device_name, &e);
                    }
                }
                None => debug!(publisher = self.id, device = %device_name, "Device dropped, skipping"),
            }
        }

        let batch: Vec<(Arc<Node>, NodePublisherFn)> = self
            .node_publishers
            .read()
            .values()
            .map(|entry| (entry.node.clone(), entry.callback.clone()))
            .collect();

        for (node, callback) in batch {
            if *shutdown_rx.borrow() {
                return false;
            }
            if let Err(e) = callback(&node) {
                log_producer_error(self.id, node.name(), &e);
            }
        }
        true
    }
}

/// Ticks while the session is down are expected; anything else is worth a warning
fn log_producer_error(publisher: u64, producer: &str, error: &HomieError) {
    match error {
        HomieError::NotConnected { .. } => {
            debug!(publisher, producer = %producer, "Skipped publish while disconnected");
        }
        _ => warn!(publisher, producer = %producer, error = %error, "Producer callback failed"),
    }
}

/// Counts a live tick loop for as long as it exists
struct LoopGuard {
    shared: Weak<PublisherShared>,
}

impl LoopGuard {
    fn new(shared: &Arc<PublisherShared>) -> Self {
        shared.active_loops.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: Arc::downgrade(shared),
        }
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.active_loops.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Handle to a periodic publisher; clones share one instance
#[derive(Clone)]
pub struct PeriodicPublisher {
    inner: Arc<PublisherShared>,
}

fn node_key(node: &Node) -> usize {
    node as *const Node as usize
}

impl PeriodicPublisher {
    /// Create an idle publisher ticking every `interval`.
    ///
    /// The interval must be non-zero and at most [`MAX_INTERVAL`].
    pub fn new(interval: Duration) -> HomieResult<Self> {
        if interval.is_zero()
            || interval > MAX_INTERVAL
            || Instant::now().checked_add(interval).is_none()
        {
            return Err(HomieError::InvalidInterval(interval));
        }
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(PublisherShared {
                id: NEXT_PUBLISHER_ID.fetch_add(1, Ordering::Relaxed),
                interval,
                node_publishers: RwLock::new(HashMap::new()),
                device_publisher: RwLock::new(None),
                state: Mutex::new(PublisherState::Idle),
                respawn_lock: Mutex::new(()),
                shutdown_tx,
                active_loops: AtomicUsize::new(0),
            }),
        })
    }

    /// Publisher for the device `$stats/uptime` report at the configured stats interval
    pub fn device_stats(device: &Arc<Device>) -> HomieResult<Self> {
        let publisher = Self::new(device.config().stats_interval())?;
        publisher.set_device_publisher(device, |device| device.publish_stats())?;
        Ok(publisher)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn state(&self) -> PublisherState {
        *self.inner.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PublisherState::Running
    }

    pub fn is_closed(&self) -> bool {
        self.state() == PublisherState::Closed
    }

    /// Number of live tick loops, 0 or 1
    pub fn active_loops(&self) -> usize {
        self.inner.active_loops.load(Ordering::SeqCst)
    }

    /// True when both handles point at the same instance
    pub fn same_as(&self, other: &PeriodicPublisher) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register `callback` for `node` and bind the node's publisher slot to this instance.
    ///
    /// Registering the same node again replaces its callback.
    pub fn add_node_publisher<F>(&self, node: &Arc<Node>, callback: F) -> HomieResult<&Self>
    where
        F: Fn(&Node) -> HomieResult<()> + Send + Sync + 'static,
    {
        self.register_node(node, Arc::new(callback))?;
        Ok(self)
    }

    fn register_node(&self, node: &Arc<Node>, callback: NodePublisherFn) -> HomieResult<()> {
        let device = node.attached_device()?;
        let replaced = self
            .inner
            .node_publishers
            .write()
            .insert(
                node_key(node),
                NodeEntry {
                    node: node.clone(),
                    callback,
                },
            )
            .is_some();
        device.publishers().bind_node(node.name(), self.clone());

        debug!(publisher = self.inner.id, node = %node.name(), replaced, "Registered node publisher");
        Ok(())
    }

    /// Register the device-level callback and bind the device slot to this instance.
    ///
    /// Fails when this instance already holds a device callback, or when the device slot
    /// was bound before by any instance.
    pub fn set_device_publisher<F>(&self, device: &Arc<Device>, callback: F) -> HomieResult<&Self>
    where
        F: Fn(&Device) -> HomieResult<()> + Send + Sync + 'static,
    {
        let mut slot = self.inner.device_publisher.write();
        if let Some(existing) = slot.as_ref() {
            return Err(HomieError::DevicePublisherAlreadySet {
                device: existing.device_name.clone(),
            });
        }

        device.publishers().bind_device(device.name(), self.clone())?;
        *slot = Some(DeviceEntry {
            device: Arc::downgrade(device),
            device_name: device.name().to_string(),
            callback: Arc::new(callback),
        });

        debug!(publisher = self.inner.id, device = %device.name(), "Registered device publisher");
        Ok(self)
    }

    /// Callback registered for `node`, if any
    pub fn node_publisher(&self, node: &Node) -> Option<NodePublisherFn> {
        self.inner
            .node_publishers
            .read()
            .get(&node_key(node))
            .map(|entry| entry.callback.clone())
    }

    pub fn has_device_publisher(&self) -> bool {
        self.inner.device_publisher.read().is_some()
    }

    /// Invoke the callback for `node` once, then start the loop
    pub fn trigger_node(&self, node: &Arc<Node>) -> HomieResult<()> {
        if self.is_closed() {
            return Err(HomieError::PublisherClosed);
        }
        if let Some(callback) = self.node_publisher(node) {
            if let Err(e) = callback(node) {
                log_producer_error(self.inner.id, node.name(), &e);
            }
        }
        self.start()
    }

    /// Invoke the device callback once, then start the loop
    pub fn trigger_device(&self) -> HomieResult<()> {
        if self.is_closed() {
            return Err(HomieError::PublisherClosed);
        }
        let entry = self
            .inner
            .device_publisher
            .read()
            .as_ref()
            .map(|entry| (entry.device.upgrade(), entry.callback.clone()));

        if let Some((Some(device), callback)) = entry {
            if let Err(e) = callback(&device) {
                log_producer_error(self.inner.id, device.name(), &e);
            }
        }
        self.start()
    }

    /// Start the tick loop.
    ///
    /// A no-op when already running. A closed publisher cannot be restarted.
    pub fn start(&self) -> HomieResult<()> {
        let mut state = self.inner.state.lock();
        match *state {
            PublisherState::Running => return Ok(()),
            PublisherState::Closed => return Err(HomieError::PublisherClosed),
            PublisherState::Idle => {}
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| HomieError::NoRuntime)?;
        let guard = LoopGuard::new(&self.inner);
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let span = crate::publisher_span!(
            publisher = self.inner.id,
            interval_ms = self.inner.interval.as_millis() as u64
        );

        runtime.spawn(
            run_loop(Arc::downgrade(&self.inner), self.inner.interval, shutdown_rx, guard)
                .instrument(span),
        );
        *state = PublisherState::Running;

        info!(
            publisher = self.inner.id,
            interval_ms = self.inner.interval.as_millis() as u64,
            "Periodic publisher started"
        );
        Ok(())
    }

    /// Stop the loop for good.
    ///
    /// Never blocks; a batch already in flight may finish, but no node callback starts
    /// after the stop signal is seen. Safe to call repeatedly and concurrently.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if *state == PublisherState::Closed {
            return;
        }
        *state = PublisherState::Closed;
        self.inner.shutdown_tx.send_replace(true);
        info!(publisher = self.inner.id, "Periodic publisher closed");
    }

    /// Replace this publisher with a new one ticking every `interval`.
    ///
    /// Nodes still bound to this instance move to the new one; nodes rebound to another
    /// publisher in the meantime keep that binding. This instance is closed and the new
    /// one started. Ticks around the swap may be lost.
    ///
    /// An instance is replaced at most once: respawning a closed publisher, including one
    /// replaced by a concurrent call, returns [`HomieError::PublisherClosed`]. Device slots
    /// bind only once, so an instance holding a device callback cannot be respawned.
    pub fn respawn(&self, interval: Duration) -> HomieResult<PeriodicPublisher> {
        let _respawning = self.inner.respawn_lock.lock();
        if self.is_closed() {
            return Err(HomieError::PublisherClosed);
        }
        if let Some(entry) = self.inner.device_publisher.read().as_ref() {
            return Err(HomieError::DevicePublisherAlreadyBound {
                device: entry.device_name.clone(),
            });
        }

        let next = PeriodicPublisher::new(interval)?;
        let entries: Vec<(Arc<Node>, NodePublisherFn)> = self
            .inner
            .node_publishers
            .read()
            .values()
            .map(|entry| (entry.node.clone(), entry.callback.clone()))
            .collect();
        for (node, callback) in entries {
            let Some(device) = node.device() else {
                debug!(publisher = self.inner.id, node = %node.name(), "Node detached, not moved");
                continue;
            };
            let still_bound = device
                .node_publisher(node.name())
                .is_some_and(|bound| bound.same_as(self));
            if !still_bound {
                debug!(publisher = self.inner.id, node = %node.name(), "Node rebound elsewhere, not moved");
                continue;
            }
            next.register_node(&node, callback)?;
        }

        self.close();
        next.start()?;

        info!(
            old = self.inner.id,
            new = next.inner.id,
            interval_ms = interval.as_millis() as u64,
            "Periodic publisher replaced"
        );
        Ok(next)
    }
}

impl std::fmt::Debug for PeriodicPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicPublisher")
            .field("id", &self.inner.id)
            .field("interval", &self.inner.interval)
            .field("state", &self.state())
            .field("nodes", &self.inner.node_publishers.read().len())
            .field("device", &self.has_device_publisher())
            .finish()
    }
}

async fn run_loop(
    shared: Weak<PublisherShared>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    _guard: LoopGuard,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                let Some(shared) = shared.upgrade() else { break };
                if !shared.invoke_publishers(&shutdown_rx) {
                    break;
                }
            }
        }
    }

    debug!("Tick loop stopped");
}
