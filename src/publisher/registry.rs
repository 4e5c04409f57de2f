//! Registration table binding nodes and devices to publishers
//!
//! Owned by the device, so entities never hold closures that point back at a publisher.

use super::periodic::PeriodicPublisher;
use crate::error::{HomieError, HomieResult};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub(crate) struct PublisherRegistry {
    nodes: Mutex<HashMap<String, PeriodicPublisher>>,
    device: Mutex<Option<PeriodicPublisher>>,
}

impl PublisherRegistry {
    /// Bind `node` to `publisher`, returning the previous binding
    pub(crate) fn bind_node(&self, node: &str, publisher: PeriodicPublisher) -> Option<PeriodicPublisher> {
        self.nodes.lock().insert(node.to_string(), publisher)
    }

    pub(crate) fn node(&self, node: &str) -> Option<PeriodicPublisher> {
        self.nodes.lock().get(node).cloned()
    }

    /// Bind the device slot; it can be bound only once
    pub(crate) fn bind_device(&self, device: &str, publisher: PeriodicPublisher) -> HomieResult<()> {
        let mut slot = self.device.lock();
        if slot.is_some() {
            return Err(HomieError::DevicePublisherAlreadyBound {
                device: device.to_string(),
            });
        }
        *slot = Some(publisher);
        Ok(())
    }

    pub(crate) fn device(&self) -> Option<PeriodicPublisher> {
        self.device.lock().clone()
    }

    /// Every distinct bound publisher
    pub(crate) fn all(&self) -> Vec<PeriodicPublisher> {
        let mut publishers: Vec<PeriodicPublisher> = Vec::new();
        let bound = self
            .nodes
            .lock()
            .values()
            .cloned()
            .chain(self.device.lock().clone())
            .collect::<Vec<_>>();
        for publisher in bound {
            if !publishers.iter().any(|known| known.same_as(&publisher)) {
                publishers.push(publisher);
            }
        }
        publishers
    }
}
