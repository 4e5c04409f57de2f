//! Device statistics and host discovery

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::{Duration, Instant};
use tracing::debug;

/// Startup and connection timestamps of a device
#[derive(Debug)]
pub struct DeviceStats {
    startup_time: DateTime<Utc>,
    started: Instant,
    connect_time: RwLock<Option<DateTime<Utc>>>,
}

impl DeviceStats {
    pub(crate) fn new() -> Self {
        Self {
            startup_time: Utc::now(),
            started: Instant::now(),
            connect_time: RwLock::new(None),
        }
    }

    pub fn startup_time(&self) -> DateTime<Utc> {
        self.startup_time
    }

    /// Time of the most recent successful connection
    pub fn connect_time(&self) -> Option<DateTime<Utc>> {
        *self.connect_time.read()
    }

    pub(crate) fn mark_connected(&self) {
        *self.connect_time.write() = Some(Utc::now());
    }

    /// Monotonic time since the device was created
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Address of the interface used for outbound traffic.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
pub(crate) fn outbound_ip() -> IpAddr {
    let discovered = UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip());

    match discovered {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            debug!(error = %e, "Could not determine outbound address, using loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_time_recorded() {
        let stats = DeviceStats::new();
        assert!(stats.connect_time().is_none());

        stats.mark_connected();
        let connected = stats.connect_time().unwrap();
        assert!(connected >= stats.startup_time());
    }

    #[test]
    fn test_outbound_ip_never_unspecified() {
        assert!(!outbound_ip().is_unspecified());
    }
}
