//! Startup behavior when the broker is unavailable
//!
//! A failed first connection is fatal: `connect` returns an error within the
//! configured timeout instead of retrying forever.


use homie_device::device::Device;
use homie_device::error::HomieError;
use homie_device::transport::BusError;
use std::time::{Duration, Instant};
use test_helpers::test_config;

#[tokio::test]
async fn test_connect_fails_when_broker_unavailable() {
    let mut config = test_config();
    config.mqtt.host = "127.0.0.1".to_string();
    config.mqtt.port = 1;
    config.mqtt.connect_timeout_secs = 2;
    let device = Device::from_config(config);

    let start = Instant::now();
    let result = device.connect().await;

    assert!(matches!(
        result,
        Err(HomieError::Bus(BusError::ConnectionFailed(_)))
    ));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!device.is_connected());
}

#[tokio::test]
async fn test_disconnect_without_session_is_harmless() {
    let device = Device::from_config(test_config());
    device.disconnect().await.unwrap();
    assert!(!device.is_connected());
}
