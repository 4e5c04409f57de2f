//! Periodic publisher behavior
//!
//! Timing scenarios use generous bounds; they run on the multi-threaded runtime so the
//! tick loop is not starved by the test body.


use homie_device::device::Device;
use homie_device::error::HomieError;
use homie_device::publisher::PeriodicPublisher;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{make_test_device, test_config, wait_until};

fn counting_publisher(
    node: &Arc<homie_device::device::Node>,
    interval: Duration,
) -> (PeriodicPublisher, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();
    let publisher = PeriodicPublisher::new(interval).unwrap();
    publisher
        .add_node_publisher(node, move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    (publisher, counter)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ticks_at_interval_and_stops_after_close() {
    let (_device, node) = make_test_device();
    let (publisher, counter) = counting_publisher(&node, Duration::from_millis(8));

    publisher.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        counter.load(Ordering::SeqCst) >= 9,
        "only {} ticks",
        counter.load(Ordering::SeqCst)
    );

    publisher.close();
    // at most one in-flight batch may still complete
    tokio::time::sleep(Duration::from_millis(8)).await;
    let at_close = counter.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::SeqCst), at_close);
    assert!(wait_until(|| publisher.active_loops() == 0, Duration::from_secs(1)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_is_idempotent() {
    let (_device, node) = make_test_device();
    let (publisher, counter) = counting_publisher(&node, Duration::from_millis(20));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.start() })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(publisher.is_running());
    assert_eq!(publisher.active_loops(), 1);

    tokio::time::sleep(Duration::from_millis(110)).await;
    // a second loop would roughly double the count
    assert!(counter.load(Ordering::SeqCst) <= 7);
    publisher.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readding_node_replaces_callback() {
    let (_device, node) = make_test_device();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let publisher = PeriodicPublisher::new(Duration::from_millis(10)).unwrap();
    let first_clone = first.clone();
    publisher
        .add_node_publisher(&node, move |_| {
            first_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    let second_clone = second.clone();
    publisher
        .add_node_publisher(&node, move |_| {
            second_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    publisher.start().unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    publisher.close();

    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert!(second.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_replacing_publisher_for_same_node() {
    let (device, node) = make_test_device();
    let (a, a_counter) = counting_publisher(&node, Duration::from_millis(8));
    a.start().unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    let (b, b_counter) = counting_publisher(&node, Duration::from_millis(8));
    a.close();
    b.start().unwrap();

    tokio::time::sleep(Duration::from_millis(8)).await;
    let a_at_close = a_counter.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(a_counter.load(Ordering::SeqCst), a_at_close);
    assert!(b_counter.load(Ordering::SeqCst) >= 3);
    assert!(device.node_publisher("n1").unwrap().same_as(&b));
    b.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_respawn_moves_node_callbacks() {
    let (device, node) = make_test_device();
    let (old, counter) = counting_publisher(&node, Duration::from_secs(3600));
    old.start().unwrap();

    let new = old.respawn(Duration::from_millis(5)).unwrap();
    assert!(old.is_closed());
    assert!(new.is_running());
    assert_eq!(new.interval(), Duration::from_millis(5));
    assert!(device.node_publisher("n1").unwrap().same_as(&new));

    assert!(wait_until(|| counter.load(Ordering::SeqCst) >= 3, Duration::from_secs(2)).await);
    new.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_respawn_yields_one_successor() {
    let (device, node) = make_test_device();
    let (old, _counter) = counting_publisher(&node, Duration::from_secs(3600));
    old.start().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let old = old.clone();
            tokio::spawn(async move { old.respawn(Duration::from_millis(100 + i)) })
        })
        .collect();

    let mut successors = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(next) => successors.push(next),
            Err(e) => assert!(matches!(e, HomieError::PublisherClosed)),
        }
    }

    assert_eq!(successors.len(), 1);
    let next = &successors[0];
    assert!(old.is_closed());
    assert!(next.is_running());
    assert!(device.node_publisher("n1").unwrap().same_as(next));
    next.close();
}

#[test]
fn test_device_publisher_binds_once_per_device() {
    let device = Device::from_config(test_config());
    let first = PeriodicPublisher::new(Duration::from_secs(1)).unwrap();
    first.set_device_publisher(&device, |d| d.publish_stats()).unwrap();

    let second = PeriodicPublisher::new(Duration::from_secs(1)).unwrap();
    let err = second
        .set_device_publisher(&device, |d| d.publish_stats())
        .unwrap_err();
    assert!(matches!(err, HomieError::DevicePublisherAlreadyBound { .. }));
    assert!(err.is_configuration_error());

    let err = first
        .set_device_publisher(&device, |d| d.publish_stats())
        .unwrap_err();
    assert!(matches!(err, HomieError::DevicePublisherAlreadySet { .. }));
}

#[tokio::test]
async fn test_concurrent_close_is_safe() {
    let publisher = PeriodicPublisher::new(Duration::from_millis(5)).unwrap();
    publisher.start().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let publisher = publisher.clone();
            std::thread::spawn(move || publisher.close())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(publisher.is_closed());
    assert!(!publisher.is_running());
    assert!(wait_until(|| publisher.active_loops() == 0, Duration::from_secs(1)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_does_not_block_on_slow_callback() {
    let (_device, node) = make_test_device();
    let publisher = PeriodicPublisher::new(Duration::from_millis(2)).unwrap();
    publisher
        .add_node_publisher(&node, |_| {
            std::thread::sleep(Duration::from_millis(50));
            Ok(())
        })
        .unwrap();
    publisher.start().unwrap();
    // let the loop enter the slow callback
    tokio::time::sleep(Duration::from_millis(10)).await;

    let started = std::time::Instant::now();
    publisher.close();
    assert!(started.elapsed() < Duration::from_millis(20));
    assert!(wait_until(|| publisher.active_loops() == 0, Duration::from_secs(1)).await);
}
