//! Crash recovery and registration handshake tests

use std::time::Duration;

use floe::{
    Broker, BrokerConfig, FloeError, PoolConfig, PublisherOptions, Runtime, SegmentConfig,
    ServiceId, SubscriberOptions,
};

fn crash_test_broker(dir: &tempfile::TempDir) -> Broker {
    let segment = SegmentConfig::new("lifecycle_test")
        .with_pool(PoolConfig::new(128, 4))
        .with_file_path(dir.path().join("lifecycle_test.floe"));
    let config = BrokerConfig::new(segment)
        .with_keep_alive_interval(Duration::from_millis(10))
        .with_dead_interval(Duration::from_millis(20));
    Broker::open(config).expect("broker must open")
}

fn service() -> ServiceId {
    ServiceId::new("lidar", "roof", "points")
}

#[test]
fn test_dead_publisher_is_reclaimed_and_subscriber_keeps_its_sample() {
    let dir = tempfile::tempdir().unwrap();
    let broker = crash_test_broker(&dir);

    let publisher_runtime = broker.create_runtime("pub_proc").unwrap();
    let subscriber_runtime = broker.create_runtime("sub_proc").unwrap();

    let publisher = publisher_runtime
        .create_publisher(service(), PublisherOptions::default())
        .unwrap();
    let subscriber = subscriber_runtime
        .create_subscriber(
            service(),
            SubscriberOptions::default().with_queue_capacity(4),
        )
        .unwrap();

    // One delivered sample, one loan the dying process never returns.
    let mut sample = publisher.loan(4, 4).unwrap();
    sample.write_payload(&7u32.to_le_bytes());
    publisher.publish(sample).unwrap();
    let leaked_loan = publisher.loan(4, 4).unwrap();

    assert_eq!(broker.pool_stats()[0].free_blocks, 2);

    // Simulate the publisher process dying mid-flight: its handles vanish
    // without any release, its keep-alive stops.
    std::mem::forget(leaked_loan);
    std::mem::forget(publisher);
    std::mem::forget(publisher_runtime);

    std::thread::sleep(Duration::from_millis(40));
    subscriber_runtime.keep_alive().unwrap();
    let reclaimed = broker.monitor().scan_once();
    assert_eq!(reclaimed, 1);

    // The leaked loan went back to its pool; the delivered sample did not.
    assert_eq!(broker.pool_stats()[0].free_blocks, 3);

    // The survivor still takes and releases its sample normally.
    let taken = subscriber.try_take().expect("sample must still be queued");
    assert_eq!(taken.payload(), &7u32.to_le_bytes());
    subscriber.release(taken);

    drop(subscriber);
    assert!(broker.pools().is_fully_free());
}

#[test]
fn test_dead_subscriber_queue_is_drained() {
    let dir = tempfile::tempdir().unwrap();
    let broker = crash_test_broker(&dir);

    let publisher_runtime = broker.create_runtime("pub_proc").unwrap();
    let subscriber_runtime = broker.create_runtime("sub_proc").unwrap();

    let publisher = publisher_runtime
        .create_publisher(service(), PublisherOptions::default())
        .unwrap();
    let subscriber = subscriber_runtime
        .create_subscriber(
            service(),
            SubscriberOptions::default().with_queue_capacity(4),
        )
        .unwrap();

    for value in 0..3u32 {
        let mut sample = publisher.loan(4, 4).unwrap();
        sample.write_payload(&value.to_le_bytes());
        publisher.publish(sample).unwrap();
    }
    assert_eq!(broker.pool_stats()[0].free_blocks, 1);

    std::mem::forget(subscriber);
    std::mem::forget(subscriber_runtime);

    std::thread::sleep(Duration::from_millis(40));
    publisher_runtime.keep_alive().unwrap();
    assert_eq!(broker.monitor().scan_once(), 1);

    // The undelivered references went back to the pool.
    assert!(broker.pools().is_fully_free());

    // The surviving publisher keeps working.
    assert!(publisher.loan(4, 4).is_ok());
}

#[test]
fn test_graceful_offboard_releases_everything() {
    let dir = tempfile::tempdir().unwrap();
    let broker = crash_test_broker(&dir);

    let runtime = broker.create_runtime("app").unwrap();
    let publisher = runtime
        .create_publisher(service(), PublisherOptions::default().with_history_capacity(2))
        .unwrap();

    for value in 0..2u32 {
        let mut sample = publisher.loan(4, 4).unwrap();
        sample.write_payload(&value.to_le_bytes());
        publisher.publish(sample).unwrap();
    }
    assert_eq!(broker.pool_stats()[0].free_blocks, 2);

    drop(publisher);
    runtime.offboard();
    assert!(broker.pools().is_fully_free());

    // The liveness slot is reusable right away.
    assert!(broker.create_runtime("next_app").is_ok());
}

#[test]
fn test_socket_registration_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("broker.sock");

    let segment = SegmentConfig::new("handshake_test")
        .with_pool(PoolConfig::new(128, 4))
        .with_file_path(dir.path().join("handshake_test.floe"));
    let config = BrokerConfig::new(segment).with_socket_path(&socket_path);
    let mut broker = Broker::open(config).unwrap();
    broker.start_registration_server().unwrap();

    let mut runtime = Runtime::builder("remote_proc")
        .socket_path(&socket_path)
        .timeout(Duration::from_secs(2))
        .register()
        .expect("handshake must succeed");

    // The mapped segment matches the broker's.
    assert_eq!(runtime.segment().size(), broker.pools().segment().size());
    assert_eq!(runtime.pool_stats(), broker.pool_stats());

    runtime.keep_alive().unwrap();
    runtime.spawn_keep_alive();

    // Port creation needs the in-process broker attachment.
    assert!(matches!(
        runtime.create_publisher(service(), PublisherOptions::default()),
        Err(FloeError::Platform { .. })
    ));

    let second = Runtime::builder("other_proc")
        .socket_path(&socket_path)
        .timeout(Duration::from_secs(2))
        .register()
        .unwrap();
    assert_ne!(runtime.id(), second.id());

    runtime.offboard();
    second.offboard();
}

#[test]
fn test_registration_times_out_against_a_dead_socket() {
    let dir = tempfile::tempdir().unwrap();

    let result = Runtime::builder("impatient")
        .socket_path(dir.path().join("nobody-home.sock"))
        .timeout(Duration::from_millis(50))
        .register();

    assert!(matches!(result, Err(FloeError::RegistrationTimeout { .. })));
}
