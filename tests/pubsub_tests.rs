//! End-to-end publish/subscribe scenarios over one broker

use std::sync::Arc;
use std::time::Duration;

use floe::{
    Broker, BrokerConfig, FloeError, PoolConfig, PublisherOptions, QueueFullPolicy, SegmentConfig,
    ServiceId, SubscriberOptions,
};

fn broker_with_pool(dir: &tempfile::TempDir, block_size: u32, block_count: u32) -> Broker {
    let segment = SegmentConfig::new("pubsub_test")
        .with_pool(PoolConfig::new(block_size, block_count))
        .with_file_path(dir.path().join("pubsub_test.floe"));
    Broker::open(BrokerConfig::new(segment)).expect("broker must open")
}

fn service() -> ServiceId {
    ServiceId::new("sensor", "front", "frames")
}

fn publish_u32(publisher: &floe::PublisherPort, value: u32) {
    let mut sample = publisher.loan(4, 4).expect("loan must succeed");
    sample.write_payload(&value.to_le_bytes());
    publisher.publish(sample).expect("publish must succeed");
}

fn take_u32(subscriber: &floe::SubscriberPort) -> Option<u32> {
    subscriber.try_take().map(|sample| {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(sample.payload());
        u32::from_le_bytes(bytes)
    })
}

#[test]
fn test_discard_oldest_keeps_latest_samples() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pool(&dir, 128, 4);
    let runtime = broker.create_runtime("app").unwrap();

    let publisher = runtime
        .create_publisher(service(), PublisherOptions::default())
        .unwrap();
    let subscriber = runtime
        .create_subscriber(
            service(),
            SubscriberOptions::default()
                .with_queue_capacity(2)
                .with_queue_full_policy(QueueFullPolicy::DiscardOldest),
        )
        .unwrap();

    for value in 1..=4 {
        publish_u32(&publisher, value);
    }

    assert_eq!(take_u32(&subscriber), Some(3));
    assert_eq!(take_u32(&subscriber), Some(4));
    assert_eq!(take_u32(&subscriber), None);
    assert!(subscriber.has_lost_samples());

    assert!(broker.pools().is_fully_free());
}

#[test]
fn test_late_joiner_receives_history_before_fresh_samples() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pool(&dir, 128, 8);
    let runtime = broker.create_runtime("app").unwrap();

    let publisher = runtime
        .create_publisher(
            service(),
            PublisherOptions::default().with_history_capacity(3),
        )
        .unwrap();
    let first = runtime
        .create_subscriber(service(), SubscriberOptions::default())
        .unwrap();
    let second = runtime
        .create_subscriber(service(), SubscriberOptions::default())
        .unwrap();

    for value in 1..=4 {
        publish_u32(&publisher, value);
    }

    let third = runtime
        .create_subscriber(
            service(),
            SubscriberOptions::default().with_history_request(2),
        )
        .unwrap();
    publish_u32(&publisher, 5);

    // The late joiner sees the latest two history samples, then the fresh one.
    assert_eq!(take_u32(&third), Some(3));
    assert_eq!(take_u32(&third), Some(4));
    assert_eq!(take_u32(&third), Some(5));
    assert_eq!(take_u32(&third), None);

    // Early subscribers got everything live.
    for expected in 1..=5 {
        assert_eq!(take_u32(&first), Some(expected));
        assert_eq!(take_u32(&second), Some(expected));
    }
}

#[test]
fn test_per_publisher_order_is_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pool(&dir, 64, 16);
    let runtime = broker.create_runtime("app").unwrap();

    let publisher = runtime
        .create_publisher(service(), PublisherOptions::default())
        .unwrap();
    let subscriber = runtime
        .create_subscriber(
            service(),
            SubscriberOptions::default().with_queue_capacity(16),
        )
        .unwrap();

    for value in 0..10 {
        publish_u32(&publisher, value);
    }

    let mut last_sequence = None;
    for expected in 0..10 {
        let sample = subscriber.try_take().expect("sample must be queued");
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(sample.payload());
        assert_eq!(u32::from_le_bytes(bytes), expected);
        assert_eq!(sample.origin_id(), publisher.id());

        if let Some(last) = last_sequence {
            assert!(sample.sequence_number() > last);
        }
        last_sequence = Some(sample.sequence_number());
    }
}

#[test]
fn test_stop_offer_rejects_loans_until_reoffered() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pool(&dir, 64, 4);
    let runtime = broker.create_runtime("app").unwrap();

    let publisher = runtime
        .create_publisher(service(), PublisherOptions::default())
        .unwrap();
    assert!(publisher.is_offered());

    publisher.stop_offer();
    assert!(!publisher.is_offered());
    assert!(matches!(
        publisher.loan(16, 8),
        Err(FloeError::PortStopped { .. })
    ));

    publisher.offer();
    assert!(publisher.loan(16, 8).is_ok());
}

#[test]
fn test_subscriber_created_before_offer_gets_attached_on_offer() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pool(&dir, 64, 4);
    let runtime = broker.create_runtime("app").unwrap();

    let subscriber = runtime
        .create_subscriber(service(), SubscriberOptions::default())
        .unwrap();
    let publisher = runtime
        .create_publisher(
            service(),
            PublisherOptions::default().with_offer_on_create(false),
        )
        .unwrap();
    assert!(!publisher.has_subscribers());

    publisher.offer();
    assert!(publisher.has_subscribers());

    publish_u32(&publisher, 11);
    assert_eq!(take_u32(&subscriber), Some(11));
}

#[test]
fn test_unsubscribed_queue_keeps_taken_samples_valid() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pool(&dir, 64, 4);
    let runtime = broker.create_runtime("app").unwrap();

    let publisher = runtime
        .create_publisher(service(), PublisherOptions::default())
        .unwrap();
    let subscriber = runtime
        .create_subscriber(service(), SubscriberOptions::default())
        .unwrap();

    publish_u32(&publisher, 21);
    publish_u32(&publisher, 22);
    subscriber.unsubscribe();

    // Already-delivered samples stay takeable after detach.
    assert_eq!(take_u32(&subscriber), Some(21));
    assert_eq!(take_u32(&subscriber), Some(22));

    // New publishes no longer arrive.
    publish_u32(&publisher, 23);
    assert_eq!(take_u32(&subscriber), None);
}

#[test]
fn test_subscribe_shrink_drops_oldest_and_flags_loss() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pool(&dir, 64, 8);
    let runtime = broker.create_runtime("app").unwrap();

    let publisher = runtime
        .create_publisher(service(), PublisherOptions::default())
        .unwrap();
    let subscriber = runtime
        .create_subscriber(
            service(),
            SubscriberOptions::default().with_queue_capacity(4),
        )
        .unwrap();

    for value in 1..=4 {
        publish_u32(&publisher, value);
    }
    assert!(!subscriber.has_lost_samples());

    // Shrinking below the fill level discards the oldest samples.
    subscriber.subscribe(2, 0).unwrap();
    assert!(subscriber.has_lost_samples());
    assert_eq!(take_u32(&subscriber), Some(3));
    assert_eq!(take_u32(&subscriber), Some(4));
    assert_eq!(take_u32(&subscriber), None);
}

#[test]
fn test_block_producer_waits_for_queue_space() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pool(&dir, 64, 8);
    let runtime = broker.create_runtime("app").unwrap();

    let publisher = runtime
        .create_publisher(service(), PublisherOptions::default())
        .unwrap();
    let subscriber = runtime
        .create_subscriber(
            service(),
            SubscriberOptions::default()
                .with_queue_capacity(1)
                .with_queue_full_policy(QueueFullPolicy::BlockProducer),
        )
        .unwrap();

    publish_u32(&publisher, 1);

    let blocked = {
        let publisher = Arc::clone(&publisher);
        std::thread::spawn(move || {
            publish_u32(&publisher, 2);
        })
    };

    // Give the publisher time to hit the full queue, then drain one slot.
    std::thread::sleep(Duration::from_millis(50));
    assert!(!blocked.is_finished());
    assert_eq!(take_u32(&subscriber), Some(1));

    blocked.join().unwrap();
    assert_eq!(take_u32(&subscriber), Some(2));
    assert!(!subscriber.has_lost_samples());
}

#[test]
fn test_stop_offer_cancels_a_blocked_publish() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pool(&dir, 64, 8);
    let runtime = broker.create_runtime("app").unwrap();

    let publisher = runtime
        .create_publisher(service(), PublisherOptions::default())
        .unwrap();
    let subscriber = runtime
        .create_subscriber(
            service(),
            SubscriberOptions::default()
                .with_queue_capacity(1)
                .with_queue_full_policy(QueueFullPolicy::BlockProducer),
        )
        .unwrap();

    publish_u32(&publisher, 1);

    let blocked = {
        let publisher = Arc::clone(&publisher);
        std::thread::spawn(move || {
            let mut sample = publisher.loan(4, 4).unwrap();
            sample.write_payload(&2u32.to_le_bytes());
            // The queue stays full; only the cancellation lets this return.
            let _ = publisher.publish(sample);
        })
    };

    std::thread::sleep(Duration::from_millis(50));
    assert!(!blocked.is_finished());
    publisher.stop_offer();
    blocked.join().unwrap();

    assert_eq!(take_u32(&subscriber), Some(1));
    assert_eq!(take_u32(&subscriber), None);
    drop(subscriber);
    assert!(broker.pools().is_fully_free());
}

#[test]
fn test_two_publishers_fan_into_one_subscriber() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pool(&dir, 64, 16);
    let runtime = broker.create_runtime("app").unwrap();

    let left = runtime
        .create_publisher(service(), PublisherOptions::default())
        .unwrap();
    let right = runtime
        .create_publisher(service(), PublisherOptions::default())
        .unwrap();
    let subscriber = runtime
        .create_subscriber(
            service(),
            SubscriberOptions::default().with_queue_capacity(8),
        )
        .unwrap();

    publish_u32(&left, 100);
    publish_u32(&right, 200);
    publish_u32(&left, 101);

    let mut left_values = Vec::new();
    let mut right_values = Vec::new();
    while let Some(sample) = subscriber.try_take() {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(sample.payload());
        let value = u32::from_le_bytes(bytes);
        if sample.origin_id() == left.id() {
            left_values.push(value);
        } else {
            assert_eq!(sample.origin_id(), right.id());
            right_values.push(value);
        }
    }

    // Per-publisher order holds even when streams interleave.
    assert_eq!(left_values, vec![100, 101]);
    assert_eq!(right_values, vec![200]);
}
