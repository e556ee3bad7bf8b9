//! Tests for chunk pools, size-class selection and the chunk lifecycle

use floe::{Broker, BrokerConfig, FloeError, PoolConfig, PublisherOptions, SegmentConfig, ServiceId};

fn broker_with_pools(dir: &tempfile::TempDir, pools: &[(u32, u32)]) -> Broker {
    let mut segment = SegmentConfig::new("mempool_test")
        .with_file_path(dir.path().join("mempool_test.floe"));
    for &(size, count) in pools {
        segment = segment.with_pool(PoolConfig::new(size, count));
    }
    Broker::open(BrokerConfig::new(segment)).expect("broker must open")
}

fn test_service() -> ServiceId {
    ServiceId::new("test", "pool", "data")
}

#[test]
fn test_loan_selects_smallest_fitting_pool() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pools(&dir, &[(128, 4), (256, 2)]);
    let runtime = broker.create_runtime("selector").unwrap();
    let publisher = runtime
        .create_publisher(test_service(), PublisherOptions::default())
        .unwrap();

    // 200 bytes exceed the 128-pool; the 256-pool must serve it.
    let sample = publisher.loan(200, 8).unwrap();
    assert_eq!(sample.header().user_payload_size(), 200);
    assert_eq!(sample.header().pool_id(), 1);

    let stats = broker.pool_stats();
    assert_eq!(stats[0].free_blocks, 4);
    assert_eq!(stats[1].free_blocks, 1);
}

#[test]
fn test_loan_rejects_oversize_requests() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pools(&dir, &[(128, 4), (256, 2)]);
    let runtime = broker.create_runtime("oversize").unwrap();
    let publisher = runtime
        .create_publisher(test_service(), PublisherOptions::default())
        .unwrap();

    match publisher.loan(512, 8) {
        Err(FloeError::OversizeRequest { requested, max }) => {
            assert_eq!(requested, 512);
            assert_eq!(max, 256);
        }
        other => panic!("expected OversizeRequest, got {:?}", other),
    }
}

#[test]
fn test_exhausted_pool_never_falls_back_to_a_larger_one() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pools(&dir, &[(128, 2), (256, 2)]);
    let runtime = broker.create_runtime("exhaust").unwrap();
    let publisher = runtime
        .create_publisher(test_service(), PublisherOptions::default())
        .unwrap();

    let _a = publisher.loan(100, 8).unwrap();
    let _b = publisher.loan(100, 8).unwrap();

    // The 128-pool is empty; the free 256-pool must not be borrowed from.
    match publisher.loan(100, 8) {
        Err(FloeError::Exhausted { .. }) => {}
        other => panic!("expected Exhausted, got {:?}", other),
    }
    assert_eq!(broker.pool_stats()[1].free_blocks, 2);
}

#[test]
fn test_loan_release_restores_free_count() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pools(&dir, &[(128, 4)]);
    let runtime = broker.create_runtime("roundtrip").unwrap();
    let publisher = runtime
        .create_publisher(test_service(), PublisherOptions::default())
        .unwrap();

    let before = broker.pool_stats()[0].free_blocks;
    let sample = publisher.loan(64, 8).unwrap();
    assert_eq!(broker.pool_stats()[0].free_blocks, before - 1);

    publisher.release(sample);
    assert_eq!(broker.pool_stats()[0].free_blocks, before);
    assert!(broker.pools().is_fully_free());
}

#[test]
fn test_payload_is_writable_and_aligned() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pools(&dir, &[(128, 4)]);
    let runtime = broker.create_runtime("payload").unwrap();
    let publisher = runtime
        .create_publisher(test_service(), PublisherOptions::default())
        .unwrap();

    let mut sample = publisher.loan(64, 32).unwrap();
    assert_eq!(sample.payload().len(), 64);
    assert_eq!(sample.payload().as_ptr() as usize % 32, 0);

    sample.payload_mut().fill(0xAB);
    assert!(sample.payload().iter().all(|&b| b == 0xAB));
}

#[test]
fn test_every_block_is_free_or_loaned() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pools(&dir, &[(128, 4)]);
    let runtime = broker.create_runtime("accounting").unwrap();
    let publisher = runtime
        .create_publisher(test_service(), PublisherOptions::default())
        .unwrap();

    let mut loans = Vec::new();
    for expected_free in (0..4).rev() {
        loans.push(publisher.loan(32, 8).unwrap());
        let stats = broker.pool_stats()[0];
        assert_eq!(stats.free_blocks + loans.len() as u32, stats.block_count);
        assert_eq!(stats.free_blocks, expected_free);
    }

    loans.clear();
    assert!(broker.pools().is_fully_free());
}

#[test]
fn test_chunk_header_carries_origin_identity() {
    let dir = tempfile::tempdir().unwrap();
    let broker = broker_with_pools(&dir, &[(128, 4)]);
    let runtime = broker.create_runtime("identity").unwrap();
    let publisher = runtime
        .create_publisher(test_service(), PublisherOptions::default())
        .unwrap();

    let sample = publisher.loan(16, 8).unwrap();
    assert_eq!(sample.header().origin_id(), publisher.id());
    assert_eq!(sample.header().version(), floe::mempool::CHUNK_HEADER_VERSION);
    assert_eq!(sample.header().reference_count(), 1);
}
