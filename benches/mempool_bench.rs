use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use floe::{Broker, BrokerConfig, PoolConfig, PublisherOptions, SegmentConfig, ServiceId};

fn bench_loan_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("ChunkPool");

    for payload_size in [64usize, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("loan_release", payload_size),
            payload_size,
            |b, &payload_size| {
                let dir = tempfile::tempdir().unwrap();
                let segment = SegmentConfig::new("bench_pool")
                    .with_pool(PoolConfig::new(4096, 64))
                    .with_file_path(dir.path().join("bench_pool.floe"));
                let broker = Broker::open(BrokerConfig::new(segment)).unwrap();
                let runtime = broker.create_runtime("bench").unwrap();
                let publisher = runtime
                    .create_publisher(
                        ServiceId::new("bench", "pool", "data"),
                        PublisherOptions::default(),
                    )
                    .unwrap();

                b.iter(|| {
                    let sample = publisher.loan(payload_size, 8).unwrap();
                    publisher.release(sample);
                });
            },
        );
    }

    group.finish();
}

fn bench_publish_take(c: &mut Criterion) {
    use floe::SubscriberOptions;

    let mut group = c.benchmark_group("PublishTake");
    group.throughput(Throughput::Elements(1));

    group.bench_function("publish_take_64b", |b| {
        let dir = tempfile::tempdir().unwrap();
        let segment = SegmentConfig::new("bench_pubsub")
            .with_pool(PoolConfig::new(64, 64))
            .with_file_path(dir.path().join("bench_pubsub.floe"));
        let broker = Broker::open(BrokerConfig::new(segment)).unwrap();
        let runtime = broker.create_runtime("bench").unwrap();
        let service = ServiceId::new("bench", "pubsub", "data");
        let publisher = runtime
            .create_publisher(service.clone(), PublisherOptions::default())
            .unwrap();
        let subscriber = runtime
            .create_subscriber(service, SubscriberOptions::default())
            .unwrap();

        b.iter(|| {
            let mut sample = publisher.loan(64, 8).unwrap();
            sample.payload_mut()[0] = 1;
            publisher.publish(sample).unwrap();
            let received = subscriber.try_take().unwrap();
            drop(received);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_loan_release, bench_publish_take);
criterion_main!(benches);
