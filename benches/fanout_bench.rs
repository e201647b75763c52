use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::{sync::Arc, thread, time::Duration};
use trieste::nexus::{Nexus, NexusDef, QueueEvent, Tray};

const BATCH: usize = 256;

fn nexus(def: NexusDef) -> Arc<Nexus> {
    Arc::new(Nexus::new("bench", "writer", def, BATCH * 2, Duration::from_secs(5)))
}

fn benchmark_broadcast_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("Nexus_Broadcast");
    group.throughput(Throughput::Elements(BATCH as u64));

    for readers in [1usize, 2, 4, 8].iter() {
        group.bench_with_input(
            BenchmarkId::new("write_drain", readers),
            readers,
            |b, &readers| {
                let nx = nexus(NexusDef::new("out"));
                let event = Arc::new(QueueEvent::new().unwrap());
                let mut rdrs: Vec<_> = (0..readers)
                    .map(|i| nx.attach_reader(&format!("r{}", i), &event))
                    .collect();
                let mut writer = nx.attach_writer("writer");
                let tray = Tray::new(vec![0u8; 64]).into_shared();

                b.iter(|| {
                    for _ in 0..BATCH {
                        writer.write(tray.clone()).unwrap();
                    }
                    for r in rdrs.iter_mut() {
                        assert_eq!(r.drain().len(), BATCH);
                    }
                });
            },
        );
    }

    group.finish();
}

fn benchmark_unicast(c: &mut Criterion) {
    let mut group = c.benchmark_group("Nexus_Unicast");
    group.throughput(Throughput::Elements(BATCH as u64));

    group.bench_function("round_robin_4", |b| {
        let nx = nexus(NexusDef::new("out").unicast());
        let event = Arc::new(QueueEvent::new().unwrap());
        let mut rdrs: Vec<_> = (0..4)
            .map(|i| nx.attach_reader(&format!("r{}", i), &event))
            .collect();
        let mut writer = nx.attach_writer("writer");
        let tray = Tray::new(vec![0u8; 64]).into_shared();

        b.iter(|| {
            for _ in 0..BATCH {
                writer.write(tray.clone()).unwrap();
            }
            let total: usize = rdrs.iter_mut().map(|r| r.drain().len()).sum();
            assert_eq!(total, BATCH);
        });
    });

    group.finish();
}

fn benchmark_cross_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("Nexus_CrossThread");
    group.throughput(Throughput::Elements(BATCH as u64));

    group.bench_function("writer_to_reader", |b| {
        b.iter(|| {
            let nx = nexus(NexusDef::new("out"));
            let event = Arc::new(QueueEvent::new().unwrap());
            let mut reader = nx.attach_reader("reader", &event);
            let mut writer = nx.attach_writer("writer");

            let consumer = thread::spawn(move || {
                let mut got = 0;
                while got < BATCH {
                    if reader.read_timeout(Duration::from_millis(100)).is_some() {
                        got += 1;
                    }
                }
            });
            for i in 0..BATCH {
                writer.write(Tray::new(vec![i as u8]).into_shared()).unwrap();
            }
            consumer.join().unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_broadcast_fanout,
    benchmark_unicast,
    benchmark_cross_thread
);
criterion_main!(benches);
