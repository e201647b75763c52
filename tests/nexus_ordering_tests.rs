//! Nexus delivery tests
//! Global ordering across readers, concurrent writers and reader detach

use std::{
    sync::{Arc, Barrier},
    thread,
    time::{Duration, Instant},
};

use trieste::{App, AppConfig, NexusDef, NexusReader, QueueEvent, Tray, TriesteError};

fn read_all(reader: &mut NexusReader, count: usize) -> Vec<(u32, u64)> {
    let mut out = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while out.len() < count && Instant::now() < deadline {
        if let Some(d) = reader.read_timeout(Duration::from_millis(50)) {
            out.push((d.id, d.tray.decode::<u64>().unwrap()));
        }
    }
    out
}

fn ids(reader: &mut NexusReader) -> Vec<u32> {
    reader.drain().into_iter().map(|d| d.id).collect()
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[cfg(test)]
mod nexus_ordering_tests {
    use super::*;

    #[test]
    fn test_two_readers_same_order() {
        let app = App::create_with_config("nx_two_readers", AppConfig::new().with_timeout_secs(5))
            .unwrap();
        let a = app.make_triead("A").unwrap();
        let r1 = app.make_triead("R1").unwrap();
        let r2 = app.make_triead("R2").unwrap();

        a.export_nexus(NexusDef::new("N")).unwrap();
        a.mark_constructed().unwrap();
        let mut in1 = r1.import_reader("A", "N", false).unwrap();
        let mut in2 = r2.import_reader("A", "N", false).unwrap();
        let mut out = a.import_writer("A", "N", false).unwrap();
        for o in [&a, &r1, &r2] {
            o.mark_ready().unwrap();
        }

        for p in ["A", "B", "C"] {
            out.write(Tray::from(p).into_shared()).unwrap();
        }
        for reader in [&mut in1, &mut in2] {
            let got: Vec<_> = reader
                .drain()
                .into_iter()
                .map(|d| String::from_utf8(d.tray.payload().to_vec()).unwrap())
                .collect();
            assert_eq!(got, vec!["A", "B", "C"]);
        }
        drop((in1, in2, out, a, r1, r2));
        App::drop_app(&app);
    }

    #[test]
    fn test_concurrent_writers_one_order() {
        init_logging();
        const WRITERS: usize = 4;
        const PER_WRITER: u64 = 500;
        let total = WRITERS * PER_WRITER as usize;

        let app = App::create_with_config(
            "nx_concurrent",
            AppConfig::new().with_timeout_secs(5).with_queue_limit(64),
        )
        .unwrap();
        let owner = app.make_triead("hub").unwrap();
        owner.export_nexus(NexusDef::new("N")).unwrap();
        owner.mark_constructed().unwrap();

        let readers: Vec<_> = (0..3)
            .map(|_| owner.import_reader("hub", "N", false).unwrap())
            .collect();
        let writers: Vec<_> = (0..WRITERS)
            .map(|_| owner.import_writer("hub", "N", false).unwrap())
            .collect();
        owner.mark_ready().unwrap();

        let barrier = Arc::new(Barrier::new(WRITERS));
        let handles: Vec<_> = writers
            .into_iter()
            .enumerate()
            .map(|(w, mut writer)| {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..PER_WRITER {
                        let value = w as u64 * PER_WRITER + i;
                        writer.write(Tray::encode(&value).unwrap().into_shared()).unwrap();
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = readers
            .into_iter()
            .map(|mut reader| thread::spawn(move || read_all(&mut reader, total)))
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let results: Vec<_> = consumers.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results[0].len(), total);
        for r in &results[1..] {
            assert_eq!(r, &results[0]);
        }
        // ids are consecutive
        for (i, (id, _)) in results[0].iter().enumerate() {
            assert_eq!(*id as usize, i + 1);
        }
        // each writer's own trays stay in its order
        for w in 0..WRITERS as u64 {
            let mine: Vec<u64> = results[0]
                .iter()
                .map(|&(_, v)| v)
                .filter(|v| v / PER_WRITER == w)
                .collect();
            assert!(mine.windows(2).all(|p| p[0] < p[1]));
        }
        drop(owner);
        App::drop_app(&app);
    }

    #[test]
    fn test_detach_releases_blocked_writer() {
        let app = App::create_with_config(
            "nx_detach",
            AppConfig::new()
                .with_timeout_secs(5)
                .with_queue_limit(2)
                .with_queue_timeout_ms(5_000),
        )
        .unwrap();
        let owner = app.make_triead("hub").unwrap();
        owner.export_nexus(NexusDef::new("N")).unwrap();
        owner.mark_constructed().unwrap();
        let mut reader = owner.import_reader("hub", "N", false).unwrap();
        let mut writer = owner.import_writer("hub", "N", false).unwrap();
        owner.mark_ready().unwrap();

        writer.write(Tray::from("1").into_shared()).unwrap();
        writer.write(Tray::from("2").into_shared()).unwrap();

        let start = Instant::now();
        let blocked = thread::spawn(move || writer.write(Tray::from("3").into_shared()));
        thread::sleep(Duration::from_millis(100));
        reader.detach();

        let result = blocked.join().unwrap();
        assert!(result.is_ok());
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(reader.read().is_none());
        drop(owner);
        App::drop_app(&app);
    }

    #[test]
    fn test_full_queue_times_out() {
        let app = App::create_with_config(
            "nx_full",
            AppConfig::new()
                .with_timeout_secs(5)
                .with_queue_limit(1)
                .with_queue_timeout_ms(100),
        )
        .unwrap();
        let owner = app.make_triead("hub").unwrap();
        owner.export_nexus(NexusDef::new("N")).unwrap();
        let _reader = owner.import_reader("hub", "N", false).unwrap();
        let mut writer = owner.import_writer("hub", "N", false).unwrap();

        writer.write(Tray::from("1").into_shared()).unwrap();
        assert!(matches!(
            writer.write(Tray::from("2").into_shared()),
            Err(TriesteError::Timeout { .. })
        ));
        drop(owner);
        App::drop_app(&app);
    }

    #[test]
    fn test_slow_reader_overflow_keeps_sequence() {
        let app = App::create_with_config(
            "nx_overflow",
            AppConfig::new()
                .with_timeout_secs(5)
                .with_queue_limit(1)
                .with_queue_timeout_ms(50),
        )
        .unwrap();
        let owner = app.make_triead("hub").unwrap();
        owner.export_nexus(NexusDef::new("N")).unwrap();
        owner.mark_constructed().unwrap();
        let mut fast = owner.import_reader("hub", "N", false).unwrap();
        let mut slow = owner.import_reader("hub", "N", false).unwrap();
        let mut writer = owner.import_writer("hub", "N", false).unwrap();
        owner.mark_ready().unwrap();

        assert_eq!(writer.write(Tray::from("A").into_shared()).unwrap(), Some(1));
        assert_eq!(ids(&mut fast), vec![1]);

        // stamped 2, then the slow reader's queue stayed full
        assert!(matches!(
            writer.write(Tray::from("B").into_shared()),
            Err(TriesteError::Timeout { .. })
        ));
        assert_eq!(ids(&mut slow), vec![1, 2]);
        assert_eq!(ids(&mut fast), vec![2]);

        assert_eq!(writer.write(Tray::from("C").into_shared()).unwrap(), Some(3));
        assert_eq!(ids(&mut fast), vec![3]);
        assert_eq!(ids(&mut slow), vec![3]);
        drop((fast, slow, writer, owner));
        App::drop_app(&app);
    }

    #[test]
    fn test_reader_churn_under_concurrent_writers() {
        init_logging();
        const WRITERS: usize = 3;
        const PER_WRITER: u64 = 1000;
        const CYCLES: usize = 50;
        let total = WRITERS * PER_WRITER as usize;

        let app = App::create_with_config(
            "nx_churn",
            AppConfig::new()
                .with_timeout_secs(5)
                .with_queue_limit(64)
                .with_queue_timeout_ms(5_000),
        )
        .unwrap();
        let owner = app.make_triead("hub").unwrap();
        owner.export_nexus(NexusDef::new("N")).unwrap();
        owner.mark_constructed().unwrap();
        let mut stable = owner.import_reader("hub", "N", false).unwrap();
        let writers: Vec<_> = (0..WRITERS)
            .map(|_| owner.import_writer("hub", "N", false).unwrap())
            .collect();
        owner.mark_ready().unwrap();
        let nexus = owner.find_nexus("hub", "N", true).unwrap();

        let barrier = Arc::new(Barrier::new(WRITERS + 1));
        let producers: Vec<_> = writers
            .into_iter()
            .enumerate()
            .map(|(w, mut writer)| {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..PER_WRITER {
                        let value = w as u64 * PER_WRITER + i;
                        writer.write(Tray::encode(&value).unwrap().into_shared()).unwrap();
                    }
                })
            })
            .collect();

        let churn_barrier = barrier.clone();
        let churn = thread::spawn(move || {
            let event = Arc::new(QueueEvent::new().unwrap());
            churn_barrier.wait();
            let mut seen = Vec::new();
            for i in 0..CYCLES {
                let mut reader = nexus.attach_reader(&format!("churn{}", i), &event);
                let mut got = Vec::new();
                while got.len() < 20 {
                    match reader.read_timeout(Duration::from_millis(5)) {
                        Some(d) => got.push(d.id),
                        None => break,
                    }
                }
                reader.detach();
                seen.push(got);
            }
            seen
        });

        let consumer = thread::spawn(move || read_all(&mut stable, total));
        for h in producers {
            h.join().unwrap();
        }
        let seen = churn.join().unwrap();
        let stable_got = consumer.join().unwrap();

        assert_eq!(stable_got.len(), total);
        for (i, (id, _)) in stable_got.iter().enumerate() {
            assert_eq!(*id as usize, i + 1);
        }
        for got in &seen {
            assert!(got.windows(2).all(|p| p[1] == p[0].wrapping_add(1)));
        }
        drop(owner);
        App::drop_app(&app);
    }

    #[test]
    fn test_schema_mismatch_on_reexport() {
        let app = App::create("nx_schema").unwrap();
        let owner = app.make_triead("hub").unwrap();
        let row = trieste::RowType::default().with_field("a", "int32");
        owner
            .export_nexus(NexusDef::new("N").with_label("data", row.clone()))
            .unwrap();
        owner
            .export_nexus(NexusDef::new("N").with_label("data", row))
            .unwrap();
        assert!(matches!(
            owner.export_nexus(NexusDef::new("N")),
            Err(TriesteError::SchemaMismatch { .. })
        ));
        drop(owner);
        App::drop_app(&app);
    }
}
