//! Benchmarks for list file append and stream
//!
//! Run with: cargo bench --package metrichist-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use metrichist_core::{
    Compression, FileConfig, GroupName, GroupPath, Histogram, ListFile, MetricName,
    SimpleCollection, SyncPolicy, TimeSeriesCollection, Timestamp,
};
use tempfile::TempDir;

const HOSTS: usize = 8;

/// One scrape of a small fleet, one group per host
fn generate_collection(timestamp: Timestamp) -> SimpleCollection {
    let mut tsc = SimpleCollection::new(timestamp);
    for host in 0..HOSTS {
        let group = GroupName::new(GroupPath::new(["node", "cpu"]))
            .with_tag("host", format!("host{}", host));
        let usage = (timestamp % 100) as f64 / 100.0;
        tsc.insert_metric(group.clone(), MetricName::new(["usage"]), usage);
        tsc.insert_metric(group.clone(), MetricName::new(["processes"]), timestamp % 512);
        tsc.insert_metric(
            group,
            MetricName::new(["latency"]),
            Histogram::new()
                .with_range(0.0, 10.0, (timestamp % 7) as f64)
                .with_range(10.0, 100.0, (timestamp % 3) as f64),
        );
    }
    tsc
}

fn config(compression: Compression) -> FileConfig {
    FileConfig::default()
        .with_compression(compression)
        .with_sync_policy(SyncPolicy::None)
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    let batch: Vec<SimpleCollection> = (0..100).map(|i| generate_collection(i * 60_000)).collect();
    group.throughput(Throughput::Elements(batch.len() as u64));

    for compression in [Compression::None, Compression::Gzip, Compression::Lz4] {
        group.bench_with_input(
            BenchmarkId::from_parameter(compression),
            &compression,
            |b, &compression| {
                b.iter_batched(
                    || {
                        let temp_dir = TempDir::new().unwrap();
                        let file =
                            ListFile::create(temp_dir.path().join("bench.mhist"), config(compression))
                                .unwrap();
                        (temp_dir, file)
                    },
                    |(_temp_dir, file)| {
                        for tsc in &batch {
                            file.add(black_box(tsc)).unwrap();
                        }
                    },
                    criterion::BatchSize::PerIteration,
                )
            },
        );
    }
    group.finish();
}

fn bench_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream");

    for compression in [Compression::None, Compression::Gzip, Compression::Lz4] {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bench.mhist");
        {
            let file = ListFile::create(&path, config(compression)).unwrap();
            let batch: Vec<SimpleCollection> =
                (0..1000).map(|i| generate_collection(i * 60_000)).collect();
            file.add_all(&batch).unwrap();
        }
        group.throughput(Throughput::Elements(1000));

        group.bench_with_input(
            BenchmarkId::from_parameter(compression),
            &path,
            |b, path| {
                b.iter(|| {
                    let file = ListFile::open_read_only(path).unwrap();
                    for tsc in file.stream().iter() {
                        black_box(tsc.values().unwrap());
                    }
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_append, bench_stream);
criterion_main!(benches);
