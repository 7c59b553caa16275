//! Benchmarks for chainlog append throughput

use chainlog::{LogConfig, LogCoordinator, LogRecord, PageImage, WalSyncStrategy};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tempfile::TempDir;

fn open_log(dir: &TempDir, strategy: WalSyncStrategy) -> LogCoordinator {
    let config = LogConfig::builder()
        .path(dir.path().join("bench.log"))
        .initial_pages(1024)
        .growth_pages(1024)
        .sync_strategy(strategy)
        .build();
    LogCoordinator::create(config).unwrap()
}

fn append_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    group.throughput(Throughput::Elements(1));
    group.bench_function("noop_batched_sync", |b| {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, WalSyncStrategy::EveryNEntries { count: 100 });
        b.iter(|| log.append(LogRecord::no_op()).unwrap());
    });

    group.bench_function("transaction_every_write", |b| {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, WalSyncStrategy::EveryWrite);
        b.iter(|| {
            let txn = log.next_transaction_id();
            log.append(LogRecord::begin_transaction(txn)).unwrap();
            log.append(LogRecord::commit_transaction(txn)).unwrap();
        });
    });

    group.throughput(Throughput::Bytes((2 * chainlog::PAGE_SIZE) as u64));
    group.bench_function("update_page_batched_sync", |b| {
        let dir = TempDir::new().unwrap();
        let log = open_log(&dir, WalSyncStrategy::EveryNEntries { count: 100 });
        let txn = log.next_transaction_id();
        log.append(LogRecord::begin_transaction(txn)).unwrap();
        let mut timestamp = 0i64;
        b.iter_batched(
            || {
                timestamp += 1;
                LogRecord::update_page(txn, 7, timestamp, PageImage::filled(1), PageImage::filled(2))
            },
            |record| log.append(record).unwrap(),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, append_benchmarks);
criterion_main!(benches);
