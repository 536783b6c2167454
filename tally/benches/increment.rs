//! Microbenchmarks for the `increment()` write path and range reads.
//!
//! Run with: `cargo bench -p tally -- increment`

#![allow(missing_docs, clippy::cast_possible_truncation)]

use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use chrono::{Days, NaiveDate};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tally::{CounterStore, UsageKey};
use tempfile::tempdir;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn keys(count: usize) -> Vec<UsageKey> {
    (0..count)
        .map(|i| UsageKey::new("bench", "prod", "things", format!("key_{i}")).unwrap())
        .collect()
}

fn bench_increment_same_day(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = CounterStore::open(dir.path()).unwrap();
    let key = &keys(1)[0];

    c.bench_function("increment/same_day", |b| {
        b.iter(|| {
            store.increment(black_box(key), black_box(1), day()).unwrap();
        });
    });
}

fn bench_increment_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("increment/threads");

    for threads in [1, 4, 8] {
        let dir = tempdir().unwrap();
        let store = Arc::new(CounterStore::open(dir.path()).unwrap());
        let key = keys(1).remove(0);

        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                thread::scope(|scope| {
                    for _ in 0..threads {
                        scope.spawn(|| {
                            for _ in 0..10 {
                                store.increment(&key, 1, day()).unwrap();
                            }
                        });
                    }
                });
            });
        });
    }

    group.finish();
}

fn bench_sum_usages(c: &mut Criterion) {
    let mut group = c.benchmark_group("sum_usages/days");
    let dir = tempdir().unwrap();
    let store = CounterStore::open(dir.path()).unwrap();
    let key = &keys(1)[0];
    for delta in 0..365 {
        let date = day().checked_sub_days(Days::new(delta)).unwrap();
        store.increment(key, 1, date).unwrap();
    }

    for days in [1u32, 30, 365] {
        group.bench_with_input(BenchmarkId::from_parameter(days), &days, |b, &days| {
            b.iter(|| store.sum_usages_as_of(black_box(key), days, day()).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_increment_same_day,
    bench_increment_contended,
    bench_sum_usages,
);
criterion_main!(benches);
