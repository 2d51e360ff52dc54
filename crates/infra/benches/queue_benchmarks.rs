use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use queuectl_core::{Job, JobState};
use queuectl_infra::{FileJobStore, InMemoryJobStore, JobStore, Queue};

fn jobs(n: usize) -> Vec<Job> {
    (0..n)
        .map(|i| Job::new(format!("job-{i}"), "true"))
        .collect()
}

fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("file_store", |b| {
        let dir = tempfile::tempdir().unwrap();
        let queue = Queue::open(dir.path()).unwrap();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            queue
                .enqueue_job(Job::new(format!("job-{n}"), "true"))
                .unwrap();
        });
    });

    group.bench_function("in_memory_store", |b| {
        let store = InMemoryJobStore::new();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            store
                .push_back(JobState::Pending, Job::new(format!("job-{n}"), "true"))
                .unwrap();
        });
    });

    group.finish();
}

/// Dequeue cost grows with the size of the pending record.
fn bench_pop_front(c: &mut Criterion) {
    let mut group = c.benchmark_group("pop_front");

    for depth in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("file_store", depth), &depth, |b, &depth| {
            let dir = tempfile::tempdir().unwrap();
            let store = FileJobStore::open(dir.path()).unwrap();
            b.iter_batched(
                || {
                    store
                        .modify(JobState::Pending, |pending| *pending = jobs(depth))
                        .unwrap();
                },
                |()| black_box(store.pop_front(JobState::Pending).unwrap()),
                criterion::BatchSize::SmallInput,
            );
        });

        group.bench_with_input(
            BenchmarkId::new("in_memory_store", depth),
            &depth,
            |b, &depth| {
                b.iter_batched(
                    || InMemoryJobStore::new().with_jobs(JobState::Pending, jobs(depth)),
                    |store| black_box(store.pop_front(JobState::Pending).unwrap()),
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_pop_front);
criterion_main!(benches);
