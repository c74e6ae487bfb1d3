//! Benchmarks for the bounded queue.

use std::sync::Arc;
use std::thread;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use bluegate::queue::{BoundedQueue, DrainPolicy};

const ITEMS: usize = 10_000;

fn bench_single_thread(c: &mut Criterion) {
    let queue = BoundedQueue::new(64);

    c.bench_function("queue_push_pop", |b| {
        b.iter(|| {
            let _ = queue.push(black_box(42u64));
            queue.pop()
        });
    });
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_contended");
    group.throughput(Throughput::Elements(ITEMS as u64));

    for threads in &[1usize, 2, 4] {
        group.bench_with_input(BenchmarkId::new("mpmc", threads), threads, |b, &threads| {
            b.iter(|| {
                let queue = Arc::new(BoundedQueue::<usize>::new(256));
                let per_thread = ITEMS / threads;

                let consumers: Vec<_> = (0..threads)
                    .map(|_| {
                        let queue = Arc::clone(&queue);
                        thread::spawn(move || {
                            let mut seen = 0usize;
                            while queue.pop().is_some() {
                                seen += 1;
                            }
                            seen
                        })
                    })
                    .collect();

                let producers: Vec<_> = (0..threads)
                    .map(|_| {
                        let queue = Arc::clone(&queue);
                        thread::spawn(move || {
                            for item in 0..per_thread {
                                let _ = queue.push(item);
                            }
                        })
                    })
                    .collect();

                for producer in producers {
                    let _ = producer.join();
                }
                queue.exit(DrainPolicy::Infinite);
                consumers
                    .into_iter()
                    .map(|consumer| consumer.join().unwrap_or(0))
                    .sum::<usize>()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_thread, bench_contended);
criterion_main!(benches);
