use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use kvpool::{EchoHandler, Master, Message, MessageKind, MessageQueue, PoolConfig};
use std::{sync::mpsc, time::Instant};
use tokio::runtime::Builder;

#[derive(Clone, Copy, Debug)]
struct RoundtripParams {
    workers: usize,
    batch: usize,
}

/// Measures `put_request` -> response callback latency for batches of
/// requests in flight at once.
fn bench_roundtrips(c: &mut Criterion) {
    let worker_cases = [1, 2, 4, 8];
    let batch_cases = [1, 64, 1024];

    let mut cases = Vec::new();
    for &workers in &worker_cases {
        for &batch in &batch_cases {
            cases.push(RoundtripParams { workers, batch });
        }
    }

    // Hosts the master's response drain.
    let rt = Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();

    for params in &cases {
        let master = Master::with_config(PoolConfig::new(params.workers)).unwrap();
        let (tx, rx) = mpsc::channel();
        master
            .start(
                rt.handle(),
                move |_: &Master, response: Message| {
                    let _ = tx.send(response);
                },
                EchoHandler,
            )
            .unwrap();

        let mut group = c.benchmark_group("master/roundtrip");
        group.throughput(Throughput::Elements(params.batch as u64));
        group.bench_function(
            format!("workers/{}/batch/{}", params.workers, params.batch),
            |b| {
                b.iter_custom(|iters| {
                    let start = Instant::now();
                    for _ in 0..iters {
                        for _ in 0..params.batch {
                            master
                                .put_request(Message::new(MessageKind::Echo, "hello"))
                                .unwrap();
                        }
                        for _ in 0..params.batch {
                            black_box(rx.recv().unwrap());
                        }
                    }
                    start.elapsed()
                });
            },
        );
        group.finish();

        master.stop().unwrap();
    }
}

/// Measures one insert and one removal on an uncontended queue.
fn bench_queue(c: &mut Criterion) {
    let queue = MessageQueue::new();
    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(1));
    group.bench_function("insert_tail/pop_head", |b| {
        b.iter(|| {
            queue.insert_tail(Message::new(MessageKind::Echo, "hello"));
            black_box(queue.pop_head());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_roundtrips, bench_queue);
criterion_main!(benches);
