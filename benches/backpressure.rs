use criterion::{black_box, criterion_group, criterion_main, Criterion};
use prodline::BoundedBuffer;
use std::time::Duration;

/// A tiny buffer forces the producer onto the blocking path while a
/// consumer drains on another thread.
fn benchmark_blocking_push_small_buffer(c: &mut Criterion) {
    c.bench_function("blocking_push_capacity_4", |b| {
        b.iter(|| {
            let buffer = BoundedBuffer::new(4);
            let consumer = {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    let mut received = 0;
                    while received < 500 {
                        if buffer.pop_timeout(Duration::from_millis(100)).is_some() {
                            received += 1;
                        }
                    }
                })
            };

            for i in 0..500u64 {
                while buffer.push(black_box(i)).is_err() {}
            }
            consumer.join().expect("consumer panicked");
        });
    });
}

fn benchmark_try_push_refusal(c: &mut Criterion) {
    let buffer = BoundedBuffer::new(4);
    for i in 0..4u64 {
        let _ = buffer.try_push(i);
    }
    c.bench_function("try_push_full_buffer", |b| {
        b.iter(|| {
            let _ = buffer.try_push(black_box(99));
        });
    });
}

criterion_group!(
    benches,
    benchmark_blocking_push_small_buffer,
    benchmark_try_push_refusal
);
criterion_main!(benches);
