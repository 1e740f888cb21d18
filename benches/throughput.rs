use criterion::{black_box, criterion_group, criterion_main, Criterion};
use prodline::BoundedBuffer;
use std::time::Duration;

fn benchmark_uncontended_push_pop(c: &mut Criterion) {
    c.bench_function("buffer_push_pop_1000", |b| {
        b.iter(|| {
            let buffer = BoundedBuffer::new(1000);
            for i in 0..1000u64 {
                let _ = buffer.try_push(black_box(i));
            }
            while buffer.try_pop().is_some() {}
        });
    });
}

fn benchmark_producer_consumer(c: &mut Criterion) {
    c.bench_function("buffer_producer_consumer_1000", |b| {
        b.iter(|| {
            let buffer = BoundedBuffer::new(64);
            let producer = {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for i in 0..1000u64 {
                        while buffer.push(black_box(i)).is_err() {}
                    }
                })
            };

            let mut received = 0;
            while received < 1000 {
                if buffer.pop_timeout(Duration::from_millis(100)).is_some() {
                    received += 1;
                }
            }
            producer.join().expect("producer panicked");
        });
    });
}

criterion_group!(
    benches,
    benchmark_uncontended_push_pop,
    benchmark_producer_consumer
);
criterion_main!(benches);
