#![allow(missing_docs, reason = "benchmarks")]

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use handoff::{Executor, ManualExecutor, pair};

fn entrypoint(c: &mut Criterion) {
    let mut g = c.benchmark_group("handoff_dispatch");

    g.bench_function("result_then_callback", |b| {
        b.iter(|| {
            let (producer, consumer) = pair::<i32>();

            producer.complete_value(black_box(42));
            consumer.set_callback(|outcome| {
                assert_eq!(black_box(outcome.into_value().unwrap()), 42);
            });
        });
    });

    g.bench_function("callback_then_result", |b| {
        b.iter(|| {
            let (producer, consumer) = pair::<i32>();

            consumer.set_callback(|outcome| {
                assert_eq!(black_box(outcome.into_value().unwrap()), 42);
            });
            producer.complete_value(black_box(42));
        });
    });

    g.bench_function("boxed_continuation", |b| {
        b.iter(|| {
            let (producer, consumer) = pair::<i32>();

            // Captures too much to fit the inline buffer.
            let ballast = black_box([0_u64; 16]);

            consumer.set_callback(move |outcome| {
                assert_eq!(black_box(outcome.into_value().unwrap()), 42);
                black_box(ballast);
            });
            producer.complete_value(black_box(42));
        });
    });

    g.bench_function("executor_round_trip", |b| {
        let executor = Arc::new(ManualExecutor::new());

        b.iter(|| {
            let (producer, consumer) = pair::<i32>();

            consumer.set_executor(Arc::clone(&executor) as Arc<dyn Executor>, 0);
            consumer.set_callback(|outcome| {
                assert_eq!(black_box(outcome.into_value().unwrap()), 42);
            });
            producer.complete_value(black_box(42));

            assert_eq!(executor.run_all(), 1);
        });
    });

    g.bench_function("broken_promise", |b| {
        b.iter(|| {
            let (producer, consumer) = pair::<i32>();

            consumer.set_callback(|outcome| {
                assert!(black_box(outcome.is_failure()));
            });
            drop(producer);
        });
    });

    g.finish();
}

criterion_group!(benches, entrypoint);
criterion_main!(benches);
