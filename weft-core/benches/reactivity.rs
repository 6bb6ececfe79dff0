use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use weft_core::{effect_with, wrap, EffectOptions, Object, Tracked, Value};

fn tracked(obj: Object) -> Tracked {
    match wrap(Value::Object(obj)) {
        Value::Tracked(t) => t,
        _ => unreachable!(),
    }
}

fn bench_first_run_tracking(c: &mut Criterion) {
    c.bench_function("first_run_tracking_10_slots", |b| {
        let obj = Object::new();
        for i in 0..10 {
            obj.insert(format!("k{i}"), i as i64);
        }
        let state = tracked(obj);

        b.iter(|| {
            let handle = effect_with(
                {
                    let state = state.clone();
                    move || {
                        for i in 0..10 {
                            black_box(state.get(&format!("k{i}")));
                        }
                    }
                },
                EffectOptions {
                    scheduler: None,
                    lazy: false,
                },
            );
            handle.stop();
        });
    });
}

fn bench_steady_state_rerun(c: &mut Criterion) {
    c.bench_function("steady_state_rerun_10_slots", |b| {
        let obj = Object::new();
        for i in 0..10 {
            obj.insert(format!("k{i}"), i as i64);
        }
        let state = tracked(obj);

        let handle = effect_with(
            {
                let state = state.clone();
                move || {
                    for i in 0..10 {
                        black_box(state.get(&format!("k{i}")));
                    }
                }
            },
            EffectOptions {
                scheduler: None,
                lazy: false,
            },
        );

        // Every iteration re-reads the same slots in the same order, so the
        // dependency lists reconcile by slot comparison alone.
        b.iter(|| handle.run());
    });
}

fn bench_trigger_fanout(c: &mut Criterion) {
    c.bench_function("trigger_fanout_100_effects", |b| {
        let state = tracked(Object::new().with("n", 0i64));

        let handles: Vec<_> = (0..100)
            .map(|_| {
                effect_with(
                    {
                        let state = state.clone();
                        move || {
                            black_box(state.get("n"));
                        }
                    },
                    EffectOptions {
                        scheduler: Some(Arc::new(|| {})),
                        lazy: false,
                    },
                )
            })
            .collect();

        let mut next = 1i64;
        b.iter(|| {
            state.set("n", next);
            next += 1;
        });

        drop(handles);
    });
}

fn bench_wrap_cache_hit(c: &mut Criterion) {
    c.bench_function("wrap_cache_hit", |b| {
        let raw = Object::new().with("a", 1i64);
        let _keepalive = wrap(Value::Object(raw.clone()));

        b.iter(|| black_box(wrap(Value::Object(raw.clone()))));
    });
}

criterion_group!(
    benches,
    bench_first_run_tracking,
    bench_steady_state_rerun,
    bench_trigger_fanout,
    bench_wrap_cache_hit
);
criterion_main!(benches);
