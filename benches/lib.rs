//! # spool benchmarks
//!
//! - `pool`: frame and array recycling
//! - `tick`: scheduler throughput with the demo counters
//! - `persist`: snapshot save and restore
//!
//! ```bash
//! cargo bench        # everything
//! cargo bench tick   # only the tick group
//! ```

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use spool::demo;
use spool::runtime::Runtime;
use spool::vm::FramePool;

fn bench_pool_frames(c: &mut Criterion) {
    let mut pool = FramePool::new();
    c.bench_function("pool/take_give_frame", |b| {
        b.iter(|| {
            let frame = pool.take_frame();
            pool.give_frame(black_box(frame));
        })
    });
}

fn bench_pool_arrays(c: &mut Criterion) {
    let mut pool = FramePool::new();
    c.bench_function("pool/take_give_array", |b| {
        b.iter(|| {
            for size in [4usize, 8, 16, 8] {
                let array = pool.take_array(black_box(size));
                pool.give_array(array);
            }
        })
    });
}

fn demo_runtime(threads: usize) -> Runtime {
    let mut runtime = Runtime::new();
    demo::install(&mut runtime).expect("demo threads");
    let counter = runtime.get_global("counter");
    let counter = counter.as_closure().expect("counter closure").clone();
    for i in 2..threads {
        runtime
            .new_thread(
                counter.clone(),
                vec![format!("T{}", i).as_str().into(), 1i64.into()].into_iter().collect(),
            )
            .expect("extra thread");
    }
    runtime
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    for threads in [2usize, 32, 256] {
        let mut runtime = demo_runtime(threads);
        group.bench_function(format!("{}_threads", threads), |b| {
            b.iter(|| black_box(runtime.update()))
        });
    }
    group.finish();
}

fn bench_persist(c: &mut Criterion) {
    let mut runtime = demo_runtime(32);
    for _ in 0..3 {
        runtime.update();
    }
    c.bench_function("persist/save", |b| b.iter(|| black_box(runtime.save().expect("save"))));

    let snapshot = runtime.save().expect("save");
    c.bench_function("persist/restore", |b| {
        b.iter(|| {
            let mut fresh = Runtime::new();
            fresh.context_mut().natives_mut().register(demo::log_native());
            fresh.restore(black_box(&snapshot)).expect("restore");
        })
    });
}

criterion_group!(pool, bench_pool_frames, bench_pool_arrays);
criterion_group!(tick, bench_tick);
criterion_group!(persist, bench_persist);
criterion_main!(pool, tick, persist);
