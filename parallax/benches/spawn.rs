// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Spawn throughput: one epoch spawning a burst of no-op threads.

use criterion::{Criterion, criterion_group, criterion_main};
use parallax::{Action, Addr, Attributes, Config, Runtime, Status, thread};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

static NOP: OnceLock<Action> = OnceLock::new();
static RUNS: AtomicU64 = AtomicU64::new(0);

fn nop(_args: &mut [u8]) -> Status {
    RUNS.fetch_add(1, Ordering::Relaxed);
    Status::Success
}

fn burst_main(args: &mut [u8]) -> Status {
    let n = u64::from_le_bytes(args[..8].try_into().unwrap());
    let act = *NOP.get().unwrap();
    let before = RUNS.load(Ordering::Relaxed);
    for _ in 0..n {
        parallax::call(Addr::NULL, act, &[], Addr::NULL);
    }
    while RUNS.load(Ordering::Relaxed) - before < n {
        thread::yield_now();
    }
    thread::exit(0, &[])
}

fn spawn_burst(c: &mut Criterion) {
    c.bench_function("spawn_1000", |b| {
        b.iter(|| {
            let mut rt = Runtime::new(Config {
                threads: 2,
                ..Config::default()
            })
            .unwrap();
            let _ = NOP.set(rt.register("nop", Attributes::MARSHALLED, nop).unwrap());
            let main_act = rt
                .register("burst_main", Attributes::MARSHALLED, burst_main)
                .unwrap();
            rt.run(main_act, &1000u64.to_le_bytes()).unwrap();
        });
    });
}

criterion_group!(benches, spawn_burst);
criterion_main!(benches);
