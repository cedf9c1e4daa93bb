// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A sequential spawn microbenchmark: one thread spawns n no-ops.
//!
//! ```text
//! cargo run --release --example seq_spawn -- <threads> <n>
//! ```

use parallax::{Action, Addr, Attributes, Config, Runtime, Status, thread};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static NOP: OnceLock<Action> = OnceLock::new();
static NTHREADS: AtomicU64 = AtomicU64::new(0);

fn nop(_args: &mut [u8]) -> Status {
    NTHREADS.fetch_add(1, Ordering::SeqCst);
    Status::Success
}

fn seq_main(args: &mut [u8]) -> Status {
    let n = u64::from_le_bytes(args[..8].try_into().unwrap());
    println!("seq_spawn({n})");

    let clock = Instant::now();
    let act = *NOP.get().unwrap();
    for _ in 0..n {
        parallax::call(Addr::NULL, act, &[], Addr::NULL);
    }
    while NTHREADS.load(Ordering::SeqCst) < n {
        thread::yield_now();
    }
    let seconds = clock.elapsed().as_secs_f64();

    println!("seconds: {seconds:.7}");
    thread::exit(0, &[])
}

fn main() {
    let mut args = std::env::args().skip(1);
    let threads: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(0);
    let n: u64 = args.next().and_then(|a| a.parse().ok()).unwrap_or(10_000);

    let mut rt = Runtime::new(Config {
        threads,
        ..Config::default()
    })
    .expect("runtime");
    NOP.set(rt.register("nop", Attributes::MARSHALLED, nop).unwrap())
        .unwrap();
    let main_act = rt
        .register("seq_main", Attributes::MARSHALLED, seq_main)
        .unwrap();

    rt.run(main_act, &n.to_le_bytes()).expect("epoch");
    println!("workers:      {}", rt.workers());
    println!("threads:      {}", NTHREADS.load(Ordering::SeqCst));
}
