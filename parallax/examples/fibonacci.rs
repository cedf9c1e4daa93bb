// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Naive recursive fibonacci, one user-level thread per call.
//!
//! ```text
//! cargo run --release --example fibonacci -- <threads> <n>
//! ```

use parallax::{Action, Addr, Attributes, Config, Runtime, Status, lco, thread};
use std::sync::OnceLock;
use std::time::Instant;

static FIB: OnceLock<Action> = OnceLock::new();

fn fib(args: &mut [u8]) -> Status {
    let n = u64::from_le_bytes(args[..8].try_into().unwrap());
    if n < 2 {
        return thread::continue_with(&n.to_le_bytes());
    }

    let act = *FIB.get().unwrap();
    let left = lco::new_future(8);
    let right = lco::new_future(8);
    parallax::call(Addr::NULL, act, &(n - 1).to_le_bytes(), left);
    parallax::call(Addr::NULL, act, &(n - 2).to_le_bytes(), right);

    let a = u64::from_le_bytes(lco::get(left, 8).unwrap().try_into().unwrap());
    let b = u64::from_le_bytes(lco::get(right, 8).unwrap().try_into().unwrap());
    lco::delete(left);
    lco::delete(right);
    thread::continue_with(&(a + b).to_le_bytes())
}

fn fib_main(args: &mut [u8]) -> Status {
    let n = u64::from_le_bytes(args[..8].try_into().unwrap());
    let result = lco::new_future(8);
    parallax::call(Addr::NULL, *FIB.get().unwrap(), &n.to_le_bytes(), result);
    let value = lco::get(result, 8).unwrap();
    lco::delete(result);
    thread::exit(0, &value)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let threads: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(0);
    let n: u64 = args.next().and_then(|a| a.parse().ok()).unwrap_or(10);

    let mut rt = Runtime::new(Config {
        threads,
        ..Config::default()
    })
    .expect("runtime");
    FIB.set(rt.register("fib", Attributes::MARSHALLED, fib).unwrap())
        .unwrap();
    let main_act = rt
        .register("fib_main", Attributes::MARSHALLED, fib_main)
        .unwrap();

    let clock = Instant::now();
    let (_, out) = rt
        .run_with_output(main_act, &n.to_le_bytes(), 8)
        .expect("epoch");
    let seconds = clock.elapsed().as_secs_f64();

    let stats = rt.stats();
    println!("fib({n})={}", u64::from_le_bytes(out.try_into().unwrap()));
    println!("seconds: {seconds:.7}");
    println!("workers:      {}", rt.workers());
    println!("threads:      {}", stats.threads);
    println!("steals:       {}", stats.steals);
}
