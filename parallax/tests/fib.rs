// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Recursive fibonacci over futures: every call spawns its two children and
//! blocks on their results, so the spawn tree exercises suspension, stack
//! caching and work stealing at once.

use parallax::{Action, Addr, Attributes, Config, Runtime, Status, lco, thread};
use std::sync::OnceLock;

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

#[test]
fn fib_10_on_two_workers() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();

    let mut rt = Runtime::new(Config {
        threads: 2,
        ..Config::default()
    })
    .unwrap();
    let fib_act = rt.register("fib", Attributes::MARSHALLED, fib).unwrap();
    FIB.set(fib_act).unwrap();
    let main_act = rt
        .register("fib_main", Attributes::MARSHALLED, fib_main)
        .unwrap();

    let (code, out) = rt
        .run_with_output(main_act, &10u64.to_le_bytes(), 8)
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(u64::from_le_bytes(out.try_into().unwrap()), 55);

    let stats = rt.stats();
    assert!(stats.steals >= 2, "expected work stealing: {stats:?}");
    assert!(
        (20..=200).contains(&stats.threads),
        "thread count out of range: {stats:?}"
    );
}
