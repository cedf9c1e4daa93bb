// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A sequential spawn storm: one thread spawns N no-ops and yields until
//! every one of them has run. No task may be lost or run twice.

use parallax::{Action, Addr, Attributes, Config, Runtime, Status, thread};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

const N: u64 = 10_000;

static NOP: OnceLock<Action> = OnceLock::new();
static NOP_RUNS: AtomicU64 = AtomicU64::new(0);

fn nop(_args: &mut [u8]) -> Status {
    NOP_RUNS.fetch_add(1, Ordering::SeqCst);
    Status::Success
}

fn seq_main(args: &mut [u8]) -> Status {
    let n = u64::from_le_bytes(args[..8].try_into().unwrap());
    let act = *NOP.get().unwrap();
    for _ in 0..n {
        parallax::call(Addr::NULL, act, &[], Addr::NULL);
    }
    while NOP_RUNS.load(Ordering::SeqCst) < n {
        thread::yield_now();
    }
    thread::exit(0, &[])
}

#[test]
fn ten_thousand_nops_none_lost() {
    let mut rt = Runtime::new(Config {
        threads: 2,
        ..Config::default()
    })
    .unwrap();
    NOP.set(rt.register("nop", Attributes::MARSHALLED, nop).unwrap())
        .unwrap();
    let main_act = rt
        .register("seq_main", Attributes::MARSHALLED, seq_main)
        .unwrap();

    let code = rt.run(main_act, &N.to_le_bytes()).unwrap();

    assert_eq!(code, 0);
    // at-most-once and no-lost-tasks in one equality
    assert_eq!(NOP_RUNS.load(Ordering::SeqCst), N);
    assert!(rt.stats().threads > N, "every no-op runs as its own thread");
}
