// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Condition behavior through the LCO surface: broadcast to a crowd of
//! affinity-pinned waiters, error propagation into continuations, and the
//! no-switch fast path on an already-triggered LCO.

use parallax::{Action, Addr, Attributes, Config, Runtime, Status, lco, thread};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

const WAITERS: u64 = 100;

struct Gates {
    /// Broadcast source all waiters block on.
    gate: Addr,
    /// Counts the waiters that made it into position.
    armed: Addr,
    /// Counts the waiters that came back out.
    finished: Addr,
}

static GATES: OnceLock<Gates> = OnceLock::new();
static WAITER: OnceLock<Action> = OnceLock::new();
static RESUMED: AtomicU64 = AtomicU64::new(0);
static ON_DESIGNATED_WORKER: AtomicU64 = AtomicU64::new(0);

fn waiter(args: &mut [u8]) -> Status {
    let idx = u64::from_le_bytes(args[..8].try_into().unwrap());
    let designated = (idx % 2) as u32;
    thread::set_affinity(designated).unwrap();

    let gates = GATES.get().unwrap();
    assert!(thread::tls_id() >= 0, "a running thread has an identity");
    lco::set(gates.armed, &[]);
    lco::wait(gates.gate).unwrap();

    RESUMED.fetch_add(1, Ordering::SeqCst);
    if thread::worker_id() == designated {
        ON_DESIGNATED_WORKER.fetch_add(1, Ordering::SeqCst);
    }
    lco::set(gates.finished, &[]);
    Status::Success
}

fn broadcast_main(_args: &mut [u8]) -> Status {
    let gates = GATES.get().unwrap();
    let act = *WAITER.get().unwrap();
    for i in 0..WAITERS {
        parallax::call(Addr::NULL, act, &i.to_le_bytes(), Addr::NULL);
    }

    lco::wait(gates.armed).unwrap();
    lco::set(gates.gate, &[]);
    lco::wait(gates.finished).unwrap();
    thread::exit(0, &[])
}

#[test]
fn broadcast_reaches_all_hundred_waiters() {
    GATES
        .set(Gates {
            gate: lco::new_future(0),
            armed: lco::new_and(WAITERS),
            finished: lco::new_and(WAITERS),
        })
        .unwrap_or_else(|_| unreachable!());

    let mut rt = Runtime::new(Config {
        threads: 2,
        ..Config::default()
    })
    .unwrap();
    WAITER
        .set(rt.register("waiter", Attributes::MARSHALLED, waiter).unwrap())
        .unwrap();
    let main_act = rt
        .register("broadcast_main", Attributes::MARSHALLED, broadcast_main)
        .unwrap();

    assert_eq!(rt.run(main_act, &[]).unwrap(), 0);

    assert_eq!(RESUMED.load(Ordering::SeqCst), WAITERS);
    assert_eq!(
        ON_DESIGNATED_WORKER.load(Ordering::SeqCst),
        WAITERS,
        "affinity-tagged waiters must resume on their designated worker"
    );

    let gates = GATES.get().unwrap();
    // reset after all waiters were signalled leaves an empty condition
    lco::reset(gates.gate);
    lco::set(gates.gate, &[]);
    assert!(lco::wait(gates.gate).is_ok());
    lco::delete(gates.gate);
    lco::delete(gates.armed);
    lco::delete(gates.finished);
}

static FAILING: OnceLock<Action> = OnceLock::new();
static FAILING_UNOBSERVED: OnceLock<Action> = OnceLock::new();
static UNOBSERVED_RAN: OnceLock<Addr> = OnceLock::new();

fn failing(_args: &mut [u8]) -> Status {
    Status::Error
}

fn failing_unobserved(_args: &mut [u8]) -> Status {
    lco::set(*UNOBSERVED_RAN.get().unwrap(), &[]);
    Status::Error
}

fn error_main(_args: &mut [u8]) -> Status {
    // with a continuation, the handler's failure arrives as an LCO error
    let result = lco::new_future(8);
    parallax::call(Addr::NULL, *FAILING.get().unwrap(), &[], result);
    assert_eq!(lco::get(result, 8), Err(Status::Error as i32));
    lco::delete(result);

    // without one, the error feeds the process exit code instead
    let ran = *UNOBSERVED_RAN.get().unwrap();
    parallax::call(Addr::NULL, *FAILING_UNOBSERVED.get().unwrap(), &[], Addr::NULL);
    lco::wait(ran).unwrap();

    // an already-triggered LCO satisfies waits immediately, no switch
    let ready = lco::new_future(8);
    lco::set(ready, &7u64.to_le_bytes());
    assert!(lco::wait(ready).is_ok());
    assert_eq!(lco::get(ready, 8).unwrap(), 7u64.to_le_bytes());
    lco::delete(ready);

    thread::exit(0, &[])
}

#[test]
fn handler_errors_become_lco_errors() {
    UNOBSERVED_RAN
        .set(lco::new_future(0))
        .unwrap_or_else(|_| unreachable!());

    let mut rt = Runtime::new(Config {
        threads: 1,
        ..Config::default()
    })
    .unwrap();
    FAILING
        .set(rt.register("failing", Attributes::MARSHALLED, failing).unwrap())
        .unwrap();
    FAILING_UNOBSERVED
        .set(
            rt.register(
                "failing_unobserved",
                Attributes::MARSHALLED,
                failing_unobserved,
            )
            .unwrap(),
        )
        .unwrap();
    let main_act = rt
        .register("error_main", Attributes::MARSHALLED, error_main)
        .unwrap();

    // the unobserved failure is the only exit-code contribution
    assert_eq!(rt.run(main_act, &[]).unwrap(), 1);
    lco::delete(*UNOBSERVED_RAN.get().unwrap());
}
