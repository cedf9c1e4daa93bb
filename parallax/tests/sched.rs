// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Scheduler edge behavior: spawns racing a shutdown, resend on pin
//! failure, credit recovery by interrupts, work-first ordering, and SPMD
//! epochs.

use parallax::{
    Action, ActionTable, Addr, Attributes, Config, Gas, LocalGas, Loopback, Runtime, Status, lco,
    process, thread,
};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

// === spawn during shutdown pushes but never executes ===

static LATE: OnceLock<Action> = OnceLock::new();
static LATE_RUNS: AtomicU64 = AtomicU64::new(0);

fn late(_args: &mut [u8]) -> Status {
    LATE_RUNS.fetch_add(1, Ordering::SeqCst);
    Status::Success
}

fn stop_then_spawn(_args: &mut [u8]) -> Status {
    parallax::stop(0);
    parallax::call(Addr::NULL, *LATE.get().unwrap(), &[], Addr::NULL);
    Status::Success
}

#[test]
fn spawn_during_shutdown_never_executes() {
    let mut rt = Runtime::new(Config {
        threads: 2,
        ..Config::default()
    })
    .unwrap();
    LATE.set(rt.register("late", Attributes::MARSHALLED, late).unwrap())
        .unwrap();
    let main_act = rt
        .register("stop_then_spawn", Attributes::MARSHALLED, stop_then_spawn)
        .unwrap();

    assert_eq!(rt.run(main_act, &[]).unwrap(), 0);
    assert_eq!(LATE_RUNS.load(Ordering::SeqCst), 0);
}

// === a failed pin resends the parcel until it lands ===

/// Denies the first few pins, then defers to the local address space.
struct FlakyGas {
    inner: LocalGas,
    denials: AtomicU64,
}

impl Gas for FlakyGas {
    fn alloc(&self, len: usize) -> Addr {
        self.inner.alloc(len)
    }

    fn free(&self, addr: Addr) {
        self.inner.free(addr);
    }

    fn try_pin(&self, addr: Addr) -> Option<NonNull<u8>> {
        if self
            .denials
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
            .is_ok()
        {
            return None;
        }
        self.inner.try_pin(addr)
    }

    fn unpin(&self, addr: Addr) {
        self.inner.unpin(addr);
    }
}

static TOUCHED: OnceLock<Addr> = OnceLock::new();
static TOUCH_ACT: OnceLock<Action> = OnceLock::new();
static TOUCH_RUNS: AtomicU64 = AtomicU64::new(0);

fn touch(_args: &mut [u8]) -> Status {
    TOUCH_RUNS.fetch_add(1, Ordering::SeqCst);
    assert!(!thread::current_pinned().is_null());
    lco::set(*TOUCHED.get().unwrap(), &[]);
    Status::Success
}

fn resend_driver(_args: &mut [u8]) -> Status {
    let done = lco::new_future(0);
    TOUCHED.set(done).unwrap_or_else(|_| unreachable!());
    // any non-null local address works as a pin target
    let target = parallax::gas_alloc(8);
    parallax::call(target, *TOUCH_ACT.get().unwrap(), &[], Addr::NULL);
    lco::wait(done).unwrap();
    parallax::gas_free(target);
    lco::delete(done);
    thread::exit(0, &[])
}

#[test]
fn failed_pin_resends_until_it_lands() {
    let gas = Arc::new(FlakyGas {
        inner: LocalGas::new(),
        denials: AtomicU64::new(2),
    });
    let mut rt = Runtime::with_parts(
        Config {
            threads: 2,
            ..Config::default()
        },
        ActionTable::new(),
        gas.clone(),
        Box::new(Loopback),
    )
    .unwrap();

    let touch_act = rt
        .register("touch", Attributes::PINNED | Attributes::MARSHALLED, touch)
        .unwrap();
    TOUCH_ACT.set(touch_act).unwrap();
    let main_act = rt
        .register("resend_driver", Attributes::MARSHALLED, resend_driver)
        .unwrap();

    assert_eq!(rt.run(main_act, &[]).unwrap(), 0);
    // denied twice, completed exactly once
    assert_eq!(TOUCH_RUNS.load(Ordering::SeqCst), 1);
    assert_eq!(gas.denials.load(Ordering::SeqCst), 0);
}

// === an interrupt with no continuation returns its credit ===

static INTR: OnceLock<Action> = OnceLock::new();
static INTR_RUNS: AtomicU64 = AtomicU64::new(0);

fn intr(_args: &mut [u8]) -> Status {
    INTR_RUNS.fetch_add(1, Ordering::SeqCst);
    Status::Success
}

fn credit_main(_args: &mut [u8]) -> Status {
    let term = lco::new_future(0);
    let pid = process::new(term);
    parallax::call_in(pid, Addr::NULL, *INTR.get().unwrap(), &[], Addr::NULL);
    // quiescence is only reached if the interrupt's credit came home
    lco::wait(term).unwrap();
    lco::delete(term);
    assert_eq!(INTR_RUNS.load(Ordering::SeqCst), 1);
    thread::exit(0, &[])
}

#[test]
fn interrupt_without_continuation_returns_credit() {
    let mut rt = Runtime::new(Config {
        threads: 2,
        ..Config::default()
    })
    .unwrap();
    INTR.set(
        rt.register("intr", Attributes::INTERRUPT | Attributes::MARSHALLED, intr)
            .unwrap(),
    )
    .unwrap();
    let main_act = rt
        .register("credit_main", Attributes::MARSHALLED, credit_main)
        .unwrap();
    assert_eq!(rt.run(main_act, &[]).unwrap(), 0);
}

// === work-first spawning runs the child before the parent continues ===

static ORDER: Mutex<Vec<u64>> = Mutex::new(Vec::new());
static CHILD: OnceLock<Action> = OnceLock::new();

fn child(args: &mut [u8]) -> Status {
    let tag = u64::from_le_bytes(args[..8].try_into().unwrap());
    ORDER.lock().unwrap().push(tag);
    Status::Success
}

fn wf_main(_args: &mut [u8]) -> Status {
    let act = *CHILD.get().unwrap();
    // the first spawn is queued and flips the worker into work-first mode
    parallax::call(Addr::NULL, act, &1u64.to_le_bytes(), Addr::NULL);
    // the second runs depth-first, before we continue
    parallax::call(Addr::NULL, act, &2u64.to_le_bytes(), Addr::NULL);
    ORDER.lock().unwrap().push(100);

    while ORDER.lock().unwrap().len() < 3 {
        thread::yield_now();
    }
    let order = ORDER.lock().unwrap().clone();
    assert_eq!(order, [2, 100, 1]);
    thread::exit(0, &[])
}

#[test]
fn work_first_runs_children_depth_first() {
    let mut rt = Runtime::new(Config {
        threads: 1,
        wf_threshold: 0,
        ..Config::default()
    })
    .unwrap();
    CHILD
        .set(rt.register("child", Attributes::MARSHALLED, child).unwrap())
        .unwrap();
    let main_act = rt
        .register("wf_main", Attributes::MARSHALLED, wf_main)
        .unwrap();
    assert_eq!(rt.run(main_act, &[]).unwrap(), 0);
}

// === SPMD epochs fan in through exit ===

fn spmd_main(_args: &mut [u8]) -> Status {
    thread::exit(7, &0xabad1dea_u64.to_le_bytes())
}

#[test]
fn spmd_epoch_rounds_trip() {
    let mut rt = Runtime::new(Config {
        threads: 2,
        ..Config::default()
    })
    .unwrap();
    let main_act = rt
        .register("spmd_main", Attributes::MARSHALLED, spmd_main)
        .unwrap();
    let (code, out) = rt.run_spmd(main_act, &[], 8).unwrap();
    assert_eq!(code, 7);
    assert_eq!(u64::from_le_bytes(out.try_into().unwrap()), 0xabad1dea);
}
