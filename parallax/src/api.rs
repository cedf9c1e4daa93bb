// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Spawn conveniences for code running inside the fleet.

use crate::action::{Action, builtin};
use crate::error::Status;
use crate::gas::Addr;
use crate::parcel::Parcel;
use crate::worker;

/// Spawns `action(args)` at `target`. When `result` names an LCO, the
/// thread's continued value is delivered into it.
pub fn call(target: Addr, action: Action, args: &[u8], result: Addr) -> Status {
    let mut p = Parcel::new(target, action, args);
    if !result.is_null() {
        p.set_continuation(result, builtin::LCO_SET);
    }
    worker::current().sched.launch(p);
    Status::Success
}

/// Like [`call`], but the spawned thread runs on behalf of process `pid`,
/// borrowing credit from its ledger.
pub fn call_in(pid: u64, target: Addr, action: Action, args: &[u8], result: Addr) -> Status {
    let mut p = Parcel::new(target, action, args);
    p.set_pid(pid);
    if !result.is_null() {
        p.set_continuation(result, builtin::LCO_SET);
    }
    worker::current().sched.launch(p);
    Status::Success
}

/// Spawns `action(args)` at `target` and forwards its continued value to the
/// *calling* thread's own continuation.
pub fn call_cc(target: Addr, action: Action, args: &[u8]) -> Status {
    let w = worker::current();
    let cur = w.current.get();
    let mut p = Parcel::new(target, action, args);
    // Safety: `cur` is the running parcel; raw field access keeps its
    // handler's payload borrow intact
    unsafe {
        if (*cur).c_action.is_null() || (*cur).continued {
            p.dealloc();
            return Status::Error;
        }
        p.set_continuation((*cur).c_target, (*cur).c_action);
        p.credit = (*cur).credit;
        (*cur).credit = 0;
        (*cur).continued = true;
    }
    w.sched.launch(p);
    Status::Success
}

/// Copies `dst.len()` bytes from the global address `src` into `dst`,
/// setting the LCO at `done` (if any) when the copy has landed.
pub fn memget(dst: &mut [u8], src: Addr, done: Addr) -> Status {
    let sched = &worker::current().sched;
    let Some(ptr) = sched.gas.try_pin(src) else {
        return Status::Error;
    };
    // Safety: the pin guarantees `src` is local and at least `dst.len()`
    // bytes of it are readable per the caller's contract
    unsafe {
        std::ptr::copy_nonoverlapping(ptr.as_ptr(), dst.as_mut_ptr(), dst.len());
    }
    sched.gas.unpin(src);
    if !done.is_null() {
        crate::lco::set(done, &[]);
    }
    Status::Success
}

/// Copies `src` to the global address `dst`, setting the LCO at `done` (if
/// any) when the copy has landed.
pub fn memput(dst: Addr, src: &[u8], done: Addr) -> Status {
    let sched = &worker::current().sched;
    let Some(ptr) = sched.gas.try_pin(dst) else {
        return Status::Error;
    };
    // Safety: the pin guarantees `dst` is local and at least `src.len()`
    // bytes of it are writable per the caller's contract
    unsafe {
        std::ptr::copy_nonoverlapping(src.as_ptr(), ptr.as_ptr(), src.len());
    }
    sched.gas.unpin(dst);
    if !done.is_null() {
        crate::lco::set(done, &[]);
    }
    Status::Success
}

/// Allocates zeroed global memory on this locality.
pub fn gas_alloc(len: usize) -> Addr {
    worker::current().sched.gas.alloc(len)
}

/// Frees memory obtained from [`gas_alloc`].
pub fn gas_free(addr: Addr) {
    worker::current().sched.gas.free(addr);
}

/// Stops the current epoch with `code` from inside the fleet.
pub fn stop(code: i32) {
    worker::current().sched.stop(code);
}
