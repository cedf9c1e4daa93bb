// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Operations available to a running user-level thread.
//!
//! These free functions are the accessor layer over the per-worker state:
//! each call re-reads the current worker, so they stay correct across
//! suspension points after which the thread may find itself on a different
//! worker.

use crate::action::Action;
use crate::error::{Error, Status};
use crate::gas::Addr;
use crate::worker;

/// Cooperatively yields the worker. The thread moves to the global yielded
/// queue, so it cannot immediately re-select itself.
pub fn yield_now() {
    worker::yield_now();
}

/// Terminates the epoch with `code`, delivering `out` as the final output.
/// Never returns.
pub fn exit(code: i32, out: &[u8]) -> ! {
    let w = worker::current();
    w.sched.exit_epoch(code, out);
    worker::finish(Status::Success)
}

/// Terminates the current user-level thread with `status`. Never returns.
///
/// Action handlers usually just return their status; this is for winding up
/// a thread from deeper in its call tree.
pub fn exit_thread(status: Status) -> ! {
    worker::finish(status)
}

/// Sends the current parcel's continuation with `data` as the continued
/// arguments. Without a registered continuation the data is dropped. The
/// conventional tail call of a value-producing handler:
///
/// ```ignore
/// return thread::continue_with(&value.to_le_bytes());
/// ```
pub fn continue_with(data: &[u8]) -> Status {
    worker::continue_with(data)
}

/// Pins the current thread to worker `id`: it migrates there now (through
/// the worker's mailbox) and every later resumption is mailed to that
/// worker.
pub fn set_affinity(id: u32) -> Result<(), Error> {
    worker::set_affinity(id)
}

/// The worker the thread is executing on right now. Stale after any
/// suspension point.
pub fn worker_id() -> u32 {
    worker::current().id
}

/// Lazily assigned identity of the current user-level thread, or -1 when
/// called outside one.
pub fn tls_id() -> i32 {
    worker::tls_id()
}

/// Target address of the currently executing parcel.
pub fn current_target() -> Addr {
    // Safety: raw field read of the live current parcel
    current_ptr().map_or(Addr::NULL, |p| unsafe { (*p).target })
}

/// Action of the currently executing parcel.
pub fn current_action() -> Action {
    // Safety: raw field read of the live current parcel
    current_ptr().map_or(Action::NULL, |p| unsafe { (*p).action })
}

/// Credit carried by the currently executing parcel.
pub fn current_credit() -> u64 {
    // Safety: raw field read of the live current parcel
    current_ptr().map_or(0, |p| unsafe { (*p).credit })
}

/// Local pointer of the pinned target while a `PINNED` action runs; null
/// otherwise.
pub fn current_pinned() -> *mut u8 {
    // Safety: raw field read of the live current parcel
    current_ptr().map_or(std::ptr::null_mut(), |p| unsafe { (*p).pinned })
}

/// The currently executing parcel. Field access goes through raw places so
/// the running handler's payload borrow stays unique.
fn current_ptr() -> Option<*mut crate::parcel::Parcel> {
    let w = worker::try_current()?;
    let cur = w.current.get();
    (!cur.is_null()).then_some(cur)
}
