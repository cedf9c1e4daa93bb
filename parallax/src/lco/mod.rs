// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Local control objects.
//!
//! An LCO is a lockable synchronization object: a variant-specific behavior
//! (future, and-gate, reduction) behind one spin lock, together with the
//! condition holding suspended waiter threads and a chain of attached parcels
//! launched on the trigger.
//!
//! Locking discipline: every operation takes the LCO lock first. The lock is
//! never held across a suspension point other than `wait`, which hands the
//! unlock to the checkpoint continuation so a waiter is only stealable after
//! its registers are fully saved. While a thread holds any LCO lock its
//! spawns are queued rather than executed work-first, so the lock is also
//! never held across an involuntary switch.

mod and;
mod cvar;
mod future;
mod reduce;

pub use reduce::ReduceOp;

pub(crate) use cvar::Condition;

use crate::error::Status;
use crate::gas::Addr;
use crate::parcel::ParcelRef;
use crate::worker;
use core::cell::UnsafeCell;
use core::ptr;
use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicBool, Ordering};

/// A single-bit spin lock.
///
/// `lock`/`unlock` additionally maintain the calling thread's LCO lock depth,
/// which the spawn policy consults; the `raw_` variants are for the
/// checkpoint continuation, which balances the depth of the *suspended*
/// thread by hand.
pub(crate) struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub(crate) fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    pub(crate) fn lock(&self) {
        let backoff = Backoff::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }
        worker::lco_depth_changed(1);
    }

    pub(crate) fn unlock(&self) {
        worker::lco_depth_changed(-1);
        self.locked.store(false, Ordering::Release);
    }

    /// Releases the lock bit without touching any thread's lock depth.
    pub(crate) fn raw_unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// Variant-specific behavior of an LCO, dispatched under the lock.
pub(crate) trait Behavior: Send {
    /// Incorporates one contribution; returns true when the LCO fires.
    fn set(&mut self, data: &[u8]) -> bool;
    /// Copies the current value out. Only meaningful once triggered.
    fn get(&self, out: &mut [u8]);
    /// Re-arms the variant.
    fn reset(&mut self);
    fn size(&self) -> usize;
}

struct Inner {
    triggered: bool,
    cvar: Condition,
    /// Parcels attached before the trigger, launched when it fires.
    attached: *mut crate::parcel::Parcel,
    kind: Box<dyn Behavior>,
}

pub(crate) struct Lco {
    lock: SpinLock,
    inner: UnsafeCell<Inner>,
}

// Safety: `inner` is only accessed while `lock` is held.
unsafe impl Send for Lco {}
// Safety: see above.
unsafe impl Sync for Lco {}

impl Lco {
    fn alloc(kind: Box<dyn Behavior>, triggered: bool) -> Addr {
        let lco = Box::new(Lco {
            lock: SpinLock::new(),
            inner: UnsafeCell::new(Inner {
                triggered,
                cvar: Condition::new(),
                attached: ptr::null_mut(),
                kind,
            }),
        });
        Addr::from_ptr(Box::into_raw(lco))
    }

    pub(crate) fn set(&self, data: &[u8]) {
        self.lock.lock();
        // Safety: inner is ours while the lock is held
        let inner = unsafe { &mut *self.inner.get() };
        if !inner.triggered && inner.kind.set(data) {
            trigger(inner);
        }
        self.lock.unlock();
    }

    pub(crate) fn set_error(&self, code: i32) {
        self.lock.lock();
        // Safety: inner is ours while the lock is held
        let inner = unsafe { &mut *self.inner.get() };
        if !inner.triggered {
            inner.cvar.set_error(code);
            trigger(inner);
        }
        self.lock.unlock();
    }

    /// Blocks the calling thread until the LCO triggers, then copies the
    /// value into `out`. Returns the propagated error code, if any.
    ///
    /// No borrow of the inner state is held across the wait: while this
    /// thread is suspended the signaler mutates the condition through its
    /// own access path.
    pub(crate) fn get(&self, out: &mut [u8]) -> Result<(), i32> {
        self.lock.lock();
        loop {
            // Safety: inner is ours while the lock is held; the borrow ends
            // before any suspension
            let triggered = unsafe { (*self.inner.get()).triggered };
            if triggered {
                // Safety: see above
                let inner = unsafe { &mut *self.inner.get() };
                let error = inner.cvar.error();
                if error == 0 {
                    inner.kind.get(out);
                }
                self.lock.unlock();
                return if error == 0 { Ok(()) } else { Err(error) };
            }
            // Safety: a raw place projection, no reference is created
            let cvar = unsafe { &raw mut (*self.inner.get()).cvar };
            // re-acquires the lock before returning
            worker::wait(&self.lock, cvar);
        }
    }

    pub(crate) fn wait(&self) -> Result<(), i32> {
        self.get(&mut [])
    }

    /// Registers `parcel` to be launched when the LCO triggers; launches it
    /// right away if it already has.
    pub(crate) fn attach(&self, parcel: ParcelRef) -> Status {
        self.lock.lock();
        // Safety: inner is ours while the lock is held
        let inner = unsafe { &mut *self.inner.get() };
        if inner.triggered {
            self.lock.unlock();
            worker::current().sched.launch(parcel);
            return Status::Success;
        }
        let ptr = parcel.into_ptr();
        // Safety: the chain owns the parcel until the trigger
        unsafe {
            (*ptr).next = inner.attached;
        }
        inner.attached = ptr;
        self.lock.unlock();
        Status::Success
    }

    pub(crate) fn reset(&self) {
        self.lock.lock();
        // Safety: inner is ours while the lock is held
        let inner = unsafe { &mut *self.inner.get() };
        inner.triggered = false;
        inner.cvar.reset();
        inner.kind.reset();
        self.lock.unlock();
    }

    pub(crate) fn size(&self) -> usize {
        self.lock.lock();
        // Safety: inner is ours while the lock is held
        let size = unsafe { &*self.inner.get() }.kind.size();
        self.lock.unlock();
        size
    }
}

/// Size in bytes of the LCO's value slot.
pub fn size(addr: Addr) -> usize {
    lco_at(addr).size()
}

/// Fires an LCO: launches the attached chain and resumes every waiter.
/// Called with the lock held; only enqueues, never switches.
fn trigger(inner: &mut Inner) {
    inner.triggered = true;

    let mut attached = core::mem::replace(&mut inner.attached, ptr::null_mut());
    while !attached.is_null() {
        // Safety: the chain owned these parcels exclusively
        let parcel = unsafe {
            let next = (*attached).next;
            (*attached).next = ptr::null_mut();
            let p = ParcelRef::from_ptr(attached);
            attached = next;
            p
        };
        worker::current().sched.launch(parcel);
    }

    // extract the whole waiter list in one motion, then relaunch each
    let error = inner.cvar.error();
    let mut waiters = inner.cvar.take_all();
    while !waiters.is_null() {
        // Safety: the condition owned these parcels exclusively
        let waiter = unsafe {
            let next = (*waiters).next;
            (*waiters).next = ptr::null_mut();
            let p = ParcelRef::from_ptr(waiters);
            waiters = next;
            p
        };
        tracing::trace!(?error, waiter = ?waiter.as_ptr(), "resuming waiter");
        worker::resume(waiter);
    }
}

impl Drop for Lco {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        debug_assert!(
            inner.cvar.is_empty(),
            "LCO deleted while threads wait on it"
        );
        // Attached parcels that never fired are dropped with the LCO.
        let mut attached = inner.attached;
        while !attached.is_null() {
            // Safety: the chain owns these parcels
            unsafe {
                let next = (*attached).next;
                ParcelRef::from_ptr(attached).dealloc();
                attached = next;
            }
        }
    }
}

/// Creates a future holding `size` bytes.
pub fn new_future(size: usize) -> Addr {
    Lco::alloc(Box::new(future::Future::new(size)), false)
}

/// Creates an and-gate over `inputs` contributions. A gate over zero inputs
/// is born triggered.
pub fn new_and(inputs: u64) -> Addr {
    Lco::alloc(Box::new(and::And::new(inputs)), inputs == 0)
}

/// Creates a reduction of `inputs` contributions folded onto `init` by `op`.
pub fn new_reduce(inputs: u64, init: &[u8], op: ReduceOp) -> Addr {
    Lco::alloc(Box::new(reduce::Reduce::new(inputs, init, op)), inputs == 0)
}

/// Sets the LCO at `addr` with `data`.
pub fn set(addr: Addr, data: &[u8]) {
    lco_at(addr).set(data);
}

/// Propagates an error code into the LCO at `addr`.
pub fn error(addr: Addr, code: i32) {
    lco_at(addr).set_error(code);
}

/// Waits for the LCO to trigger and returns a copy of its value.
///
/// Returns immediately (without a context switch) when the LCO has already
/// triggered. Blocking on an untriggered LCO requires a scheduler thread.
pub fn get(addr: Addr, size: usize) -> Result<Vec<u8>, i32> {
    let mut out = vec![0; size];
    lco_at(addr).get(&mut out)?;
    Ok(out)
}

/// Waits for the LCO to trigger, discarding its value.
pub fn wait(addr: Addr) -> Result<(), i32> {
    lco_at(addr).wait()
}

/// Re-arms the LCO at `addr`. All waiters must have been resumed.
pub fn reset(addr: Addr) {
    lco_at(addr).reset();
}

/// Attaches `parcel` to be launched when the LCO at `addr` triggers.
pub fn attach(addr: Addr, parcel: ParcelRef) -> Status {
    lco_at(addr).attach(parcel)
}

/// Frees the LCO at `addr`. No thread may be waiting on it.
pub fn delete(addr: Addr) {
    // Safety: `addr` came out of `Lco::alloc` and is deleted exactly once
    unsafe {
        drop(Box::from_raw(addr.as_u64() as *mut Lco));
    }
}

fn lco_at(addr: Addr) -> &'static Lco {
    debug_assert!(!addr.is_null());
    // Safety: LCO addresses come out of `Lco::alloc` and stay valid until
    // `delete`
    unsafe { &*(addr.as_u64() as *const Lco) }
}

// === builtin action handlers ===

/// `lco_set`: the pinned target is an LCO, the payload is its value.
pub(crate) fn lco_set_handler(args: &mut [u8]) -> Status {
    let lco = crate::thread::current_pinned().cast::<Lco>();
    // Safety: PINNED actions run with a valid pinned target
    unsafe { &*lco }.set(args);
    Status::Success
}

/// `lco_error`: the payload carries the propagated error code.
pub(crate) fn lco_error_handler(args: &mut [u8]) -> Status {
    let code = args
        .get(..4)
        .map_or(Status::Error.as_raw(), |b| {
            i32::from_le_bytes(b.try_into().unwrap())
        });
    let lco = crate::thread::current_pinned().cast::<Lco>();
    // Safety: PINNED actions run with a valid pinned target
    unsafe { &*lco }.set_error(code);
    Status::Success
}

/// `lco_delete`: interrupt that frees the target LCO.
pub(crate) fn lco_delete_handler(_args: &mut [u8]) -> Status {
    delete(crate::thread::current_target());
    Status::Success
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn future_round_trip() {
        let value = 0xfeed_beef_u64.to_le_bytes();
        let fut = new_future(8);
        set(fut, &value);
        assert_eq!(get(fut, 8).unwrap(), value);
        // first set wins
        set(fut, &1u64.to_le_bytes());
        assert_eq!(get(fut, 8).unwrap(), value);
        delete(fut);
    }

    #[test]
    fn and_gate_counts_down() {
        let gate = new_and(3);
        set(gate, &[]);
        set(gate, &[]);
        set(gate, &[]);
        assert!(wait(gate).is_ok());
        delete(gate);
    }

    #[test]
    fn empty_and_gate_is_born_triggered() {
        let gate = new_and(0);
        assert!(wait(gate).is_ok());
        delete(gate);
    }

    #[test]
    fn reduce_folds_contributions() {
        fn sum(acc: &mut [u8], contrib: &[u8]) {
            let a = u64::from_le_bytes(acc.try_into().unwrap());
            let c = u64::from_le_bytes(contrib.try_into().unwrap());
            acc.copy_from_slice(&(a + c).to_le_bytes());
        }

        let red = new_reduce(3, &0u64.to_le_bytes(), sum);
        set(red, &1u64.to_le_bytes());
        set(red, &2u64.to_le_bytes());
        set(red, &3u64.to_le_bytes());
        assert_eq!(get(red, 8).unwrap(), 6u64.to_le_bytes());

        reset(red);
        set(red, &5u64.to_le_bytes());
        set(red, &5u64.to_le_bytes());
        set(red, &5u64.to_le_bytes());
        assert_eq!(get(red, 8).unwrap(), 15u64.to_le_bytes());
        delete(red);
    }

    #[test]
    fn error_propagates_to_get() {
        let fut = new_future(8);
        error(fut, 42);
        assert_eq!(get(fut, 8), Err(42));
        delete(fut);
    }

    #[test]
    fn attach_before_trigger_parks_the_parcel() {
        use crate::action::Action;
        use crate::gas::Addr as A;
        use crate::parcel::Parcel;

        let fut = new_future(0);
        // parked on the LCO, reclaimed with it
        attach(fut, Parcel::new(A::NULL, Action::NULL, &[]));
        assert_eq!(size(fut), 0);
        delete(fut);
    }
}
