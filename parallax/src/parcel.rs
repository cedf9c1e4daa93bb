// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Parcels: the unit of dispatch.
//!
//! A parcel names a target address, an action to run there and the marshalled
//! arguments, plus an optional continuation and the credit it carries for
//! termination detection. Parcels are heap blocks moved between queues as raw
//! [`ParcelRef`]s; at any moment a parcel is reachable from exactly one of
//! {worker deque, worker mailbox, global yielded queue, a condition's waiter
//! list, a worker's current slot, the network}. Whoever holds the reference
//! owns the parcel, its payload, and its stack if it has one.

use crate::action::Action;
use crate::gas::Addr;
use crate::stack::Stack;
use crate::worker;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

pub struct Parcel {
    /// Intrusive link for freelists, waiter lists and spawn chains.
    pub(crate) next: *mut Parcel,
    pub(crate) target: Addr,
    pub(crate) action: Action,
    /// Continuation target + action; `Action::NULL` means none.
    pub(crate) c_target: Addr,
    pub(crate) c_action: Action,
    /// Owning process; 0 is the default process, which keeps no ledger.
    pub(crate) pid: u64,
    /// Termination-detection credit. A plain integer: only the process
    /// ledger it is recovered into is shared.
    pub(crate) credit: u64,
    /// The bound stack, null until first bound. Interrupt parcels never bind
    /// one.
    pub(crate) stack: *mut Stack,
    /// Local pointer of the pinned target while a PINNED action runs.
    pub(crate) pinned: *mut u8,
    /// Set once the thread has explicitly sent its continuation.
    pub(crate) continued: bool,
    payload: Box<[u8]>,
}

impl Parcel {
    /// Allocates a parcel. The process id is inherited from the currently
    /// executing parcel, if any.
    pub fn new(target: Addr, action: Action, args: &[u8]) -> ParcelRef {
        let pid = worker::try_current()
            .map(|w| w.current.get())
            .filter(|cur| !cur.is_null())
            // Safety: the current parcel is live; a raw field read does not
            // disturb the borrows its running handler holds
            .map_or(0, |cur| unsafe { (*cur).pid });

        ParcelRef(alloc(Parcel {
            next: core::ptr::null_mut(),
            target,
            action,
            c_target: Addr::NULL,
            c_action: Action::NULL,
            pid,
            credit: 0,
            stack: core::ptr::null_mut(),
            pinned: core::ptr::null_mut(),
            continued: false,
            payload: args.into(),
        }))
    }

    /// Allocates the sentinel parcel that represents a worker's native
    /// context.
    pub(crate) fn system() -> ParcelRef {
        ParcelRef(alloc(Parcel {
            next: core::ptr::null_mut(),
            target: Addr::NULL,
            action: Action::NULL,
            c_target: Addr::NULL,
            c_action: Action::NULL,
            pid: 0,
            credit: 0,
            stack: core::ptr::null_mut(),
            pinned: core::ptr::null_mut(),
            continued: false,
            payload: Box::new([]),
        }))
    }

    pub fn set_continuation(&mut self, target: Addr, action: Action) {
        self.c_target = target;
        self.c_action = action;
    }

    pub fn set_pid(&mut self, pid: u64) {
        self.pid = pid;
    }

    pub fn target(&self) -> Addr {
        self.target
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn credit(&self) -> u64 {
        self.credit
    }

    pub(crate) fn has_continuation(&self) -> bool {
        !self.c_action.is_null()
    }

    /// The marshalled argument buffer, borrowed through a raw place so no
    /// reference to the parcel as a whole is created.
    ///
    /// # Safety
    ///
    /// `this` must be live and nothing else may borrow the payload for `'a`.
    pub(crate) unsafe fn payload_of<'a>(this: *mut Parcel) -> &'a mut [u8] {
        // Safety: ensured by caller
        unsafe { &mut *(&raw mut (*this).payload) }
    }
}

fn alloc(parcel: Parcel) -> NonNull<Parcel> {
    // Safety: Box::into_raw never returns null
    unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(parcel))) }
}

/// An owning reference to a heap parcel.
///
/// Deliberately not `Clone`: moving the reference between queues *is* the
/// ownership transfer described in the module docs.
pub struct ParcelRef(NonNull<Parcel>);

// Safety: a ParcelRef is a unique owner; the parcel and its payload move
// between threads with it.
unsafe impl Send for ParcelRef {}

// references travel through queues as bare words
static_assertions::assert_eq_size!(ParcelRef, usize);

impl ParcelRef {
    /// # Safety
    ///
    /// `ptr` must point to a live parcel not reachable through any other
    /// `ParcelRef`.
    pub(crate) unsafe fn from_ptr(ptr: *mut Parcel) -> ParcelRef {
        debug_assert!(!ptr.is_null());
        // Safety: ensured by caller
        ParcelRef(unsafe { NonNull::new_unchecked(ptr) })
    }

    pub(crate) fn as_ptr(&self) -> *mut Parcel {
        self.0.as_ptr()
    }

    /// Surrenders ownership to a raw pointer (e.g. into an intrusive list).
    pub(crate) fn into_ptr(self) -> *mut Parcel {
        self.0.as_ptr()
    }

    /// Frees the parcel. Its stack, if any, must have been released first.
    pub(crate) unsafe fn dealloc(self) {
        debug_assert!(self.stack.is_null());
        // Safety: unique owner by the type's contract
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }
}

impl Deref for ParcelRef {
    type Target = Parcel;

    fn deref(&self) -> &Parcel {
        // Safety: the reference uniquely owns a live parcel
        unsafe { self.0.as_ref() }
    }
}

impl DerefMut for ParcelRef {
    fn deref_mut(&mut self) -> &mut Parcel {
        // Safety: the reference uniquely owns a live parcel
        unsafe { self.0.as_mut() }
    }
}

impl core::fmt::Debug for Parcel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Parcel")
            .field("target", &self.target)
            .field("action", &self.action)
            .field("c_target", &self.c_target)
            .field("c_action", &self.c_action)
            .field("pid", &self.pid)
            .field("credit", &self.credit)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}
