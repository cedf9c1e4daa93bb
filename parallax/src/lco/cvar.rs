// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::parcel::{Parcel, ParcelRef};
use core::ptr;

/// A condition: the suspended parcels waiting on an LCO plus a sticky error
/// slot.
///
/// A condition has no synchronization of its own; every access happens under
/// the owning LCO's lock. A parcel linked here owns its stack and is on no
/// run queue.
pub(crate) struct Condition {
    head: *mut Parcel,
    /// Error code delivered to waiters; 0 means none.
    error: i32,
}

impl Condition {
    pub(crate) fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            error: 0,
        }
    }

    pub(crate) fn push(&mut self, parcel: ParcelRef) {
        let ptr = parcel.into_ptr();
        // Safety: we own the parcel until somebody pops it
        unsafe {
            (*ptr).next = self.head;
        }
        self.head = ptr;
    }

    /// Detaches the whole waiter list, leaving the condition empty.
    pub(crate) fn take_all(&mut self) -> *mut Parcel {
        core::mem::replace(&mut self.head, ptr::null_mut())
    }

    pub(crate) fn set_error(&mut self, code: i32) {
        self.error = code;
    }

    pub(crate) fn error(&self) -> i32 {
        self.error
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Clears the waiter list and the error slot. Idempotent.
    pub(crate) fn reset(&mut self) {
        debug_assert!(self.is_empty(), "reset with live waiters");
        self.head = ptr::null_mut();
        self.error = 0;
    }
}
