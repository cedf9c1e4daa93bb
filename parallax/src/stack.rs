// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! User-level thread stacks.
//!
//! A [`Stack`] is the header of one user-level thread: the checkpointed stack
//! pointer, a back-reference to the parcel currently bound to it, and the
//! per-thread bookkeeping the scheduler needs (LCO lock depth, lazy TLS id,
//! soft worker affinity). Headers are reused through per-worker freelists;
//! the mmap'd memory below them is only ever allocated once per header.

use crate::parcel::Parcel;
use fiber::{StackMemory, StackPointer};
use std::ffi::c_void;
use std::io;

/// Soft affinity value meaning "any worker".
pub(crate) const NO_AFFINITY: i32 = -1;

/// TLS id value meaning "not yet assigned".
pub(crate) const NO_TLS_ID: i32 = -1;

pub(crate) struct Stack {
    /// Checkpointed stack pointer of the suspended context.
    pub(crate) sp: StackPointer,
    /// The parcel currently bound to this stack.
    pub(crate) parcel: *mut Parcel,
    /// Freelist link.
    pub(crate) next: *mut Stack,
    /// Number of LCO locks the thread currently holds. While non-zero the
    /// thread will not context-switch except through `wait`.
    pub(crate) lco_depth: u32,
    /// Lazily assigned per-thread identity.
    pub(crate) tls_id: i32,
    /// Worker id this thread is pinned to, or [`NO_AFFINITY`].
    pub(crate) affinity: i32,
    pub(crate) size: usize,
    /// Backing memory; `None` only for the system stack header, which
    /// checkpoints the worker's native stack.
    mem: Option<StackMemory>,
}

impl Stack {
    /// Allocates stack memory and a header, with the initial frame arranged
    /// so the first transfer enters `entry(parcel)`.
    pub(crate) fn alloc(
        size: usize,
        parcel: *mut Parcel,
        entry: fiber::Entry,
    ) -> io::Result<*mut Stack> {
        let mem = StackMemory::new(size)?;
        // Safety: fresh writable stack memory of at least MIN_STACK_SIZE
        let sp = unsafe { fiber::init_frame(mem.top(), entry, parcel.cast::<c_void>()) };
        Ok(Box::into_raw(Box::new(Stack {
            sp,
            parcel,
            next: core::ptr::null_mut(),
            lco_depth: 0,
            tls_id: NO_TLS_ID,
            affinity: NO_AFFINITY,
            size,
            mem: Some(mem),
        })))
    }

    /// Allocates the header for a worker's native stack. Its `sp` is a
    /// placeholder that is overwritten by the first checkpoint out of the
    /// native context.
    pub(crate) fn system() -> *mut Stack {
        Box::into_raw(Box::new(Stack {
            sp: StackPointer::new(usize::MAX).unwrap(),
            parcel: core::ptr::null_mut(),
            next: core::ptr::null_mut(),
            lco_depth: 0,
            tls_id: NO_TLS_ID,
            affinity: NO_AFFINITY,
            size: 0,
            mem: None,
        }))
    }

    /// Rebinds a cached stack to a new parcel, rebuilding the initial frame
    /// in place without touching the backing memory.
    ///
    /// # Safety
    ///
    /// `this` must come off a freelist: no context may be suspended on it.
    pub(crate) unsafe fn reinit(this: *mut Stack, parcel: *mut Parcel, entry: fiber::Entry) {
        // Safety: ensured by caller
        unsafe {
            let stack = &mut *this;
            let mem = stack.mem.as_ref().expect("reinit of the system stack");
            stack.sp = fiber::init_frame(mem.top(), entry, parcel.cast::<c_void>());
            stack.parcel = parcel;
            stack.next = core::ptr::null_mut();
            stack.lco_depth = 0;
            stack.tls_id = NO_TLS_ID;
            stack.affinity = NO_AFFINITY;
        }
    }

    /// Frees a header and its backing memory.
    ///
    /// # Safety
    ///
    /// No context may be suspended on the stack and no parcel may still
    /// reference it.
    pub(crate) unsafe fn dealloc(this: *mut Stack) {
        // Safety: ensured by caller
        drop(unsafe { Box::from_raw(this) });
    }
}
