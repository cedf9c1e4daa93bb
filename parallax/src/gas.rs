// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The global-address-space boundary.
//!
//! The scheduler itself is oblivious to memory layout; it only asks the
//! [`Gas`] implementation to pin a parcel target before running a `PINNED`
//! action and to unpin it afterwards. The bundled [`LocalGas`] maps global
//! addresses one-to-one onto process addresses, which is all a single
//! locality needs.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Mutex;

/// A global address. `NULL` targets mean "anywhere on this locality".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Addr(u64);

impl Addr {
    pub const NULL: Addr = Addr(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn from_raw(raw: u64) -> Addr {
        Addr(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub(crate) fn from_ptr<T>(ptr: *mut T) -> Addr {
        Addr(ptr as usize as u64)
    }
}

/// Address translation consumed by the scheduler.
pub trait Gas: Send + Sync {
    /// Allocates `len` bytes of zeroed global memory.
    fn alloc(&self, len: usize) -> Addr;

    /// Frees memory obtained from [`Gas::alloc`].
    fn free(&self, addr: Addr);

    /// Pins `addr` and returns a local pointer to it, or `None` if the
    /// address is not local (the caller resends the parcel).
    fn try_pin(&self, addr: Addr) -> Option<NonNull<u8>>;

    /// Releases a pin taken with [`Gas::try_pin`].
    fn unpin(&self, addr: Addr);
}

/// Process-local address space: global addresses are machine addresses and
/// pinning always succeeds.
#[derive(Debug, Default)]
pub struct LocalGas {
    /// Tracks allocation lengths so `free` can reconstruct the box.
    allocs: Mutex<HashMap<u64, usize>>,
}

impl LocalGas {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Gas for LocalGas {
    fn alloc(&self, len: usize) -> Addr {
        let block = vec![0u8; len].into_boxed_slice();
        let ptr = Box::into_raw(block).cast::<u8>();
        let addr = Addr::from_ptr(ptr);
        self.allocs.lock().unwrap().insert(addr.as_u64(), len);
        addr
    }

    fn free(&self, addr: Addr) {
        let Some(len) = self.allocs.lock().unwrap().remove(&addr.as_u64()) else {
            return;
        };
        // Safety: we allocated this block in `alloc` with exactly this length
        unsafe {
            let slice = std::ptr::slice_from_raw_parts_mut(addr.as_u64() as *mut u8, len);
            drop(Box::from_raw(slice));
        }
    }

    fn try_pin(&self, addr: Addr) -> Option<NonNull<u8>> {
        NonNull::new(addr.as_u64() as *mut u8)
    }

    fn unpin(&self, _addr: Addr) {}
}
