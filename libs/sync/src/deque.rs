// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A Chase-Lev work-stealing deque.
//!
//! The [`Worker`] half is owned by a single thread which pushes and pops at
//! the *bottom* of the deque, giving LIFO scheduling for its own work.
//! [`Stealer`] halves may be shared freely; thieves pop at the *top* (the
//! oldest element) with a CAS, so stealing yields the breadth-first end of the
//! owner's spawn tree.
//!
//! The backing buffer grows by doubling. Buffers abandoned by growth are
//! parked on a retirement list and reclaimed when the deque itself is dropped,
//! which keeps in-flight reads by thieves valid without a full epoch scheme.

use crate::loom::sync::atomic::{AtomicIsize, AtomicPtr, Ordering, fence};
use crate::loom::sync::{Arc, Mutex};
use core::marker::PhantomData;
use core::mem;
use core::mem::MaybeUninit;
use crossbeam_utils::CachePadded;

const MIN_CAP: usize = 64;

/// The result of a steal attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Steal<T> {
    /// The deque was empty.
    Empty,
    /// One element was stolen.
    Success(T),
    /// Lost a race with another thief or the owner; worth retrying.
    Retry,
}

impl<T> Steal<T> {
    pub fn success(self) -> Option<T> {
        match self {
            Steal::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Steal::Retry)
    }
}

struct Buffer<T> {
    ptr: *mut MaybeUninit<T>,
    cap: usize,
}

impl<T> Buffer<T> {
    fn alloc(cap: usize) -> *mut Buffer<T> {
        debug_assert!(cap.is_power_of_two());
        let mut storage = Vec::<MaybeUninit<T>>::with_capacity(cap);
        // Safety: MaybeUninit does not require initialization
        unsafe { storage.set_len(cap) };
        let ptr = Box::into_raw(storage.into_boxed_slice()).cast::<MaybeUninit<T>>();
        Box::into_raw(Box::new(Buffer { ptr, cap }))
    }

    /// # Safety
    ///
    /// Must only be called once nothing references the buffer anymore.
    unsafe fn dealloc(this: *mut Buffer<T>) {
        // Safety: ensured by caller
        unsafe {
            let buffer = Box::from_raw(this);
            let slice = core::ptr::slice_from_raw_parts_mut(buffer.ptr, buffer.cap);
            drop(Box::from_raw(slice));
        }
    }

    fn slot(&self, index: isize) -> *mut MaybeUninit<T> {
        // indices grow monotonically, the slot is index modulo capacity
        self.ptr.wrapping_add(index as usize & (self.cap - 1))
    }

    /// # Safety
    ///
    /// The slot must currently be unclaimed (owner side only).
    unsafe fn write(&self, index: isize, value: T) {
        // Safety: ensured by caller
        unsafe { self.slot(index).write(MaybeUninit::new(value)) }
    }

    /// # Safety
    ///
    /// The slot must have been written. The returned value is only *owned* if
    /// the subsequent index CAS succeeds; on failure it must be forgotten.
    unsafe fn read(&self, index: isize) -> T {
        // Safety: ensured by caller
        unsafe { self.slot(index).read().assume_init() }
    }
}

struct Inner<T> {
    /// Thieves advance `top` with a CAS.
    top: CachePadded<AtomicIsize>,
    /// Only the owner moves `bottom`.
    bottom: CachePadded<AtomicIsize>,
    buffer: AtomicPtr<Buffer<T>>,
    /// Buffers replaced by growth, freed on drop.
    retired: Mutex<Vec<*mut Buffer<T>>>,
}

impl<T> Inner<T> {
    /// Replaces the buffer with one of twice the capacity, copying the live
    /// range `top..bottom`. Owner side only.
    fn grow(&self, old: *mut Buffer<T>, top: isize, bottom: isize) -> *mut Buffer<T> {
        // Safety: the owner is the only writer, the buffer stays alive on the
        // retired list for any in-flight thief reads
        unsafe {
            let new = Buffer::alloc((*old).cap * 2);
            for i in top..bottom {
                core::ptr::copy_nonoverlapping((*old).slot(i), (*new).slot(i), 1);
            }
            self.buffer.store(new, Ordering::Release);
            self.retired.lock().unwrap().push(old);
            new
        }
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let top = self.top.load(Ordering::Relaxed);
        let bottom = self.bottom.load(Ordering::Relaxed);
        let buffer = self.buffer.load(Ordering::Relaxed);

        // Safety: we are the last reference, nothing races anymore
        unsafe {
            for i in top..bottom {
                drop((*buffer).read(i));
            }
            Buffer::dealloc(buffer);
            for retired in self.retired.lock().unwrap().drain(..) {
                Buffer::dealloc(retired);
            }
        }
    }
}

/// The owner half of the deque. `Send` but deliberately not `Sync` or
/// `Clone`: exactly one thread pushes and pops the bottom.
pub struct Worker<T> {
    inner: Arc<Inner<T>>,
    _not_sync: PhantomData<core::cell::Cell<()>>,
}

/// The thief half of the deque, freely shareable.
pub struct Stealer<T> {
    inner: Arc<Inner<T>>,
}

// Safety: the queue hands each element to exactly one consumer; only `T`s
// ownership moves between threads.
unsafe impl<T: Send> Send for Worker<T> {}
// Safety: see above; all shared state is accessed through atomics.
unsafe impl<T: Send> Send for Stealer<T> {}
// Safety: see above.
unsafe impl<T: Send> Sync for Stealer<T> {}

/// Creates a new deque, returning the owner and thief halves.
pub fn deque<T>() -> (Worker<T>, Stealer<T>) {
    let inner = Arc::new(Inner {
        top: CachePadded::new(AtomicIsize::new(0)),
        bottom: CachePadded::new(AtomicIsize::new(0)),
        buffer: AtomicPtr::new(Buffer::alloc(MIN_CAP)),
        retired: Mutex::new(Vec::new()),
    });
    (
        Worker {
            inner: inner.clone(),
            _not_sync: PhantomData,
        },
        Stealer { inner },
    )
}

impl<T> Worker<T> {
    /// Pushes an element onto the bottom of the deque.
    pub fn push(&self, value: T) {
        let b = self.inner.bottom.load(Ordering::Relaxed);
        let t = self.inner.top.load(Ordering::Acquire);
        let mut buffer = self.inner.buffer.load(Ordering::Relaxed);

        // Safety: buffer is valid until the deque drops; only we write slots
        unsafe {
            if b - t >= (*buffer).cap as isize {
                buffer = self.inner.grow(buffer, t, b);
            }
            (*buffer).write(b, value);
        }
        self.inner.bottom.store(b + 1, Ordering::Release);
    }

    /// Pops the most recently pushed element (LIFO).
    pub fn pop(&self) -> Option<T> {
        let b = self.inner.bottom.load(Ordering::Relaxed) - 1;
        let buffer = self.inner.buffer.load(Ordering::Relaxed);
        self.inner.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = self.inner.top.load(Ordering::Relaxed);

        if t <= b {
            // Safety: t..=b are written and the claim is settled below
            let value = unsafe { (*buffer).read(b) };
            if t == b {
                // last element, race any thief for it
                if self
                    .inner
                    .top
                    .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                    .is_err()
                {
                    // the thief got it first
                    mem::forget(value);
                    self.inner.bottom.store(b + 1, Ordering::Relaxed);
                    return None;
                }
                self.inner.bottom.store(b + 1, Ordering::Relaxed);
            }
            Some(value)
        } else {
            // the deque was empty, undo the reservation
            self.inner.bottom.store(b + 1, Ordering::Relaxed);
            None
        }
    }

    /// Number of elements currently in the deque. Exact only on the owning
    /// thread.
    pub fn len(&self) -> usize {
        let b = self.inner.bottom.load(Ordering::Relaxed);
        let t = self.inner.top.load(Ordering::Relaxed);
        usize::try_from(b - t).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates another thief handle.
    pub fn stealer(&self) -> Stealer<T> {
        Stealer {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Stealer<T> {
    /// Attempts to steal the oldest element from the top of the deque.
    pub fn steal(&self) -> Steal<T> {
        let t = self.inner.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.inner.bottom.load(Ordering::Acquire);

        if b - t <= 0 {
            return Steal::Empty;
        }

        let buffer = self.inner.buffer.load(Ordering::Acquire);
        // Safety: the slot was written before `bottom` advanced past it; if
        // our claim below fails the value is forgotten, so ownership is never
        // duplicated. Replaced buffers stay alive on the retired list.
        let value = unsafe { (*buffer).read(t) };

        if self
            .inner
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            mem::forget(value);
            return Steal::Retry;
        }

        Steal::Success(value)
    }
}

impl<T> Clone for Stealer<T> {
    fn clone(&self) -> Self {
        Stealer {
            inner: self.inner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loom;

    #[test]
    fn owner_is_lifo() {
        loom::model(|| {
            let (worker, _stealer) = deque::<u32>();
            worker.push(1);
            worker.push(2);
            worker.push(3);
            assert_eq!(worker.pop(), Some(3));
            assert_eq!(worker.pop(), Some(2));
            assert_eq!(worker.pop(), Some(1));
            assert_eq!(worker.pop(), None);
        });
    }

    #[test]
    fn thief_takes_the_oldest() {
        loom::model(|| {
            let (worker, stealer) = deque::<u32>();
            worker.push(1);
            worker.push(2);
            assert_eq!(stealer.steal(), Steal::Success(1));
            assert_eq!(worker.pop(), Some(2));
        });
    }

    #[test]
    fn empty_steal_does_not_block() {
        loom::model(|| {
            let (_worker, stealer) = deque::<u32>();
            assert_eq!(stealer.steal(), Steal::Empty);
        });
    }

    #[test]
    fn growth_preserves_contents() {
        let (worker, _stealer) = deque::<usize>();
        for i in 0..(MIN_CAP * 4) {
            worker.push(i);
        }
        for i in (0..(MIN_CAP * 4)).rev() {
            assert_eq!(worker.pop(), Some(i));
        }
    }

    #[test]
    fn concurrent_steal_is_exactly_once() {
        loom::model(|| {
            let (worker, stealer) = deque::<usize>();
            let n = 4;
            for i in 0..n {
                worker.push(i);
            }

            let thief = loom::thread::spawn(move || {
                let mut got = Vec::new();
                loop {
                    match stealer.steal() {
                        Steal::Success(v) => got.push(v),
                        Steal::Empty => break,
                        Steal::Retry => {}
                    }
                }
                got
            });

            let mut mine = Vec::new();
            while let Some(v) = worker.pop() {
                mine.push(v);
            }

            let mut all = thief.join().unwrap();
            all.extend(mine);
            all.sort_unstable();
            assert_eq!(all, (0..n).collect::<Vec<_>>());
        });
    }
}
