// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A Michael-Scott two-lock FIFO queue.
//!
//! One lock guards the head (dequeue side), one the tail (enqueue side), and a
//! sentinel node keeps the two sides from ever touching the same node while
//! the queue is non-empty. Producers only ever contend with producers and
//! consumers with consumers.

use crate::loom::sync::Mutex;
use crate::loom::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use core::ptr;
use crossbeam_utils::CachePadded;

struct Node<T> {
    /// `None` only for the sentinel.
    value: Option<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    fn alloc(value: Option<T>) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            value,
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

/// One end of the queue; the pointer is only dereferenced under the lock
/// that owns it.
struct End<T>(*mut Node<T>);

// Safety: the node pointer is only touched while the surrounding Mutex is
// held, and nodes themselves only move between threads together with their
// `T`.
unsafe impl<T: Send> Send for End<T> {}

/// An unbounded multi-producer FIFO queue.
pub struct TwoLockQueue<T> {
    head: CachePadded<Mutex<End<T>>>,
    tail: CachePadded<Mutex<End<T>>>,
    len: AtomicUsize,
}

impl<T> TwoLockQueue<T> {
    pub fn new() -> Self {
        let sentinel = Node::alloc(None);
        Self {
            head: CachePadded::new(Mutex::new(End(sentinel))),
            tail: CachePadded::new(Mutex::new(End(sentinel))),
            len: AtomicUsize::new(0),
        }
    }

    /// Appends an element at the tail.
    pub fn enqueue(&self, value: T) {
        let node = Node::alloc(Some(value));
        let mut tail = self.tail.lock().unwrap();
        // Safety: the tail node is owned by the queue and we hold the tail
        // lock
        unsafe {
            (*tail.0).next.store(node, Ordering::Release);
        }
        tail.0 = node;
        drop(tail);
        self.len.fetch_add(1, Ordering::Relaxed);
    }

    /// Removes the element at the head, if any.
    pub fn dequeue(&self) -> Option<T> {
        let mut head = self.head.lock().unwrap();
        let sentinel = head.0;
        // Safety: the sentinel is owned by the queue and we hold the head lock
        let next = unsafe { (*sentinel).next.load(Ordering::Acquire) };
        if next.is_null() {
            return None;
        }

        // Safety: `next` is fully initialized (the Release store in enqueue
        // happens-before our Acquire load) and becomes the new sentinel; the
        // old sentinel is ours to free.
        let value = unsafe {
            let value = (*next).value.take();
            head.0 = next;
            drop(head);
            drop(Box::from_raw(sentinel));
            value
        };
        self.len.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(value.is_some());
        value
    }

    /// Number of queued elements; approximate under concurrency.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for TwoLockQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: elements are handed to exactly one consumer; both ends are behind
// locks.
unsafe impl<T: Send> Send for TwoLockQueue<T> {}
// Safety: see above.
unsafe impl<T: Send> Sync for TwoLockQueue<T> {}

impl<T> Drop for TwoLockQueue<T> {
    fn drop(&mut self) {
        let mut node = self.head.lock().unwrap().0;
        // Safety: exclusive access, free the sentinel and every queued node
        unsafe {
            while !node.is_null() {
                let boxed = Box::from_raw(node);
                node = boxed.next.load(Ordering::Relaxed);
            }
        }
    }
}
