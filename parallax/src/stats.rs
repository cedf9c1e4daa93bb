// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-worker event counters, updated with relaxed stores on the hot path
/// and summed on demand.
#[derive(Debug, Default)]
pub(crate) struct WorkerStats {
    pub(crate) spawns: AtomicU64,
    pub(crate) threads: AtomicU64,
    pub(crate) steals: AtomicU64,
    pub(crate) mail: AtomicU64,
    pub(crate) yields: AtomicU64,
    pub(crate) stacks: AtomicU64,
}

impl WorkerStats {
    #[inline]
    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time aggregate of all workers' counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Parcels routed through the spawn path.
    pub spawns: u64,
    /// User-level threads run to completion or first suspension.
    pub threads: u64,
    /// Successful steals from peers.
    pub steals: u64,
    /// Parcels received through mailboxes.
    pub mail: u64,
    /// Cooperative yields.
    pub yields: u64,
    /// Stacks allocated fresh (not reused from a freelist).
    pub stacks: u64,
}

impl Stats {
    pub(crate) fn add(&mut self, w: &WorkerStats) {
        self.spawns += w.spawns.load(Ordering::Relaxed);
        self.threads += w.threads.load(Ordering::Relaxed);
        self.steals += w.steals.load(Ordering::Relaxed);
        self.mail += w.mail.load(Ordering::Relaxed);
        self.yields += w.yields.load(Ordering::Relaxed);
        self.stacks += w.stacks.load(Ordering::Relaxed);
    }
}
