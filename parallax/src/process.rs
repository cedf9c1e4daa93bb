// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Credit-recovery termination detection.
//!
//! Every freshly launched parcel of a process borrows one unit of credit
//! from the process ledger; child parcels spawned from a running thread
//! borrow their own unit, while a continuation inherits the parent's credit
//! without touching the ledger. When a parcel retires without a continuation
//! its credit is recovered, and the recovery that returns the ledger to zero
//! trips the process's termination LCO.
//!
//! The default process (pid 0) keeps no ledger: the startup epoch terminates
//! through `exit`, not through quiescence.

use crate::gas::Addr;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

struct Entry {
    /// Outstanding credit units.
    debt: u64,
    /// Fired when `debt` returns to zero.
    term: Addr,
}

/// All live processes keyed by pid.
pub(crate) struct ProcessTable {
    inner: Mutex<HashMap<u64, Entry>>,
    next_pid: AtomicU64,
}

impl ProcessTable {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            next_pid: AtomicU64::new(1),
        }
    }

    /// Creates a process whose quiescence triggers `term`.
    pub(crate) fn create(&self, term: Addr) -> u64 {
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().unwrap().insert(pid, Entry { debt: 0, term });
        pid
    }

    /// Borrows `n` credit units against process `pid`.
    pub(crate) fn debit(&self, pid: u64, n: u64) {
        if pid == 0 {
            return;
        }
        if let Some(entry) = self.inner.lock().unwrap().get_mut(&pid) {
            entry.debt += n;
        }
    }

    /// Recovers `n` credit units. Returns the termination LCO when this
    /// recovery settles the ledger.
    pub(crate) fn recover(&self, pid: u64, n: u64) -> Option<Addr> {
        if pid == 0 || n == 0 {
            return None;
        }
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.get_mut(&pid)?;
        debug_assert!(entry.debt >= n, "credit recovered that was never lent");
        entry.debt = entry.debt.saturating_sub(n);
        (entry.debt == 0).then_some(entry.term)
    }
}

/// Creates a new process whose termination (recovery of all outstanding
/// credit) sets the LCO at `term`. Parcels spawned by a thread running on
/// behalf of the process inherit its pid.
///
/// Must be called from a scheduler thread.
pub fn new(term: Addr) -> u64 {
    crate::worker::current().sched.processes.create(term)
}
