// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The worker: one native thread multiplexing user-level threads.
//!
//! A worker owns the bottom of its Chase-Lev deque, the consumption of its
//! mailbox, its stack freelist and its `current` parcel; everything shared
//! lives in the scheduler's per-worker [`Remote`]. The schedule procedure
//! polls, in order: mail, the own deque (LIFO), then — coin-flipped — the
//! global yielded queue and a random victim's deque.
//!
//! Execution flows through symmetric stack switches. Every switch names a
//! checkpoint continuation that runs on the destination stack *after* the
//! outgoing context is saved; publishing the suspended thread (to the deque,
//! the yielded queue, a mailbox) or releasing its LCO lock only happens
//! there, so no one can resume a thread whose registers are still live.
//!
//! Code that runs on a user-level stack must re-read [`current`] after any
//! potential suspension point: a thread may be stolen or mailed while
//! suspended and resume on a different worker.

use crate::action::Attributes;
use crate::action::builtin;
use crate::error::{Error, Status};
use crate::lco::{Condition, SpinLock};
use crate::parcel::{Parcel, ParcelRef};
use crate::scheduler::{Remote, Scheduler, State};
use crate::stack::{NO_TLS_ID, Stack};
use crate::stats::WorkerStats;
use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::panic::AssertUnwindSafe;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;
use sync::deque;

std::thread_local! {
    static WORKER: Cell<*const Worker> = const { Cell::new(ptr::null()) };
}

/// The current worker, if the calling thread is a scheduler thread.
///
/// The returned reference must not be held across a suspension point; re-read
/// it instead.
pub(crate) fn try_current<'a>() -> Option<&'a Worker> {
    let ptr = WORKER.with(Cell::get);
    // Safety: the pointer is published for exactly as long as the worker
    // runs, and the worker outlives every user-level thread it executes
    unsafe { ptr.as_ref() }
}

#[track_caller]
pub(crate) fn current<'a>() -> &'a Worker {
    try_current().expect("not on a scheduler thread")
}

pub(crate) struct Worker {
    pub(crate) id: u32,
    pub(crate) sched: Arc<Scheduler>,
    /// Owner half of the work-stealing deque.
    queue: deque::Worker<ParcelRef>,
    rng: RefCell<fastrand::Rng>,
    /// The parcel executing right now (the system parcel while in the
    /// scheduling loop).
    pub(crate) current: Cell<*mut Parcel>,
    /// Sentinel parcel owning the native stack.
    system: Cell<*mut Parcel>,
    /// LIFO freelist of cached stacks.
    freelist: Cell<*mut Stack>,
    cached: Cell<usize>,
    /// When set, spawns transfer to the child immediately.
    work_first: Cell<bool>,
    /// Set while this worker's thread is parking itself on the yielded
    /// queue; keeps the schedule procedure off that queue meanwhile.
    yielded: Cell<bool>,
    exit_code: Cell<i32>,
}

impl Worker {
    /// Body of a worker OS thread.
    pub(crate) fn main(sched: Arc<Scheduler>, id: u32, queue: deque::Worker<ParcelRef>) {
        let system = Parcel::system().into_ptr();
        // Safety: fresh allocations; the system parcel gets a memory-less
        // stack header to checkpoint the native context into
        unsafe {
            (*system).stack = Stack::system();
            (*(*system).stack).parcel = system;
        }

        let worker = Box::new(Worker {
            id,
            sched,
            queue,
            rng: RefCell::new(fastrand::Rng::with_seed(u64::from(id) + 1)),
            current: Cell::new(system),
            system: Cell::new(system),
            freelist: Cell::new(ptr::null_mut()),
            cached: Cell::new(0),
            work_first: Cell::new(false),
            yielded: Cell::new(false),
            exit_code: Cell::new(0),
        });

        WORKER.with(|w| w.set(&raw const *worker));
        worker.run();
        WORKER.with(|w| w.set(ptr::null()));

        worker.teardown(system);
    }

    fn run(&self) {
        let _span = tracing::debug_span!("worker main loop", worker = self.id).entered();

        loop {
            match self.sched.state() {
                State::Shutdown => break,
                State::Stop => {
                    // drained; hold position until the starter turns the
                    // lights off
                    std::thread::sleep(Duration::from_micros(50));
                    continue;
                }
                State::Run => {}
            }

            if let Some(p) = self.schedule(true) {
                self.execute(p);
            }
        }

        tracing::debug!(worker = self.id, "shutting down");
    }

    /// The schedule procedure. With `block` it polls (with a short sleep)
    /// until it finds work or the epoch ends; without, it returns `None` on
    /// the first exhausted pass so a vacating thread can fall back to the
    /// system context promptly.
    fn schedule(&self, block: bool) -> Option<ParcelRef> {
        loop {
            if self.sched.state() != State::Run {
                return None;
            }

            self.handle_mail();

            if let Some(p) = self.pop_lifo() {
                return Some(p);
            }

            let steal_first = self.rng.borrow_mut().bool();
            let found = if steal_first {
                self.try_steal().or_else(|| self.try_yielded())
            } else {
                self.try_yielded().or_else(|| self.try_steal())
            };
            if found.is_some() {
                return found;
            }

            if !block {
                return None;
            }
            std::thread::sleep(Duration::from_micros(1));
        }
    }

    /// Moves everything the mailbox holds onto the own deque. Mail is
    /// FIFO-ordered per producer up to this point.
    fn handle_mail(&self) {
        while let Some(p) = self.remote().mailbox.dequeue() {
            WorkerStats::inc(&self.remote().stats.mail);
            tracing::trace!(worker = self.id, parcel = ?p.as_ptr(), "mail received");
            self.push_lifo(p);
        }
    }

    fn pop_lifo(&self) -> Option<ParcelRef> {
        let popped = self.queue.pop();
        if popped.is_some() {
            self.work_first.set(false);
        }
        popped
    }

    pub(crate) fn push_lifo(&self, p: ParcelRef) {
        self.queue.push(p);
        if self.queue.len() > self.sched.config.wf_threshold {
            self.work_first.set(true);
        }
    }

    fn try_yielded(&self) -> Option<ParcelRef> {
        if self.yielded.get() {
            return None;
        }
        let p = self.sched.yielded.dequeue()?;
        self.keep_or_forward(p)
    }

    fn try_steal(&self) -> Option<ParcelRef> {
        let n = self.sched.remotes.len();
        if n <= 1 {
            return None;
        }
        // uniformly random victim that isn't us
        let mut victim = self.rng.borrow_mut().usize(0..n - 1);
        if victim >= self.id as usize {
            victim += 1;
        }
        let stolen = self.sched.remotes[victim].stealer.steal().success()?;
        let stolen = self.keep_or_forward(stolen)?;
        WorkerStats::inc(&self.remote().stats.steals);
        tracing::trace!(worker = self.id, victim, parcel = ?stolen.as_ptr(), "stole");
        Some(stolen)
    }

    /// Keeps a parcel taken from a shared queue unless it is soft-pinned to
    /// another worker, in which case it travels on through that worker's
    /// mailbox.
    fn keep_or_forward(&self, p: ParcelRef) -> Option<ParcelRef> {
        // Safety: the parcel is live; a suspended one owns its stack
        let stack = unsafe { (*p.as_ptr()).stack };
        if stack.is_null() {
            return Some(p);
        }
        // Safety: see above
        let affinity = unsafe { (*stack).affinity };
        if affinity >= 0 && affinity != self.id as i32 {
            self.sched.remotes[affinity as usize].mailbox.enqueue(p);
            return None;
        }
        Some(p)
    }

    /// Routes a freshly spawned parcel.
    pub(crate) fn spawn(&self, p: ParcelRef) {
        WorkerStats::inc(&self.remote().stats.spawns);

        let cur = self.current.get();
        // not running user code (yet), or winding down: just queue it
        if cur.is_null() || cur == self.system.get() {
            return self.push_lifo(p);
        }
        if self.sched.state() != State::Run {
            return self.push_lifo(p);
        }
        // Safety: `current` is live while it runs
        let cur_stack = unsafe { (*cur).stack };
        // a thread holding an LCO lock must not switch
        if !cur_stack.is_null() && unsafe { (*cur_stack).lco_depth } > 0 {
            return self.push_lifo(p);
        }
        // Safety: the spawned parcel is live
        let action = unsafe { (*p.as_ptr()).action };
        if self.sched.table.attrs(action).contains(Attributes::INTERRUPT) {
            return self.run_interrupt(p);
        }
        // an interrupt has no stack of its own to suspend
        if cur_stack.is_null() {
            return self.push_lifo(p);
        }
        if !self.work_first.get() {
            return self.push_lifo(p);
        }

        // Work-first: run the child immediately; the checkpoint continuation
        // parks the parent on our deque, where thieves find the breadth of
        // the spawn tree.
        let p = self.bind(p);
        switch(p, cont_push, ptr::null_mut());
    }

    /// Runs one parcel from the scheduling loop (the native context).
    fn execute(&self, p: ParcelRef) {
        // Safety: the parcel is live
        let action = unsafe { (*p.as_ptr()).action };
        if self.sched.table.attrs(action).contains(Attributes::INTERRUPT) {
            return self.run_interrupt(p);
        }
        let p = self.bind(p);
        switch(p, cont_null, ptr::null_mut());
        // back in the native context; the loop picks up from here
    }

    /// Runs an interrupt inline on whatever stack is current.
    fn run_interrupt(&self, mut p: ParcelRef) {
        let saved = self.current.replace(p.as_ptr());
        let status = invoke(p.as_ptr());
        self.current.set(saved);

        match status {
            Status::Resend => self.sched.launch(p),
            status => {
                // Safety: the handler has returned, the parcel is ours
                let has_cont = unsafe { !(*p.as_ptr()).c_action.is_null() };
                if status == Status::Error && !has_cont {
                    self.exit_code.set(self.exit_code.get().max(1));
                }
                retire(&self.sched, p.as_ptr(), status);
                // Safety: interrupts never bind a stack
                unsafe { p.dealloc() };
            }
        }
    }

    /// Ensures `p` has a stack, taking one from the freelist when possible.
    fn bind(&self, mut p: ParcelRef) -> ParcelRef {
        // Safety: the parcel is live
        if unsafe { !(*p.as_ptr()).stack.is_null() } {
            return p;
        }
        WorkerStats::inc(&self.remote().stats.threads);

        let head = self.freelist.get();
        let stack = if head.is_null() {
            WorkerStats::inc(&self.remote().stats.stacks);
            Stack::alloc(self.sched.config.stack_size, p.as_ptr(), thread_entry)
                .expect("failed to allocate a user-level stack")
        } else {
            // Safety: freelist stacks are exclusively ours and unreferenced
            unsafe {
                self.freelist.set((*head).next);
                self.cached.set(self.cached.get() - 1);
                Stack::reinit(head, p.as_ptr(), thread_entry);
            }
            head
        };
        p.stack = stack;
        p
    }

    /// Returns a stack to the cache, trimming the cache to half the limit
    /// when it overflows.
    pub(crate) fn release_stack(&self, parcel: *mut Parcel) {
        // Safety: the thread is off this stack for good; field-granular
        // access only
        let stack = unsafe { std::mem::replace(&mut (*parcel).stack, ptr::null_mut()) };
        if stack.is_null() {
            return;
        }
        // Safety: the owning thread has terminated, nothing references the
        // stack anymore
        unsafe {
            (*stack).parcel = ptr::null_mut();
            (*stack).next = self.freelist.get();
        }
        self.freelist.set(stack);

        let mut count = self.cached.get() + 1;
        let limit = self.sched.config.stack_cache_limit;
        if count > limit {
            while count > limit / 2 {
                let head = self.freelist.get();
                // Safety: our own freelist entries
                unsafe {
                    self.freelist.set((*head).next);
                    Stack::dealloc(head);
                }
                count -= 1;
            }
        }
        self.cached.set(count);
    }

    /// Picks the next context for a vacating thread without blocking: some
    /// runnable parcel, or the system context.
    fn schedule_vacate(&self) -> ParcelRef {
        if let Some(p) = self.schedule(false) {
            return self.bind(p);
        }
        // Safety: the system parcel lives until worker teardown; the
        // reference is consumed by the switch and never freed
        unsafe { ParcelRef::from_ptr(self.system.get()) }
    }

    fn remote(&self) -> &Remote {
        &self.sched.remotes[self.id as usize]
    }

    /// Frees everything still queued when the epoch ends: parcels that were
    /// spawned but never executed, cached stacks, and the system context.
    fn teardown(&self, system: *mut Parcel) {
        while let Some(p) = self.queue.pop() {
            dispose(p);
        }
        while let Some(p) = self.remote().mailbox.dequeue() {
            dispose(p);
        }

        let mut stack = self.freelist.get();
        while !stack.is_null() {
            // Safety: freelist stacks are unreferenced
            unsafe {
                let next = (*stack).next;
                Stack::dealloc(stack);
                stack = next;
            }
        }
        self.freelist.set(ptr::null_mut());

        // Safety: the native context is done with its header
        unsafe {
            Stack::dealloc((*system).stack);
            (*system).stack = ptr::null_mut();
            ParcelRef::from_ptr(system).dealloc();
        }

        self.sched.worker_exited(self.exit_code.get());
    }
}

/// Frees an abandoned parcel and, if it owns one, its stack.
pub(crate) fn dispose(p: ParcelRef) {
    // Safety: the parcel is ours and will never run again
    let stack = unsafe { std::mem::replace(&mut (*p.as_ptr()).stack, ptr::null_mut()) };
    if !stack.is_null() {
        // Safety: the parcel owned this stack exclusively
        unsafe {
            (*stack).parcel = ptr::null_mut();
            Stack::dealloc(stack);
        }
    }
    // Safety: ownership ends here
    unsafe { p.dealloc() };
}

/// Transfers to `to`, running `cont(prev, env)` on its stack once the
/// current context is checkpointed.
///
/// After this returns the thread may be executing on a *different* worker;
/// callers must not reuse any state captured before the call.
fn switch(to: ParcelRef, cont: fiber::Continuation, env: *mut c_void) -> i32 {
    let to_ptr = to.into_ptr();
    let prev;
    let save;
    let to_sp;
    {
        let w = current();
        // Safety: both parcels are live and `to` has a bound stack
        unsafe {
            to_sp = (*(*to_ptr).stack).sp;
            prev = w.current.replace(to_ptr);
            debug_assert!(!prev.is_null() && !(*prev).stack.is_null());
            save = &raw mut (*(*prev).stack).sp;
        }
    }
    // Safety: `to` is suspended (or fresh) and owned by us; `save` points
    // into the outgoing stack header which outlives the suspension
    unsafe { fiber::transfer(prev.cast::<c_void>(), env, cont, save, to_sp) }
}

/// Entry point of every user-level thread.
unsafe extern "C" fn thread_entry(arg: *mut c_void) -> ! {
    let status = invoke(arg.cast::<Parcel>());
    finish(status)
}

/// Looks up and runs a parcel's action handler, handling pinning and
/// containing panics. May return on a different worker than it started on.
///
/// The parcel is accessed through raw field places only: the handler holds
/// the (unique) payload borrow, and runtime calls it makes — continuing,
/// spawning, reading its own identity — touch the other fields concurrently.
fn invoke(p: *mut Parcel) -> Status {
    // the Arc clone survives a migration; worker references would not
    let sched = current().sched.clone();

    // Safety: `p` is the live parcel being executed
    let (action, target) = unsafe { ((*p).action, (*p).target) };

    let Some(entry) = sched.table.entry(action) else {
        tracing::error!(?action, "parcel names an unknown action");
        return Status::Error;
    };
    let attrs = entry.attrs;
    let handler = entry.handler;
    let name = entry.name;

    if attrs.contains(Attributes::PINNED) {
        match sched.gas.try_pin(target) {
            // Safety: see above
            Some(pinned) => unsafe { (*p).pinned = pinned.as_ptr() },
            None => return Status::Resend,
        }
    }

    tracing::trace!(action = name, parcel = ?p, "executing");
    // Safety: the payload is borrowed for exactly the handler's run
    let payload = unsafe { Parcel::payload_of(p) };
    // A panic must not unwind into the context-switch machinery; it is
    // contained here, on the stack it was raised on, and becomes a status.
    // A panicking handler is a bug, not a recoverable condition: the epoch
    // is stopped so the failure surfaces instead of wedging the starter.
    let status =
        std::panic::catch_unwind(AssertUnwindSafe(|| handler(payload))).unwrap_or_else(|_| {
            tracing::error!(action = name, "action panicked");
            sched.stop(101);
            Status::Error
        });

    if attrs.contains(Attributes::PINNED) {
        sched.gas.unpin(target);
        // Safety: see above
        unsafe { (*p).pinned = ptr::null_mut() };
    }
    status
}

/// Epilogue of a parcel that ran to completion: send the continuation or
/// recover the credit.
fn retire(sched: &Scheduler, p: *mut Parcel, status: Status) {
    // Safety: `p` is live and its handler has returned or been abandoned
    unsafe {
        let has_cont = !(*p).c_action.is_null();
        match status {
            Status::Error | Status::LcoError if has_cont && !(*p).continued => {
                // the error code travels to the continuation as an LCO error
                let code = status.as_raw().to_le_bytes();
                send_continuation(sched, p, &code, builtin::LCO_ERROR);
            }
            _ => {
                if has_cont && !(*p).continued {
                    let c_action = (*p).c_action;
                    send_continuation(sched, p, &[], c_action);
                } else if !(*p).continued {
                    let recovered = sched.processes.recover((*p).pid, (*p).credit);
                    (*p).credit = 0;
                    if let Some(term) = recovered {
                        crate::lco::set(term, &[]);
                    }
                }
            }
        }
    }
}

fn send_continuation(sched: &Scheduler, p: *mut Parcel, data: &[u8], action: crate::action::Action) {
    // Safety: `p` is live; raw field access keeps any payload borrow a
    // running handler holds intact
    unsafe {
        let mut c = Parcel::new((*p).c_target, action, data);
        c.set_pid((*p).pid);
        // the continuation inherits all of the parent's credit
        c.credit = (*p).credit;
        (*p).credit = 0;
        (*p).continued = true;
        sched.launch(c);
    }
}

/// Terminates the current user-level thread with `status`. The stack is
/// released and the parcel freed by the checkpoint continuation, on the next
/// context's stack.
pub(crate) fn finish(status: Status) -> ! {
    let next;
    let cont: fiber::Continuation;
    {
        let w = current();
        let cur = w.current.get();
        // Safety: `cur` is the terminating thread's parcel; raw access, the
        // abandoned handler frames below may still formally hold borrows
        unsafe {
            debug_assert!(!(*cur).stack.is_null(), "finish on the system context");
            match status {
                Status::Resend => {
                    // hand the parcel back to the network untouched
                    cont = cont_resend;
                }
                status => {
                    // an error with a continuation becomes an LCO error
                    // there; only unobserved errors feed the exit code
                    if status == Status::Error && (*cur).c_action.is_null() {
                        w.exit_code.set(w.exit_code.get().max(1));
                    }
                    retire(&w.sched, cur, status);
                    cont = cont_free;
                }
            }
        }
        next = w.schedule_vacate();
    }
    switch(next, cont, ptr::null_mut());
    unreachable!("a terminated thread was resumed")
}

/// Sends the current thread's continuation explicitly, with `data` as the
/// continued arguments.
pub(crate) fn continue_with(data: &[u8]) -> Status {
    let w = current();
    let cur = w.current.get();
    // Safety: `cur` is the running parcel; raw field access, the handler's
    // payload borrow stays untouched
    unsafe {
        if !(*cur).c_action.is_null() && !(*cur).continued {
            let c_action = (*cur).c_action;
            send_continuation(&w.sched, cur, data, c_action);
        }
    }
    Status::Success
}

/// Cooperatively gives up the worker: the thread moves to the global yielded
/// queue and the worker picks other work first.
pub(crate) fn yield_now() {
    let next;
    {
        let w = current();
        let cur = w.current.get();
        if cur == w.system.get() {
            return;
        }
        // Safety: `cur` is live
        if unsafe { (*cur).stack.is_null() } {
            // interrupts run to completion, they cannot yield
            return;
        }
        w.yielded.set(true);
        WorkerStats::inc(&w.remote().stats.yields);
        next = w.schedule_vacate();
    }
    switch(next, cont_yield, ptr::null_mut());
    // resumed — possibly on a different worker
}

/// Suspends the current thread on `cvar`. The caller holds `lock`; it is
/// released by the checkpoint continuation once the thread is fully saved,
/// and re-acquired before this returns. Returns the condition's error code.
pub(crate) fn wait(lock: &SpinLock, cvar: *mut Condition) -> i32 {
    let next;
    {
        let w = current();
        let cur = w.current.get();
        // Safety: `cur` is the running user thread; the lock we hold makes
        // the cvar ours
        unsafe {
            debug_assert!(!(*cur).stack.is_null(), "wait outside a user-level thread");
            (*cvar).push(ParcelRef::from_ptr(cur));
        }
        next = w.schedule_vacate();
    }
    let env = std::ptr::from_ref(lock).cast_mut().cast::<c_void>();
    switch(next, cont_unlock, env);

    // resumed by a signal, possibly on a different worker
    lock.lock();
    // Safety: the lock is held again, the cvar is stable
    unsafe { (*cvar).error() }
}

/// Resumes a parcel extracted from a condition: pinned threads go through
/// their worker's mailbox, the rest through the spawn path.
pub(crate) fn resume(p: ParcelRef) {
    let w = current();
    // Safety: a suspended waiter owns its stack
    let affinity = unsafe { (*(*p.as_ptr()).stack).affinity };
    if affinity >= 0 {
        w.sched.remotes[affinity as usize].mailbox.enqueue(p);
    } else {
        w.spawn(p);
    }
}

/// Pins the current thread to `target`, migrating it through that worker's
/// mailbox if it is not already there.
pub(crate) fn set_affinity(target: u32) -> Result<(), Error> {
    let next;
    {
        let w = current();
        if target as usize >= w.sched.remotes.len() {
            return Err(Error::BadAffinity(target));
        }
        let cur = w.current.get();
        // Safety: `cur` is live
        let stack = unsafe { (*cur).stack };
        assert!(!stack.is_null(), "set_affinity outside a user-level thread");
        // Safety: the running thread owns its stack header
        unsafe {
            (*stack).affinity = i32::try_from(target).unwrap();
        }
        if target == w.id {
            return Ok(());
        }
        next = w.schedule_vacate();
    }
    switch(next, cont_mail, target as usize as *mut c_void);
    Ok(())
}

/// Lazily assigned per-thread identity.
pub(crate) fn tls_id() -> i32 {
    let w = current();
    let cur = w.current.get();
    // Safety: `cur` is live
    let stack = unsafe { (*cur).stack };
    if stack.is_null() {
        return NO_TLS_ID;
    }
    // Safety: the running thread owns its stack header
    unsafe {
        if (*stack).tls_id == NO_TLS_ID {
            (*stack).tls_id = w.sched.next_tls_id();
        }
        (*stack).tls_id
    }
}

/// Tracks how many LCO locks the current thread holds.
pub(crate) fn lco_depth_changed(delta: i32) {
    let Some(w) = try_current() else { return };
    let cur = w.current.get();
    if cur.is_null() {
        return;
    }
    // Safety: `cur` is live
    let stack = unsafe { (*cur).stack };
    if stack.is_null() {
        return;
    }
    // Safety: the running thread owns its stack header
    unsafe {
        (*stack).lco_depth = (*stack)
            .lco_depth
            .checked_add_signed(delta)
            .expect("unbalanced LCO lock depth");
    }
}

// === checkpoint continuations ===
//
// These run on the destination stack, on the same OS thread that initiated
// the switch; `prev` is the context that was just checkpointed.

unsafe extern "C" fn cont_null(_prev: *mut c_void, _env: *mut c_void) -> i32 {
    0
}

/// Work-first spawn: park the parent on the deque.
unsafe extern "C" fn cont_push(prev: *mut c_void, _env: *mut c_void) -> i32 {
    let w = current();
    // Safety: `prev` is the parcel the transfer just checkpointed
    w.push_lifo(unsafe { ParcelRef::from_ptr(prev.cast::<Parcel>()) });
    0
}

/// Yield: move the previous thread to the global yielded queue.
unsafe extern "C" fn cont_yield(prev: *mut c_void, _env: *mut c_void) -> i32 {
    let w = current();
    // Safety: `prev` is the parcel the transfer just checkpointed
    w.sched
        .yielded
        .enqueue(unsafe { ParcelRef::from_ptr(prev.cast::<Parcel>()) });
    w.yielded.set(false);
    0
}

/// Wait: release the LCO lock now that the waiter is fully saved, balancing
/// the suspended thread's lock depth by hand.
unsafe extern "C" fn cont_unlock(prev: *mut c_void, env: *mut c_void) -> i32 {
    // Safety: `env` is the SpinLock the waiter held, `prev` its parcel
    unsafe {
        let stack = (*prev.cast::<Parcel>()).stack;
        (*stack).lco_depth -= 1;
        (*env.cast::<SpinLock>()).raw_unlock();
    }
    0
}

/// Thread termination: recycle the stack and free the parcel.
unsafe extern "C" fn cont_free(prev: *mut c_void, _env: *mut c_void) -> i32 {
    let w = current();
    // Safety: `prev` is the terminated parcel
    unsafe {
        let p = ParcelRef::from_ptr(prev.cast::<Parcel>());
        w.release_stack(p.as_ptr());
        p.dealloc();
    }
    0
}

/// RESEND termination: recycle the stack, hand the parcel back to the
/// network for relaunch.
unsafe extern "C" fn cont_resend(prev: *mut c_void, _env: *mut c_void) -> i32 {
    let w = current();
    // Safety: `prev` is the terminated parcel
    unsafe {
        let p = ParcelRef::from_ptr(prev.cast::<Parcel>());
        w.release_stack(p.as_ptr());
        w.sched.launch(p);
    }
    0
}

/// Affinity migration: mail the previous thread to its designated worker.
unsafe extern "C" fn cont_mail(prev: *mut c_void, env: *mut c_void) -> i32 {
    let w = current();
    let target = env as usize;
    // Safety: `prev` is the parcel the transfer just checkpointed
    let p = unsafe { ParcelRef::from_ptr(prev.cast::<Parcel>()) };
    w.sched.remotes[target].mailbox.enqueue(p);
    0
}
