// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The scheduler: fleet lifecycle and the epoch state machine.
//!
//! An epoch runs RUN → STOP → SHUTDOWN. `start` launches the worker threads,
//! publishes the startup parcel and blocks the caller; `stop` (usually
//! reached through a user thread's `exit`) records the exit code and wakes
//! everyone; the starter then flips to SHUTDOWN and joins the fleet.
//! STOP drains running threads but no worker picks up new work; SHUTDOWN is
//! terminal.

use crate::action::{Action, ActionTable, Attributes, builtin};
use crate::config::Config;
use crate::error::{Error, Status};
use crate::gas::{Addr, Gas, LocalGas};
use crate::net::{Locality, Loopback, Network};
use crate::parcel::{Parcel, ParcelRef};
use crate::process::ProcessTable;
use crate::stats::{Stats, WorkerStats};
use crate::worker::{self, Worker};
use crossbeam_utils::CachePadded;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use sync::TwoLockQueue;
use sync::deque::{self, Stealer};

const STATE_RUN: u32 = 0;
const STATE_STOP: u32 = 1;
const STATE_SHUTDOWN: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum State {
    Run,
    Stop,
    Shutdown,
}

/// The shared half of one worker: everything other threads are allowed to
/// touch.
pub(crate) struct Remote {
    /// Thief end of the worker's deque.
    pub(crate) stealer: Stealer<ParcelRef>,
    /// Affinity-constrained work, multi-producer FIFO.
    pub(crate) mailbox: TwoLockQueue<ParcelRef>,
    pub(crate) stats: WorkerStats,
}

// a remote must never share a cache line with its neighbor
static_assertions::const_assert!(align_of::<CachePadded<Remote>>() >= 64);

struct Output {
    buf: Vec<u8>,
    valid: bool,
}

pub struct Scheduler {
    state: AtomicU32,
    exit_code: AtomicI32,
    pub(crate) remotes: Box<[CachePadded<Remote>]>,
    /// Owner halves of the deques, taken by the worker threads at startup.
    handles: Mutex<Vec<Option<deque::Worker<ParcelRef>>>>,
    /// Threads that cooperatively stepped aside, FIFO across all workers.
    pub(crate) yielded: TwoLockQueue<ParcelRef>,
    /// Guards the starter's sleep; the state word carries the actual value.
    lifecycle: Mutex<()>,
    stopped: Condvar,
    next_tls: AtomicI32,
    next_victim: AtomicUsize,
    pub(crate) config: Config,
    pub(crate) table: ActionTable,
    pub(crate) gas: Arc<dyn Gas>,
    net: Box<dyn Network>,
    pub(crate) processes: ProcessTable,
    output: Mutex<Output>,
    pub(crate) locality: Locality,
    spmd: AtomicBool,
    spmd_arrivals: AtomicU32,
    started: AtomicBool,
}

impl Scheduler {
    pub(crate) fn new(
        config: Config,
        table: ActionTable,
        gas: Arc<dyn Gas>,
        net: Box<dyn Network>,
    ) -> Result<Scheduler, Error> {
        config.validate()?;
        let workers = config.worker_count();

        let mut remotes = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (owner, stealer) = deque::deque();
            handles.push(Some(owner));
            remotes.push(CachePadded::new(Remote {
                stealer,
                mailbox: TwoLockQueue::new(),
                stats: WorkerStats::default(),
            }));
        }

        Ok(Scheduler {
            state: AtomicU32::new(STATE_RUN),
            exit_code: AtomicI32::new(0),
            remotes: remotes.into_boxed_slice(),
            handles: Mutex::new(handles),
            yielded: TwoLockQueue::new(),
            lifecycle: Mutex::new(()),
            stopped: Condvar::new(),
            next_tls: AtomicI32::new(0),
            next_victim: AtomicUsize::new(0),
            config,
            table,
            gas,
            net,
            processes: ProcessTable::new(),
            output: Mutex::new(Output {
                buf: Vec::new(),
                valid: false,
            }),
            locality: Locality::solo(),
            spmd: AtomicBool::new(false),
            spmd_arrivals: AtomicU32::new(0),
            started: AtomicBool::new(false),
        })
    }

    pub(crate) fn state(&self) -> State {
        match self.state.load(Ordering::Acquire) {
            STATE_RUN => State::Run,
            STATE_STOP => State::Stop,
            _ => State::Shutdown,
        }
    }

    /// Inserts a chain of parcels into the fleet. A worker thread spawns
    /// into its own deque (work-first semantics apply); external producers
    /// are distributed round-robin through the workers' mailboxes.
    pub fn spawn(&self, parcels: ParcelRef) {
        let mut head = parcels.into_ptr();
        while !head.is_null() {
            // Safety: we own the chain; each link is detached before it is
            // handed on
            let p = unsafe {
                let next = (*head).next;
                (*head).next = ptr::null_mut();
                let p = ParcelRef::from_ptr(head);
                head = next;
                p
            };
            self.spawn_one(p);
        }
    }

    fn spawn_one(&self, mut p: ParcelRef) {
        // a fresh parcel borrows its credit unit from its process here
        if p.credit() == 0 && p.pid != 0 {
            p.credit = 1;
            self.processes.debit(p.pid, 1);
        }

        match worker::try_current() {
            Some(w) if ptr::eq(Arc::as_ptr(&w.sched), self) => w.spawn(p),
            _ => {
                let i = self.next_victim.fetch_add(1, Ordering::Relaxed) % self.remotes.len();
                self.remotes[i].mailbox.enqueue(p);
            }
        }
    }

    /// Hands a parcel to the network, which delivers it to its target
    /// locality (right back here, on the loopback transport).
    pub(crate) fn launch(&self, parcel: ParcelRef) {
        self.net.launch(self, parcel);
    }

    /// RUN → STOP. Records the exit code and wakes the starter and every
    /// idle worker.
    pub fn stop(&self, code: i32) {
        self.exit_code.fetch_max(code, Ordering::AcqRel);
        if self
            .state
            .compare_exchange(STATE_RUN, STATE_STOP, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::debug!(code, "scheduler stopping");
            let _guard = self.lifecycle.lock().unwrap();
            self.stopped.notify_all();
        }
    }

    /// Ends the epoch from a user thread, delivering the final output. On
    /// SPMD epochs the stop is only broadcast once every rank has arrived.
    pub(crate) fn exit_epoch(&self, code: i32, out: &[u8]) {
        if self.spmd.load(Ordering::Relaxed) {
            let arrived = self.spmd_arrivals.fetch_add(1, Ordering::AcqRel) + 1;
            if arrived < self.locality.ranks {
                return;
            }
        }

        let mut payload = Vec::with_capacity(4 + out.len());
        payload.extend_from_slice(&code.to_le_bytes());
        payload.extend_from_slice(out);
        let p = Parcel::new(Addr::NULL, builtin::STOP, &payload);
        self.launch(p);
    }

    /// Copies the final payload into the output slot. The size must match
    /// what `start` allocated.
    pub(crate) fn set_output(&self, bytes: &[u8]) {
        let mut output = self.output.lock().unwrap();
        if output.buf.len() != bytes.len() {
            tracing::error!(
                expected = output.buf.len(),
                got = bytes.len(),
                "final output size mismatch"
            );
            debug_assert_eq!(output.buf.len(), bytes.len(), "final output size mismatch");
            return;
        }
        output.buf.copy_from_slice(bytes);
        output.valid = true;
    }

    /// Runs one epoch: launches the worker fleet, publishes the startup
    /// parcel, blocks until `stop`, then tears the fleet down. Returns the
    /// exit code and the final output.
    pub(crate) fn start(
        this: &Arc<Scheduler>,
        spmd: bool,
        action: Action,
        args: &[u8],
        out_size: usize,
    ) -> Result<(i32, Vec<u8>), Error> {
        if this.started.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyStarted);
        }
        if this.table.entry(action).is_none() {
            return Err(Error::UnknownAction(action));
        }
        this.spmd.store(spmd, Ordering::Relaxed);
        *this.output.lock().unwrap() = Output {
            buf: vec![0; out_size],
            valid: false,
        };

        tracing::debug!(
            workers = this.remotes.len(),
            action = this.table.name(action),
            spmd,
            "starting epoch"
        );

        let mut joins = Vec::with_capacity(this.remotes.len());
        let spawn_error = {
            let mut handles = this.handles.lock().unwrap();
            let mut error = None;
            for (id, slot) in handles.iter_mut().enumerate() {
                let queue = slot.take().expect("worker handle missing");
                let sched = Arc::clone(this);
                match std::thread::Builder::new()
                    .name(format!("parallax-worker-{id}"))
                    .spawn(move || Worker::main(sched, id as u32, queue))
                {
                    Ok(join) => joins.push(join),
                    Err(e) => {
                        error = Some(Error::WorkerSpawn(e.to_string()));
                        break;
                    }
                }
            }
            error
        };
        if let Some(error) = spawn_error {
            this.state.store(STATE_SHUTDOWN, Ordering::Release);
            for join in joins {
                let _ = join.join();
            }
            return Err(error);
        }

        // On SPMD epochs every rank publishes the startup parcel; diffuse
        // epochs start it on rank 0 only. On one locality that is the same
        // parcel either way.
        this.spawn(Parcel::new(Addr::NULL, action, args));

        // sleep until a user thread ends the epoch
        {
            let mut guard = this.lifecycle.lock().unwrap();
            while this.state() == State::Run {
                guard = this.stopped.wait(guard).unwrap();
            }
        }

        this.state.store(STATE_SHUTDOWN, Ordering::Release);
        for join in joins {
            let _ = join.join();
        }

        // reclaim threads stranded mid-yield by the shutdown
        while let Some(p) = this.yielded.dequeue() {
            worker::dispose(p);
        }

        let output = this.output.lock().unwrap();
        tracing::debug!(valid = output.valid, "epoch over");
        Ok((this.exit_code.load(Ordering::Acquire), output.buf.clone()))
    }

    pub(crate) fn worker_exited(&self, code: i32) {
        self.exit_code.fetch_max(code, Ordering::AcqRel);
    }

    pub(crate) fn next_tls_id(&self) -> i32 {
        self.next_tls.fetch_add(1, Ordering::Relaxed)
    }

    /// A point-in-time aggregate of the fleet's counters.
    pub fn stats(&self) -> Stats {
        let mut stats = Stats::default();
        for remote in &self.remotes {
            stats.add(&remote.stats);
        }
        stats
    }

    pub fn workers(&self) -> usize {
        self.remotes.len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // free parcels that were spawned but never ran
        for remote in &self.remotes {
            while let Some(p) = remote.mailbox.dequeue() {
                worker::dispose(p);
            }
        }
        while let Some(p) = self.yielded.dequeue() {
            worker::dispose(p);
        }
        for slot in self.handles.lock().unwrap().iter_mut() {
            if let Some(queue) = slot.take() {
                while let Some(p) = queue.pop() {
                    worker::dispose(p);
                }
            }
        }
    }
}

/// `stop`: delivers the final output and stops the scheduler.
pub(crate) fn stop_handler(args: &mut [u8]) -> Status {
    let sched = &worker::current().sched;
    let code = args
        .get(..4)
        .map_or(0, |b| i32::from_le_bytes(b.try_into().unwrap()));
    sched.set_output(args.get(4..).unwrap_or(&[]));
    sched.stop(code);
    Status::Success
}

/// The runtime: an action table, a worker fleet, and one epoch of execution.
pub struct Runtime {
    sched: Arc<Scheduler>,
}

impl Runtime {
    /// Creates a runtime with the process-local address space and loopback
    /// transport.
    pub fn new(config: Config) -> Result<Self, Error> {
        Self::with_parts(
            config,
            ActionTable::new(),
            Arc::new(LocalGas::new()),
            Box::new(Loopback),
        )
    }

    /// Creates a runtime over caller-provided address-space and transport
    /// implementations.
    pub fn with_parts(
        config: Config,
        table: ActionTable,
        gas: Arc<dyn Gas>,
        net: Box<dyn Network>,
    ) -> Result<Self, Error> {
        Ok(Self {
            sched: Arc::new(Scheduler::new(config, table, gas, net)?),
        })
    }

    /// Registers an action. Must happen before the epoch starts.
    pub fn register(
        &mut self,
        name: &'static str,
        attrs: Attributes,
        handler: crate::action::Handler,
    ) -> Result<Action, Error> {
        let sched = Arc::get_mut(&mut self.sched).ok_or(Error::AlreadyStarted)?;
        Ok(sched.table.register(name, attrs, handler))
    }

    /// Runs `action(args)` as the startup thread and blocks until a thread
    /// calls [`exit`](crate::thread::exit). Returns the exit code.
    pub fn run(&self, action: Action, args: &[u8]) -> Result<i32, Error> {
        Scheduler::start(&self.sched, false, action, args, 0).map(|(code, _)| code)
    }

    /// Like [`run`](Self::run), but allocates `out_size` bytes for the final
    /// output delivered through `exit` and returns it alongside the code.
    pub fn run_with_output(
        &self,
        action: Action,
        args: &[u8],
        out_size: usize,
    ) -> Result<(i32, Vec<u8>), Error> {
        Scheduler::start(&self.sched, false, action, args, out_size)
    }

    /// Runs an SPMD epoch: the startup action runs on every locality and
    /// `exit` fans in before the stop is broadcast.
    pub fn run_spmd(
        &self,
        action: Action,
        args: &[u8],
        out_size: usize,
    ) -> Result<(i32, Vec<u8>), Error> {
        Scheduler::start(&self.sched, true, action, args, out_size)
    }

    /// Inserts a parcel from outside the fleet.
    pub fn spawn(&self, parcel: ParcelRef) {
        self.sched.spawn(parcel);
    }

    /// Stops a running epoch from outside.
    pub fn stop(&self, code: i32) {
        self.sched.stop(code);
    }

    pub fn stats(&self) -> Stats {
        self.sched.stats()
    }

    pub fn workers(&self) -> usize {
        self.sched.workers()
    }
}
