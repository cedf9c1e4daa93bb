// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A scheduler for fine-grained task parallelism.
//!
//! Work arrives as *parcels* — messages naming a target address, an action
//! and its arguments, optionally a continuation and the credit used for
//! termination detection. A fleet of worker threads executes parcels as
//! cooperatively scheduled user-level threads over cached, guard-paged
//! stacks:
//!
//! - spawns from a busy worker run **work-first** (the child executes
//!   immediately, the parent parks on the deque where thieves find it);
//! - idle workers drain their mailbox, pop their own deque LIFO, then race
//!   between the global yielded queue and **stealing** from a random victim;
//! - threads suspend cooperatively on [`lco`]s (futures, and-gates,
//!   reductions), whose condition queues hold the suspended parcels;
//! - a thread pinned to a worker (soft **affinity**) migrates and resumes
//!   through that worker's mailbox.
//!
//! The networking transport, global address space and action registry are
//! collaborators behind the [`Network`], [`Gas`] and [`ActionTable`]
//! boundaries; the bundled loopback/local implementations make a runtime
//! self-contained on one locality.
//!
//! ```no_run
//! use parallax::{Attributes, Config, Runtime, Status, thread};
//!
//! fn hello(_args: &mut [u8]) -> Status {
//!     thread::exit(0, b"hi");
//! }
//!
//! let mut rt = Runtime::new(Config::default()).unwrap();
//! let act = rt.register("hello", Attributes::MARSHALLED, hello).unwrap();
//! let (code, out) = rt.run_with_output(act, &[], 2).unwrap();
//! assert_eq!((code, out.as_slice()), (0, b"hi".as_slice()));
//! ```

mod action;
mod api;
mod config;
mod error;
mod gas;
pub mod lco;
mod net;
mod parcel;
pub mod process;
mod scheduler;
mod stack;
mod stats;
pub mod thread;
mod worker;

pub use action::{Action, ActionTable, Attributes, Handler};
pub use api::{call, call_cc, call_in, gas_alloc, gas_free, memget, memput, stop};
pub use config::Config;
pub use error::{Error, Status};
pub use gas::{Addr, Gas, LocalGas};
pub use net::{Locality, Loopback, Network};
pub use parcel::{Parcel, ParcelRef};
pub use scheduler::{Runtime, Scheduler};
pub use stats::Stats;
