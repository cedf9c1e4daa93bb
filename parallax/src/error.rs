// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::action::Action;

/// Completion status of an action handler or synchronization operation.
///
/// Statuses are plain codes: they are returned across the context-switch
/// boundary (which unwinding must never cross) and travel inside error
/// continuations.
#[repr(i32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Status {
    /// Normal completion.
    #[default]
    Success = 0,
    /// The handler failed; becomes an LCO error at the continuation if there
    /// is one, otherwise feeds the process exit code.
    Error = -1,
    /// The parcel could not run here (e.g. a pin failed) and must be
    /// relaunched.
    Resend = -2,
    /// An error code propagated out of an LCO operation.
    LcoError = -3,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    pub(crate) fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Errors surfaced by the runtime's public construction and control surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("the runtime was already started")]
    AlreadyStarted,

    #[error("unknown action {0:?}")]
    UnknownAction(Action),

    #[error("no such worker: {0}")]
    BadAffinity(u32),

    #[error("failed to allocate a thread stack")]
    Stack(#[from] std::io::Error),

    #[error("failed to spawn a worker thread: {0}")]
    WorkerSpawn(String),
}
