// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The action table: stable ids to handler functions.
//!
//! Registration is two-phased the same way the rest of the runtime treats
//! configuration: every action is registered before the scheduler starts, and
//! from then on the table is read-only, so lookups are a plain indexed load
//! with no synchronization.

use crate::error::Status;

/// A registered action id. Ids are dense, start at 1 and are stable for the
/// lifetime of the table; `Action::NULL` is "no action".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Action(pub(crate) u32);

impl Action {
    pub const NULL: Action = Action(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// An action handler. Receives the parcel's marshalled argument buffer in
/// place; pinned handlers reach their target through
/// [`thread::current_pinned`](crate::thread::current_pinned).
pub type Handler = fn(args: &mut [u8]) -> Status;

bitflags::bitflags! {
    /// Attribute bits recorded at registration.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Attributes: u32 {
        /// The target address is pinned before the handler runs and unpinned
        /// after it; a failed pin resends the parcel.
        const PINNED     = 1 << 0;
        /// Arguments travel as an opaque serialized buffer.
        const MARSHALLED = 1 << 1;
        /// Arguments are an array of (pointer, length) pairs.
        const VECTORED   = 1 << 2;
        /// Runs to completion on the caller's stack, no context switch.
        const INTERRUPT  = 1 << 3;
        /// Registered by the runtime itself.
        const INTERNAL   = 1 << 4;
    }
}

pub(crate) struct Entry {
    pub(crate) name: &'static str,
    pub(crate) handler: Handler,
    pub(crate) attrs: Attributes,
}

/// The id → (handler, attributes) table.
pub struct ActionTable {
    entries: Vec<Entry>,
}

/// Ids of the actions the runtime itself registers, in registration order.
pub(crate) mod builtin {
    use super::Action;

    /// Copy the payload into the target LCO and trigger it.
    pub(crate) const LCO_SET: Action = Action(1);
    /// Propagate an error code into the target LCO.
    pub(crate) const LCO_ERROR: Action = Action(2);
    /// Free the target LCO.
    pub(crate) const LCO_DELETE: Action = Action(3);
    /// Deliver the final output and stop the scheduler.
    pub(crate) const STOP: Action = Action(4);
}

impl ActionTable {
    /// Creates a table pre-seeded with the runtime's internal actions.
    pub fn new() -> Self {
        let mut table = Self {
            entries: Vec::new(),
        };
        let lco_set = table.register(
            "lco_set",
            Attributes::PINNED
                | Attributes::MARSHALLED
                | Attributes::INTERRUPT
                | Attributes::INTERNAL,
            crate::lco::lco_set_handler,
        );
        debug_assert_eq!(lco_set, builtin::LCO_SET);
        table.register(
            "lco_error",
            Attributes::PINNED
                | Attributes::MARSHALLED
                | Attributes::INTERRUPT
                | Attributes::INTERNAL,
            crate::lco::lco_error_handler,
        );
        table.register(
            "lco_delete",
            Attributes::INTERRUPT | Attributes::INTERNAL,
            crate::lco::lco_delete_handler,
        );
        table.register(
            "stop",
            Attributes::MARSHALLED | Attributes::INTERNAL,
            crate::scheduler::stop_handler,
        );
        table
    }

    /// Registers `handler` under a fresh id.
    pub fn register(
        &mut self,
        name: &'static str,
        attrs: Attributes,
        handler: Handler,
    ) -> Action {
        self.entries.push(Entry {
            name,
            handler,
            attrs,
        });
        Action(self.entries.len() as u32)
    }

    pub(crate) fn entry(&self, action: Action) -> Option<&Entry> {
        if action.is_null() {
            return None;
        }
        self.entries.get(action.0 as usize - 1)
    }

    pub(crate) fn attrs(&self, action: Action) -> Attributes {
        self.entry(action).map(|e| e.attrs).unwrap_or_default()
    }

    pub(crate) fn name(&self, action: Action) -> &'static str {
        self.entry(action).map(|e| e.name).unwrap_or("<null>")
    }
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::new()
    }
}
