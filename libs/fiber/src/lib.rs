// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Support for safe & efficient stack switching.
//!
//! This crate provides the raw machinery a user-level thread scheduler is built
//! on: guard-paged [`StackMemory`] regions and a symmetric [`transfer`]
//! primitive that moves execution between such stacks.
//!
//! Unlike resume/yield style coroutine libraries the switch here is
//! *symmetric*: there is no parent context, any context may transfer to any
//! other. `transfer` additionally runs a caller-supplied [`Continuation`] on
//! the **destination** stack before the destination's own frame continues.
//! This is what makes checkpoint-and-enqueue atomic: the outgoing context is
//! only published (pushed to a run queue, linked onto a waiter list, its lock
//! released) *after* its register state has been fully checkpointed, by code
//! that already runs on the stack of the context taking over.
//!
//! The contract of `transfer(prev, env, cont, save, to)`:
//!
//! 1. all callee-saved register state and the stack pointer of the calling
//!    context are saved, the resulting stack pointer is stored to `*save`;
//! 2. the stack pointer is switched to `to`;
//! 3. `cont(prev, env)` runs on the destination stack;
//! 4. the destination context resumes as if its own `transfer` call had
//!    returned, with `cont`'s return value as the result.
//!
//! Panics must never unwind across a `transfer`; callers are expected to catch
//! them on the same stack they were raised on.

mod arch;
mod stack;

use core::ffi::c_void;

pub use arch::STACK_ALIGNMENT;
pub use stack::{MIN_STACK_SIZE, StackMemory};

/// A stack pointer value of a suspended or freshly initialized context.
pub type StackPointer = core::num::NonZeroUsize;

/// Code run on the destination stack by [`transfer`], before the destination
/// context resumes. Receives the `prev` and `env` pointers given to
/// `transfer`; its return value becomes the result of the `transfer` call the
/// destination context is suspended in.
pub type Continuation = unsafe extern "C" fn(prev: *mut c_void, env: *mut c_void) -> i32;

/// First function of a fresh context, entered on the first transfer into a
/// stack initialized with [`init_frame`]. Must never return.
pub type Entry = unsafe extern "C" fn(arg: *mut c_void) -> !;

/// Builds the initial frame of a fresh context at `top` (the *highest*
/// address of the stack, which grows downwards).
///
/// The first [`transfer`] to the returned stack pointer runs `cont` on the new
/// stack and then enters `entry(arg)`.
///
/// # Safety
///
/// `top` must be the top of writable stack memory with at least
/// [`MIN_STACK_SIZE`] bytes below it.
pub unsafe fn init_frame(top: StackPointer, entry: Entry, arg: *mut c_void) -> StackPointer {
    // Safety: forwarded to the caller
    unsafe { arch::init_frame(top, entry, arg) }
}

/// Switches execution to the context suspended at `to`.
///
/// The calling context is checkpointed and its stack pointer stored to
/// `*save`; `cont(prev, env)` then runs on the destination stack, after which
/// the destination context resumes. The call returns when some other context
/// transfers back to `*save`, with that transfer's continuation result.
///
/// # Safety
///
/// `to` must be a stack pointer produced by [`init_frame`] or stored through
/// the `save` slot of an earlier `transfer`, belonging to a context no other
/// thread is about to resume. `save` must be valid for writes. `cont` must not
/// unwind.
pub unsafe fn transfer(
    prev: *mut c_void,
    env: *mut c_void,
    cont: Continuation,
    save: *mut StackPointer,
    to: StackPointer,
) -> i32 {
    // Safety: forwarded to the caller
    unsafe { arch::transfer(prev, env, cont, save, to) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr;

    struct Shuttle {
        main_sp: StackPointer,
        side_sp: StackPointer,
        hops: usize,
    }

    unsafe extern "C" fn nop(_prev: *mut c_void, _env: *mut c_void) -> i32 {
        0
    }

    unsafe extern "C" fn count(_prev: *mut c_void, env: *mut c_void) -> i32 {
        // Safety: env is the Shuttle owned by the test
        let shuttle = unsafe { &mut *env.cast::<Shuttle>() };
        shuttle.hops += 1;
        shuttle.hops as i32
    }

    unsafe extern "C" fn bouncer(arg: *mut c_void) -> ! {
        // Safety: arg is the Shuttle owned by the test
        let shuttle = unsafe { &mut *arg.cast::<Shuttle>() };
        loop {
            let env = ptr::from_mut(shuttle).cast::<c_void>();
            // Safety: main_sp was checkpointed by the transfer that entered us
            unsafe {
                transfer(
                    ptr::null_mut(),
                    env,
                    count,
                    &raw mut shuttle.side_sp,
                    shuttle.main_sp,
                );
            }
        }
    }

    #[test]
    fn round_trip() {
        let stack = StackMemory::new(16 * 1024).unwrap();
        let mut shuttle = Shuttle {
            main_sp: StackPointer::new(usize::MAX).unwrap(),
            side_sp: StackPointer::new(usize::MAX).unwrap(),
            hops: 0,
        };
        let arg: *mut Shuttle = &raw mut shuttle;

        // Safety: fresh stack, entry never returns, arg outlives the contexts
        unsafe {
            (*arg).side_sp = init_frame(stack.top(), bouncer, arg.cast::<c_void>());

            for expected in 1..=5 {
                let hops = transfer(
                    ptr::null_mut(),
                    arg.cast::<c_void>(),
                    nop,
                    &raw mut (*arg).main_sp,
                    (*arg).side_sp,
                );
                // the continuation the bouncer passes when switching back
                // counted the hop and handed us the tally
                assert_eq!(hops, expected);
                assert_eq!((*arg).hops, expected as usize);
            }
        }
    }

    #[test]
    fn continuation_runs_on_destination_stack() {
        unsafe extern "C" fn where_am_i(_prev: *mut c_void, env: *mut c_void) -> i32 {
            let probe = 0u8;
            // Safety: env points to the (bottom, top) range of the target stack
            let (bottom, top) = unsafe { *env.cast::<(usize, usize)>() };
            let addr = &raw const probe as usize;
            assert!(addr > bottom && addr < top, "continuation ran off-stack");
            0
        }

        unsafe extern "C" fn parked(arg: *mut c_void) -> ! {
            // Safety: arg holds the main context's checkpoint
            let shuttle = unsafe { &mut *arg.cast::<Shuttle>() };
            // Safety: transfer back to the suspended test body
            unsafe {
                transfer(
                    ptr::null_mut(),
                    ptr::null_mut(),
                    nop,
                    &raw mut shuttle.side_sp,
                    shuttle.main_sp,
                );
            }
            unreachable!()
        }

        let stack = StackMemory::new(16 * 1024).unwrap();
        let mut shuttle = Shuttle {
            main_sp: StackPointer::new(usize::MAX).unwrap(),
            side_sp: StackPointer::new(usize::MAX).unwrap(),
            hops: 0,
        };
        let arg: *mut Shuttle = &raw mut shuttle;
        let mut range = (stack.bottom().get(), stack.top().get());

        // Safety: fresh stack, entry never returns, arg outlives the contexts
        unsafe {
            (*arg).side_sp = init_frame(stack.top(), parked, arg.cast::<c_void>());
            transfer(
                ptr::null_mut(),
                (&raw mut range).cast::<c_void>(),
                where_am_i,
                &raw mut (*arg).main_sp,
                (*arg).side_sp,
            );
        }
    }
}
