// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! x86_64 System V context switching.
//!
//! A checkpointed frame, from high to low addresses:
//!
//! ```text
//! +--------------------+
//! | return address     |  into the suspended transfer() call, or the
//! +--------------------+  entry trampoline for a fresh context
//! | saved RBP          |
//! | saved RBX          |
//! | saved R12          |
//! | saved R13          |
//! | saved R14          |
//! | saved R15          |
//! +--------------------+
//! | MXCSR | x87 CW     |  <- checkpointed stack pointer
//! +--------------------+
//! ```
//!
//! Seven slots keep the stack pointer 16-byte aligned at the checkpoint, so
//! the CALL issued for the continuation produces a conforming frame.

use crate::arch::push;
use crate::{Continuation, Entry, StackPointer};
use core::arch::naked_asm;
use core::ffi::c_void;

pub const STACK_ALIGNMENT: usize = 16;

/// Default MXCSR (all exceptions masked) and x87 control word (64-bit
/// precision, all exceptions masked) for a fresh context, laid out the way the
/// restore path reads them: MXCSR in the low dword, control word above it.
const INITIAL_FPU_STATE: usize = 0x037F_0000_1F80;

#[unsafe(naked)]
pub unsafe extern "C" fn transfer(
    prev: *mut c_void,
    env: *mut c_void,
    cont: Continuation,
    save: *mut StackPointer,
    to: StackPointer,
) -> i32 {
    naked_asm! {
        // Callee-saved general purpose registers. RDI/RSI (prev/env) ride
        // through untouched and become the continuation's arguments.
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        // The SSE and x87 control state is callee-saved as well and user
        // threads are free to change rounding modes.
        "sub rsp, 8",
        "stmxcsr [rsp]",
        "fnstcw [rsp + 4]",
        // Publish the checkpoint and adopt the destination stack.
        "mov [rcx], rsp",
        "mov rsp, r8",
        // Run the continuation on the destination stack. Its return value in
        // RAX is handed through to the resumed context below.
        "call rdx",
        // From here on we are the *destination* context: unwind its
        // checkpoint and return into its suspended transfer() call.
        "ldmxcsr [rsp]",
        "fldcw [rsp + 4]",
        "add rsp, 8",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    }
}

/// First landing pad of a fresh context. [`init_frame`] plants the entry
/// function in the RBX slot and its argument in the R12 slot of the initial
/// checkpoint; the restore path in [`transfer`] has loaded them by the time it
/// returns here.
#[unsafe(naked)]
unsafe extern "C" fn entry_trampoline() {
    naked_asm! {
        "mov rdi, r12",
        // CALL rather than JMP keeps the entry function's frame conformant
        // (RSP % 16 == 8 on entry).
        "call rbx",
        // the entry function never returns
        "ud2",
    }
}

pub unsafe fn init_frame(top: StackPointer, entry: Entry, arg: *mut c_void) -> StackPointer {
    let mut sp = top.get() & !(STACK_ALIGNMENT - 1);

    // Safety: ensured by caller
    unsafe {
        push(&mut sp, entry_trampoline as usize); // return address
        push(&mut sp, 0); // RBP
        push(&mut sp, entry as usize); // RBX
        push(&mut sp, arg as usize); // R12
        push(&mut sp, 0); // R13
        push(&mut sp, 0); // R14
        push(&mut sp, 0); // R15
        push(&mut sp, INITIAL_FPU_STATE);
        StackPointer::new_unchecked(sp)
    }
}
