//! x86_64 fast-path backend: hand-written register-level context switch,
//! skipping the callee-saved-register restore on the common "never
//! yielded" path (spec §4.1 "Fast-path register-level backend").
//!
//! This is a close, register-for-register port of
//! `examples/original_source/my_context_amd64_gcc.c`, translated from
//! GCC extended asm into `core::arch::asm!`. Registers are pinned to
//! exactly the same physical registers the original uses (`rbx` or
//! `rdi` to hold the save-area pointer, `rax` for the return value,
//! `rsi`/`rdi` for the entry point and its argument) rather than left to
//! the register allocator, because several of the "scratch" registers
//! here (`rbp`, `rbx`, `r12`-`r15`) are also ones the hand-written
//! template reads and writes directly by name -- letting the compiler
//! allocate an operand onto one of those would silently corrupt the save
//! area.
//!
//! The save-area layout is exactly the one documented in that file's
//! header comment:
//!
//! ```text
//! Slot   Offset  Meaning
//!   0       0    %rsp for the suspended coroutine
//!   1       8    %rbp for the suspended coroutine
//!   2      16    %rbx for the suspended coroutine
//!   3      24    %r12 for the suspended coroutine
//!   4      32    %r13 for the suspended coroutine
//!   5      40    %r14 for the suspended coroutine
//!   6      48    %r15 for the suspended coroutine
//!   7      56    %rip to resume at on the next `continue`
//!   8      64    %rsp for the caller
//!   9      72    %rbp for the caller
//!  10      80    %rbx for the caller
//!  11      88    %r12 for the caller
//!  12      96    %r13 for the caller
//!  13     104    %r14 for the caller
//!  14     112    %r15 for the caller
//!  15     120    %rip to jump to when the coroutine is done
//!  16     128    %rip to jump to when the coroutine yields
//! ```
//!
//! Assumes the System V AMD64 calling convention; only compiled in on
//! `target_arch = "x86_64"` (see `context/mod.rs`'s backend selection).

use std::arch::asm;
use std::os::raw::c_void;

use super::EntryFn;

pub(crate) struct BackendState {
    save: [u64; 17],
}

impl BackendState {
    pub(crate) fn new_uninit() -> Self {
        BackendState { save: [0; 17] }
    }

    /// First entry. Saves the caller's machine state into the caller
    /// slots, switches `rsp` to the top of `stack`, and calls
    /// `entry(data)` directly in `entry`'s ABI argument register -- no
    /// trampoline indirection needed, unlike the portable backend.
    /// Returns 0 if `entry` ran to completion without yielding, 1 if it
    /// yielded, via the same done/yield label trick `yield_now`/`resume`
    /// use.
    pub(crate) unsafe fn spawn(
        &mut self,
        _stack_base: *mut u8,
        stack_top: *mut u8,
        entry: EntryFn,
        data: *mut c_void,
    ) -> i32 {
        let ret: u64;
        asm!(
            "mov [rbx+64], rsp",
            "mov rsp, rax",
            "mov [rbx+72], rbp",
            "mov [rbx+80], rbx",
            "mov [rbx+88], r12",
            "mov [rbx+96], r13",
            "mov [rbx+104], r14",
            "mov [rbx+112], r15",
            "lea rax, [rip + 1f]",
            "lea rcx, [rip + 2f]",
            "mov [rbx+120], rax",
            "mov [rbx+128], rcx",
            "call rsi",
            // `entry` returned normally: it ran to completion without
            // ever yielding. Callee-saved registers were restored by
            // `entry` itself per the ABI, so there's nothing left to do
            // here -- this is the documented fast-path optimization.
            "jmp qword ptr [rbx+120]",
            "1:",
            "xor eax, eax",
            "jmp 3f",
            "2:",
            "mov eax, 1",
            "3:",
            inout("rax") stack_top => ret,
            in("rsi") entry as usize,
            inout("rdi") data => _,
            in("rbx") self.save.as_mut_ptr(),
            out("rcx") _,
            out("rdx") _,
            out("r8") _,
            out("r9") _,
            out("r10") _,
            out("r11") _,
        );
        ret as i32
    }

    /// Resumes a previously yielded coroutine: saves the caller's state
    /// (with fresh done/yield resume points for *this* call site),
    /// restores the coroutine's stack/frame/callee-saved registers, and
    /// jumps to wherever it last called `yield_now` from.
    pub(crate) unsafe fn resume(&mut self) -> i32 {
        let ret: u64;
        asm!(
            "mov [rbx+64], rsp",
            "mov [rbx+72], rbp",
            "mov [rbx+80], rbx",
            "mov [rbx+88], r12",
            "mov [rbx+96], r13",
            "mov [rbx+104], r14",
            "mov [rbx+112], r15",
            "lea rax, [rip + 1f]",
            "lea rcx, [rip + 2f]",
            "mov [rbx+120], rax",
            "mov [rbx+128], rcx",

            "mov rsp, [rbx+0]",
            "mov rbp, [rbx+8]",
            "mov r12, [rbx+24]",
            "mov r13, [rbx+32]",
            "mov r14, [rbx+40]",
            "mov r15, [rbx+48]",
            // Snapshot the resume target before the final `mov rbx, ...`
            // below overwrites the register we're using as the save-area
            // base -- restoring %rbx itself has to happen last among
            // reads through it, same reasoning as the two blocks below.
            "mov rax, [rbx+56]",
            "mov rbx, [rbx+16]",
            "jmp rax",

            // The resumed coroutine ran to completion this time. Note
            // %rbx itself is restored last, since it's the register
            // holding our own save-area pointer throughout.
            "1:",
            "mov rsp, [rbx+64]",
            "mov rbp, [rbx+72]",
            "mov r12, [rbx+88]",
            "mov r13, [rbx+96]",
            "mov r14, [rbx+104]",
            "mov r15, [rbx+112]",
            "mov rbx, [rbx+80]",
            "xor eax, eax",
            "jmp 3f",
            // The resumed coroutine yielded again.
            "2:",
            "mov rbx, [rbx+80]",
            "mov eax, 1",
            "3:",
            inout("rbx") self.save.as_mut_ptr() => _,
            out("rax") ret,
            out("rcx") _,
            out("rdx") _,
            out("rsi") _,
            out("rdi") _,
            out("r8") _,
            out("r9") _,
            out("r10") _,
            out("r11") _,
        );
        ret as i32
    }

    /// Suspends the running coroutine: saves its own callee-saved state
    /// and a continue-resume `rip`, restores the caller's state, and
    /// jumps to the caller's yield label. Per the original, the save
    /// pointer travels in `rdi` here rather than `rbx`, since this
    /// function has no other argument competing for it.
    pub(crate) unsafe fn yield_now(&mut self) -> i32 {
        asm!(
            "mov [rdi+0], rsp",
            "mov [rdi+8], rbp",
            "mov [rdi+16], rbx",
            "mov [rdi+24], r12",
            "mov [rdi+32], r13",
            "mov [rdi+40], r14",
            "mov [rdi+48], r15",
            "lea rax, [rip + 1f]",
            "mov [rdi+56], rax",

            "mov rsp, [rdi+64]",
            "mov rbp, [rdi+72]",
            "mov rbx, [rdi+80]",
            "mov r12, [rdi+88]",
            "mov r13, [rdi+96]",
            "mov r14, [rdi+104]",
            "mov r15, [rdi+112]",
            "jmp qword ptr [rdi+128]",
            "1:",
            inout("rdi") self.save.as_mut_ptr() => _,
            out("rax") _,
            out("rcx") _,
            out("rdx") _,
            out("rsi") _,
            out("r8") _,
            out("r9") _,
            out("r10") _,
            out("r11") _,
        );
        0
    }
}
