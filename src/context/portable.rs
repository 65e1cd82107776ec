//! Portable backend: POSIX `ucontext_t` via `getcontext`/`makecontext`/
//! `swapcontext`. This is the reference backend (spec §4.1): any target
//! that isn't the x86_64 fast path uses this one.
//!
//! Grounded on `examples/original_source/my_context.c` (the Kristian
//! Nielsen design this whole spec distills) and on
//! `willglynn-tinycoro`'s `Stack`/entry-thunk shape, which independently
//! arrived at the same structure in Rust.

use std::mem;
use std::os::raw::{c_int, c_void};
use std::ptr;

use super::EntryFn;

/// `makecontext` only accepts `int` varargs, so a pointer-sized value has
/// to be packed into two of them and reassembled inside the relay
/// function (spec §9 "Passing a pointer through an integer-only API").
/// This assertion is the "document the alignment assumption as a
/// compile-time assertion" the design notes ask for.
const _: () = assert!(mem::size_of::<usize>() <= 2 * mem::size_of::<c_int>());

pub(crate) struct BackendState {
    base_context: libc::ucontext_t,
    spawned_context: libc::ucontext_t,
    entry: Option<EntryFn>,
    data: *mut c_void,
}

impl BackendState {
    pub(crate) fn new_uninit() -> Self {
        unsafe {
            BackendState {
                base_context: mem::zeroed(),
                spawned_context: mem::zeroed(),
                entry: None,
                data: ptr::null_mut(),
            }
        }
    }

    pub(crate) unsafe fn spawn(
        &mut self,
        stack_base: *mut u8,
        stack_top: *mut u8,
        entry: EntryFn,
        data: *mut c_void,
    ) -> i32 {
        if libc::getcontext(&mut self.spawned_context) != 0 {
            return -1;
        }

        self.spawned_context.uc_stack.ss_sp = stack_base as *mut c_void;
        self.spawned_context.uc_stack.ss_size = stack_top as usize - stack_base as usize;
        self.spawned_context.uc_stack.ss_flags = 0;
        self.spawned_context.uc_link = ptr::null_mut();

        self.entry = Some(entry);
        self.data = data;

        // Pack `self` (not `data`!) into the relay's two ints, so the
        // relay can look up both the real entry point and the real data
        // pointer once inside the new context.
        let self_addr = self as *mut BackendState as usize;
        let lo = (self_addr & 0xffff_ffff) as c_int;
        let hi = ((self_addr >> 32) & 0xffff_ffff) as c_int;

        let relay: extern "C" fn() = mem::transmute(relay as unsafe extern "C" fn(c_int, c_int));
        libc::makecontext(&mut self.spawned_context, relay, 2, lo, hi);

        self.resume()
    }

    pub(crate) unsafe fn resume(&mut self) -> i32 {
        if libc::swapcontext(&mut self.base_context, &self.spawned_context) != 0 {
            return -1;
        }
        0
    }

    pub(crate) unsafe fn yield_now(&mut self) -> i32 {
        if libc::swapcontext(&mut self.spawned_context, &self.base_context) != 0 {
            return -1;
        }
        0
    }
}

/// Entered by `makecontext` with the two halves of a pointer to the
/// owning `BackendState`. Runs the real entry point, then hands control
/// back to the caller the same way `yield_now` would -- `ucontext`'s
/// "function returns" path goes to `uc_link` (null, here), so we must
/// `setcontext` explicitly instead of just returning.
unsafe extern "C" fn relay(lo: c_int, hi: c_int) {
    let addr = (lo as u32 as usize) | ((hi as u32 as usize) << 32);
    let state = &mut *(addr as *mut BackendState);
    let entry = state.entry.take().expect("relay invoked without an entry point");
    let data = state.data;

    entry(data);

    if libc::setcontext(&state.base_context) != 0 {
        // The coroutine's stack is in an unknown state at this point;
        // there is nothing sensible left to do but abort.
        libc::abort();
    }
}
