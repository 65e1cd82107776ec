//! L2/L3 shared state: the wait mask, timeout hint, and per-call flags a
//! wrapped synchronous body and its `start`/`cont` pair communicate
//! through (spec §3 "AsyncCallState").

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::context::{Handle, Options};

pub mod shim;

/// Bits a caller's event loop must wait for before re-entering `cont`
/// (spec §6 `status_bits`). Hand-rolled rather than pulled from a
/// `bitflags`-style crate: three bits don't need one, and nothing else in
/// this crate's dependency stack needs bitflag support either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitMask(u8);

impl WaitMask {
    pub const NONE: WaitMask = WaitMask(0);
    pub const READ: WaitMask = WaitMask(1);
    pub const WRITE: WaitMask = WaitMask(2);
    pub const TIMEOUT: WaitMask = WaitMask(4);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> WaitMask {
        WaitMask(bits & 0b111)
    }

    pub const fn contains(self, other: WaitMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn union(self, other: WaitMask) -> WaitMask {
        WaitMask(self.0 | other.0)
    }
}

impl std::ops::BitOr for WaitMask {
    type Output = WaitMask;
    fn bitor(self, rhs: WaitMask) -> WaitMask {
        self.union(rhs)
    }
}

impl fmt::Display for WaitMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut parts = Vec::new();
        if self.contains(WaitMask::READ) {
            parts.push("READ");
        }
        if self.contains(WaitMask::WRITE) {
            parts.push("WRITE");
        }
        if self.contains(WaitMask::TIMEOUT) {
            parts.push("TIMEOUT");
        }
        write!(f, "{}", parts.join("|"))
    }
}

/// Per-database-handle state owning one coroutine (spec §3
/// "AsyncCallState"). One of these is lazily created the first time a
/// wrapped call is started on a given handle and reused across every
/// subsequent call on that handle (spec §4.3 step 1).
pub struct AsyncCallState {
    wait_mask: Cell<WaitMask>,
    ready_mask: Cell<WaitMask>,
    timeout_hint: Cell<Option<Duration>>,
    call_active: Cell<bool>,
    suspended: Cell<bool>,
    result: RefCell<Option<Box<dyn Any>>>,
    context: RefCell<Option<Handle>>,
    stack_size: Cell<usize>,
    socket_fd: Cell<Option<RawFd>>,
}

impl AsyncCallState {
    pub fn new() -> AsyncCallState {
        AsyncCallState {
            wait_mask: Cell::new(WaitMask::NONE),
            ready_mask: Cell::new(WaitMask::NONE),
            timeout_hint: Cell::new(None),
            call_active: Cell::new(false),
            suspended: Cell::new(false),
            result: RefCell::new(None),
            context: RefCell::new(None),
            stack_size: Cell::new(crate::context::STACK_SIZE_MIN),
            socket_fd: Cell::new(None),
        }
    }

    /// Overrides the coroutine stack size used by the next `start` on this
    /// state (spec §4.3 "Stack allocation policy").
    pub fn set_stack_size(&self, size: usize) {
        self.stack_size.set(size);
    }

    pub(crate) fn options(&self) -> Options {
        Options::new().stack_size(self.stack_size.get())
    }

    /// True while control is inside a `start`/`cont` invocation. The shim
    /// uses this to decide whether it's legal to yield (spec §4.2
    /// "Sync/async discrimination").
    pub fn call_active(&self) -> bool {
        self.call_active.get()
    }

    pub(crate) fn set_call_active(&self, active: bool) {
        self.call_active.set(active);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.get()
    }

    pub(crate) fn set_suspended(&self, suspended: bool) {
        self.suspended.set(suspended);
    }

    /// Wait mask most recently set by the coroutine before a yield (spec
    /// §6 `status_bits`, minus the all-zero "done" case which `foo_cont`
    /// represents with `Ok`).
    pub fn wait_mask(&self) -> WaitMask {
        self.wait_mask.get()
    }

    pub(crate) fn set_wait_mask(&self, mask: WaitMask) {
        self.wait_mask.set(mask);
    }

    /// Events the caller reports as ready, stashed by `foo_cont` before
    /// resuming so the shim can tell TIMEOUT apart from real I/O
    /// readiness (spec §4.3 `foo_cont` step 2).
    pub(crate) fn ready_mask(&self) -> WaitMask {
        self.ready_mask.get()
    }

    pub(crate) fn set_ready_mask(&self, mask: WaitMask) {
        self.ready_mask.set(mask);
    }

    /// Milliseconds to wait for, meaningful only while the TIMEOUT bit is
    /// set in the current wait mask (spec §4.3 "Timeout surface").
    pub fn timeout_hint(&self) -> Duration {
        if self.wait_mask().contains(WaitMask::TIMEOUT) {
            self.timeout_hint.get().unwrap_or_default()
        } else {
            Duration::default()
        }
    }

    pub(crate) fn set_timeout_hint(&self, d: Duration) {
        self.timeout_hint.set(Some(d));
    }

    /// File descriptor the caller's event loop should poll while the wait
    /// mask is non-empty (spec §6 "Query surface on the handle"). Updated
    /// by the shim every time it's about to block on a socket.
    pub fn socket_fd(&self) -> Option<RawFd> {
        self.socket_fd.get()
    }

    pub(crate) fn set_socket_fd(&self, fd: RawFd) {
        self.socket_fd.set(Some(fd));
    }

    pub(crate) fn take_context(&self) -> Option<Handle> {
        self.context.borrow_mut().take()
    }

    pub(crate) fn put_context(&self, handle: Handle) {
        *self.context.borrow_mut() = Some(handle);
    }

    pub(crate) fn store_result<T: 'static>(&self, value: T) {
        *self.result.borrow_mut() = Some(Box::new(value));
    }

    pub(crate) fn take_result<T: 'static>(&self) -> Option<T> {
        self.result
            .borrow_mut()
            .take()
            .and_then(|b| b.downcast::<T>().ok())
            .map(|b| *b)
    }
}

impl Default for AsyncCallState {
    fn default() -> Self {
        AsyncCallState::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_mask_formats_readably() {
        assert_eq!((WaitMask::READ | WaitMask::TIMEOUT).to_string(), "READ|TIMEOUT");
        assert_eq!(WaitMask::NONE.to_string(), "NONE");
    }

    #[test]
    fn fresh_state_is_not_suspended_or_active() {
        let s = AsyncCallState::new();
        assert!(!s.call_active());
        assert!(!s.is_suspended());
    }
}
