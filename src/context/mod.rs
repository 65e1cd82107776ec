//! L1: the stackful coroutine primitive.
//!
//! One `Handle`/`Coroutine` pair is a single suspended-or-runnable
//! coroutine (spec §3 "Context"). `spawn` allocates a stack, runs the
//! supplied closure until it returns or yields, and hands back a `Handle`
//! the owner drives with `resume`. From inside the closure, the `&mut
//! Coroutine` argument is the only way to call `yield_now` -- there is no
//! free-standing `yield` function, which makes "yield from outside a
//! coroutine" (an edge case spec §4.1 requires rejecting) something the
//! type system already rules out rather than something we have to check
//! for at every call site.
//!
//! Two backends implement the actual register/stack switch, selected at
//! compile time (spec §4.1 "Backend policies"): a portable one built on
//! POSIX `ucontext_t`, and a hand-written x86_64 fast path that skips
//! restoring callee-saved registers on the path where the coroutine never
//! yields. Both expose the same three-method shape below, so `spawn`,
//! `Handle::resume` and `Coroutine::yield_now` are written once.
//!
//! ```
//! use corovio::context::{spawn, Options, Status};
//!
//! let mut handle = spawn(|coro| {
//!     println!("running");
//!     coro.yield_now().unwrap();
//!     println!("resumed");
//! }, Options::default()).unwrap();
//!
//! assert_eq!(handle.status(), Status::Suspended);
//! assert_eq!(handle.resume().unwrap(), Status::Completed);
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::os::raw::c_void;

use crate::error::{Error, Result};

pub mod stack;

#[cfg(all(target_arch = "x86_64", not(feature = "force-portable-backend")))]
mod fastpath;
#[cfg(all(target_arch = "x86_64", not(feature = "force-portable-backend")))]
use self::fastpath::BackendState;

#[cfg(not(all(target_arch = "x86_64", not(feature = "force-portable-backend"))))]
mod portable;
#[cfg(not(all(target_arch = "x86_64", not(feature = "force-portable-backend"))))]
use self::portable::BackendState;

pub use self::stack::{Stack, STACK_SIZE_MIN};

/// Signature of the function a backend enters on its first switch. Always
/// `trampoline` below; kept as a named type so backend modules don't each
/// repeat the raw function-pointer type.
pub(crate) type EntryFn = unsafe extern "C" fn(*mut c_void);

/// Outcome of `spawn` or `resume`: spec §6's `{Completed, Suspended}`
/// (the `Error` arm of that tri-state is `Result`'s `Err` instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Completed,
    Suspended,
}

/// Tunables for [`spawn`]. Stack size is a parameter rather than a
/// compile-time constant (spec §4.3 "Stack allocation policy"); 16 KiB is
/// the documented minimum and the `Default`.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    stack_size: usize,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            stack_size: STACK_SIZE_MIN,
        }
    }
}

impl Options {
    pub fn new() -> Options {
        Options::default()
    }

    /// Sets the coroutine's stack size. Real wrapped calls need more than
    /// the 16 KiB minimum; this is why it's a per-spawn parameter and not
    /// a crate-wide constant.
    pub fn stack_size(mut self, size: usize) -> Options {
        self.stack_size = size;
        self
    }
}

struct Context {
    backend: BackendState,
    stack: Stack,
    closure: Option<Box<dyn FnOnce(&mut Coroutine) + 'static>>,
    active: Cell<bool>,
    // Raw pointers live inside `backend`'s save areas once spawned; nothing
    // about this type should cross threads (spec §5: a context is bound to
    // the thread that spawned it).
    _not_send: PhantomData<*mut ()>,
}

/// The caller-side half of a spawned coroutine. Owns the stack and the
/// backend's machine-state save areas for as long as the coroutine might
/// still run. Driven with [`Handle::resume`].
///
/// Deliberately not `Send`: see spec §5.
pub struct Handle {
    ctx: Box<Context>,
    status: Status,
}

/// The coroutine-side handle, passed as `&mut Coroutine` to the spawned
/// closure. Its only operation is [`Coroutine::yield_now`].
pub struct Coroutine<'a> {
    ctx: *mut Context,
    _marker: PhantomData<&'a mut Context>,
}

unsafe extern "C" fn trampoline(data: *mut c_void) {
    let ctx = &mut *(data as *mut Context);
    let f = ctx
        .closure
        .take()
        .expect("coroutine entry point invoked more than once");
    let mut coro = Coroutine {
        ctx: data as *mut Context,
        _marker: PhantomData,
    };
    f(&mut coro);
    ctx.active.set(false);
}

/// Spawns a coroutine running `f` and performs the first entry into it
/// (spec §4.1 `spawn`): the call does not return until `f` either returns
/// or calls `coro.yield_now()`.
pub fn spawn<F>(f: F, opts: Options) -> Result<Handle>
where
    F: FnOnce(&mut Coroutine) + 'static,
{
    let stack = Stack::new(opts.stack_size);
    let mut boxed = Box::new(Context {
        backend: BackendState::new_uninit(),
        stack,
        closure: Some(Box::new(f)),
        active: Cell::new(true),
        _not_send: PhantomData,
    });

    let ctx_ptr: *mut Context = &mut *boxed;
    let stack_base = boxed.stack.base();
    let stack_top = boxed.stack.top();

    let switched = unsafe {
        boxed
            .backend
            .spawn(stack_base, stack_top, trampoline, ctx_ptr as *mut c_void)
    };

    if switched < 0 {
        log::warn!("corovio: backend failed to prepare machine state for spawn");
        return Err(Error::Backend("failed to initialize coroutine"));
    }

    let status = if boxed.active.get() {
        Status::Suspended
    } else {
        Status::Completed
    };
    log::trace!("corovio: spawned coroutine, initial status = {:?}", status);
    Ok(Handle {
        ctx: boxed,
        status,
    })
}

impl Handle {
    /// Status as of the last `spawn`/`resume`, without switching.
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_completed(&self) -> bool {
        self.status == Status::Completed
    }

    /// Resumes the coroutine (spec §4.1 `continue`). Once the coroutine
    /// has completed, further calls are no-ops that keep returning
    /// `Completed` (spec §8 "Idempotent completion") rather than
    /// attempting another switch.
    pub fn resume(&mut self) -> Result<Status> {
        if self.status == Status::Completed {
            return Ok(Status::Completed);
        }

        let switched = unsafe { self.ctx.backend.resume() };
        if switched < 0 {
            log::warn!("corovio: backend failed to resume coroutine");
            return Err(Error::Backend("failed to resume coroutine"));
        }

        self.status = if self.ctx.active.get() {
            Status::Suspended
        } else {
            Status::Completed
        };
        log::trace!("corovio: resumed coroutine, status = {:?}", self.status);
        Ok(self.status)
    }
}

impl<'a> Coroutine<'a> {
    /// Suspends the coroutine, returning control to whoever most recently
    /// called `spawn` or `resume` on it (spec §4.1 `yield`).
    pub fn yield_now(&mut self) -> Result<()> {
        let ctx = unsafe { &mut *self.ctx };
        if !ctx.active.get() {
            return Err(Error::Protocol("yield from an inactive context"));
        }
        log::trace!("corovio: coroutine yielding");
        let switched = unsafe { ctx.backend.yield_now() };
        if switched < 0 {
            return Err(Error::Backend("failed to yield"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // Scenario 1 (spec §8): a coroutine that never yields.
    #[test]
    fn trivial_coroutine_completes_immediately() {
        let mut handle = spawn(|_| {}, Options::default()).unwrap();
        assert_eq!(handle.status(), Status::Completed);
        assert!(handle.is_completed());
        // continue after completion is a no-op
        assert_eq!(handle.resume().unwrap(), Status::Completed);
    }

    // Scenario 2 (spec §8): yields twice then returns.
    #[test]
    fn two_yield_coroutine_balances() {
        let seq = Arc::new(AtomicUsize::new(0));
        let seq_inner = seq.clone();
        let mut handle = spawn(
            move |coro| {
                let seq = seq_inner;
                assert_eq!(seq.load(Ordering::SeqCst), 0);
                seq.store(1, Ordering::SeqCst);
                coro.yield_now().unwrap();

                assert_eq!(seq.load(Ordering::SeqCst), 2);
                seq.store(3, Ordering::SeqCst);
                coro.yield_now().unwrap();

                assert_eq!(seq.load(Ordering::SeqCst), 4);
                seq.store(5, Ordering::SeqCst);
            },
            Options::default(),
        )
        .unwrap();

        assert_eq!(handle.status(), Status::Suspended);
        seq.store(2, Ordering::SeqCst);

        assert_eq!(handle.resume().unwrap(), Status::Suspended);
        seq.store(4, Ordering::SeqCst);

        assert_eq!(handle.resume().unwrap(), Status::Completed);
        assert_eq!(seq.load(Ordering::SeqCst), 5);

        // further continues are no-ops
        assert_eq!(handle.resume().unwrap(), Status::Completed);
        assert_eq!(handle.resume().unwrap(), Status::Completed);
    }

    #[test]
    fn stack_size_is_configurable() {
        let opts = Options::new().stack_size(64 * 1024);
        let mut handle = spawn(
            |coro| {
                // touch a reasonably large chunk of the stack
                let buf = [0u8; 32 * 1024];
                assert_eq!(buf.len(), 32 * 1024);
                coro.yield_now().unwrap();
            },
            opts,
        )
        .unwrap();
        assert_eq!(handle.status(), Status::Suspended);
        assert_eq!(handle.resume().unwrap(), Status::Completed);
    }

    #[test]
    fn closures_can_move_captured_state_out() {
        use std::sync::mpsc;
        let (tx, rx) = mpsc::channel();
        let mut handle = spawn(
            move |_| {
                tx.send(42).unwrap();
            },
            Options::default(),
        )
        .unwrap();
        assert!(handle.is_completed());
        assert_eq!(rx.recv().unwrap(), 42);
    }
}
