//! L3: the `start`/`cont` async call protocol.
//!
//! Turns a synchronous function body (one that calls the L2 shim functions
//! as though they were ordinary blocking calls) into a `foo_start`/
//! `foo_cont` pair an external event loop can drive without ever seeing a
//! suspended stack directly (spec §4.3).
//!
//! Grounded in `examples/original_source/mysql_async.c`'s
//! `mysql_real_connect_start`/`_start_internal` split: a param struct
//! captured on entry, `my_context_spawn` wrapping the real (still fully
//! synchronous) body, and a translation from the coroutine's
//! `Completed`/`Suspended` outcome into the public status/result the
//! caller sees. `async_call!` generates that split instead of writing it
//! by hand once per wrapped entry point.

use std::time::Duration;

use crate::context::{self, Status};
use crate::error::{Error, Result};
use crate::io::{shim, AsyncCallState, WaitMask};

/// What `foo_start`/`foo_cont` hand back (spec §4.3 steps 3 and 5, and §6
/// `status_bits`): either the call finished with a result, or it's waiting
/// on some combination of socket readiness and a deadline.
#[derive(Debug)]
pub enum CallStatus<T> {
    Done(T),
    Wait { mask: WaitMask, timeout: Duration },
}

impl<T> CallStatus<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, CallStatus::Done(_))
    }

    pub fn into_done(self) -> Option<T> {
        match self {
            CallStatus::Done(v) => Some(v),
            CallStatus::Wait { .. } => None,
        }
    }
}

/// Starts a wrapped call on `state` (spec §4.3 steps 1–3): allocates a
/// coroutine running `body`, performs the first entry, and translates the
/// outcome. `state` must not already own a suspended call -- that's a
/// caller protocol error, not a recoverable condition.
pub fn start<T, F>(state: &AsyncCallState, body: F) -> Result<CallStatus<T>>
where
    T: 'static,
    F: FnOnce() -> Result<T> + 'static,
{
    if state.take_context().is_some() {
        return Err(Error::Protocol(
            "start called on an AsyncCallState with a call already in progress",
        ));
    }

    // `body` and the closure below must be `'static` to cross into
    // `context::spawn`, but `state` only needs to outlive the call, which
    // it does: nothing drops the `AsyncCallState` that owns a `Handle`
    // while that handle is suspended (the only way to reclaim it is
    // `cont` running it to completion). A raw pointer sidesteps the
    // borrow without claiming a `'static` reference that doesn't exist.
    let state_ptr: *const AsyncCallState = state;
    state.set_call_active(true);
    let handle = context::spawn(
        move |coro| {
            let _guard = shim::bind_coroutine(coro);
            let result = body();
            unsafe { (*state_ptr).store_result(result) };
        },
        state.options(),
    );
    state.set_call_active(false);

    finish_entry(state, handle?)
}

/// Resumes a previously started call (spec §4.3 steps 4–5). `ready` tells
/// the shim which of the wait mask's bits actually fired; a caller that
/// woke up on a timeout instead reports `WaitMask::TIMEOUT` here so the
/// in-flight `async_*` call can surface it to the wrapped body as an I/O
/// error (spec §7 "Timeout expiry").
pub fn cont<T>(state: &AsyncCallState, ready: WaitMask) -> Result<CallStatus<T>>
where
    T: 'static,
{
    let mut handle = state.take_context().ok_or(Error::Protocol(
        "cont called on an AsyncCallState with no call in progress",
    ))?;

    state.set_ready_mask(ready);
    state.set_call_active(true);
    let result = handle.resume();
    state.set_call_active(false);

    match result {
        Ok(_) => finish_entry(state, handle),
        Err(e) => {
            log::warn!("corovio: backend failed to resume call: {}", e);
            Err(e)
        }
    }
}

fn finish_entry<T: 'static>(state: &AsyncCallState, handle: context::Handle) -> Result<CallStatus<T>> {
    match handle.status() {
        Status::Completed => {
            let result = state
                .take_result::<Result<T>>()
                .expect("wrapped call completed without storing a result");
            Ok(CallStatus::Done(result?))
        }
        Status::Suspended => {
            let mask = state.wait_mask();
            let timeout = state.timeout_hint();
            state.put_context(handle);
            Ok(CallStatus::Wait { mask, timeout })
        }
    }
}

/// Declares a `foo_start`/`foo_cont` pair for a wrapped synchronous
/// function (spec §4.3). The body runs exactly like an ordinary function
/// that happens to call `async_connect`/`async_recv`/`async_send`; this
/// macro supplies the surrounding spawn/resume/status-translation
/// plumbing (spec §4.3 steps 1–5) so that body never has to know it's
/// running inside a coroutine. Name pasting (`answer` -> `answer_start`/
/// `answer_cont`) goes through `paste`, the same approach
/// `bytecodealliance-wasmtime` uses for its own generated-accessor macros.
///
/// ```
/// use corovio::async_call;
/// use corovio::io::AsyncCallState;
///
/// async_call! {
///     fn answer(_state: &AsyncCallState) -> i32 {
///         Ok(42)
///     }
/// }
///
/// let state = AsyncCallState::new();
/// let status = answer_start(&state).unwrap();
/// assert_eq!(status.into_done(), Some(42));
/// ```
#[macro_export]
macro_rules! async_call {
    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident(
            $state:ident : &$state_ty:ty
            $(, $arg:ident : $arg_ty:ty)* $(,)?
        ) -> $ret:ty
        $body:block
    ) => {
        $crate::__paste::paste! {
            $(#[$meta])*
            $vis fn [<$name _start>](
                $state: &$state_ty
                $(, $arg: $arg_ty)*
            ) -> $crate::error::Result<$crate::call::CallStatus<$ret>> {
                let state_ptr: *const $state_ty = $state;
                $crate::call::start(
                    unsafe { &*state_ptr },
                    move || -> $crate::error::Result<$ret> {
                        let $state = unsafe { &*state_ptr };
                        $body
                    },
                )
            }

            $vis fn [<$name _cont>](
                $state: &$state_ty,
                ready: $crate::io::WaitMask,
            ) -> $crate::error::Result<$crate::call::CallStatus<$ret>> {
                $crate::call::cont($state, ready)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::AsyncCallState;

    fn add_one(state: &AsyncCallState, input: i32) -> Result<CallStatus<i32>> {
        start(state, move || Ok(input + 1))
    }

    #[test]
    fn start_completes_immediately_for_a_non_yielding_body() {
        let state = AsyncCallState::new();
        let status = add_one(&state, 41).unwrap();
        assert_eq!(status.into_done(), Some(42));
    }

    #[test]
    fn cont_without_start_is_a_protocol_error() {
        let state = AsyncCallState::new();
        let err = cont::<i32>(&state, WaitMask::NONE).unwrap_err();
        match err {
            Error::Protocol(_) => {}
            other => panic!("expected Protocol error, got {:?}", other),
        }
    }

    #[test]
    fn start_twice_without_consuming_is_a_protocol_error() {
        let state = AsyncCallState::new();
        let handle = context::spawn(|coro| coro.yield_now().unwrap(), state.options()).unwrap();
        state.put_context(handle);
        let err = start::<i32, _>(&state, || Ok(0)).unwrap_err();
        match err {
            Error::Protocol(_) => {}
            other => panic!("expected Protocol error, got {:?}", other),
        }
    }

    async_call! {
        fn greet(_state: &AsyncCallState, name: String) -> String {
            Ok(format!("hello, {}", name))
        }
    }

    #[test]
    fn generated_start_cont_pair_completes_without_yielding() {
        let state = AsyncCallState::new();
        let status = greet_start(&state, "corovio".to_string()).unwrap();
        assert_eq!(status.into_done(), Some("hello, corovio".to_string()));
    }
}
