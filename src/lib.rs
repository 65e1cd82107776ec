// The MIT License (MIT)

// Copyright (c) 2015 Rustcc developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! A stackful-coroutine shim for driving a synchronously written, blocking
//! client library from an external event loop without rewriting the
//! library's internals.
//!
//! Three layers, bottom to top:
//!
//! - [`context`] -- a stackful symmetric coroutine primitive: `spawn`,
//!   `yield_now`, `resume`. This is the only layer that touches a stack or a
//!   register file.
//! - [`io`] -- non-blocking socket calls (`async_connect`, `async_recv`,
//!   `async_send`) that translate `EAGAIN`/`EINPROGRESS` into a
//!   [`context::Coroutine::yield_now`] instead of blocking, so a
//!   synchronous call body can use them as drop-in replacements for
//!   ordinary blocking socket calls.
//! - [`call`] -- the `start`/`cont` protocol ([`async_call!`]) that turns
//!   one such call body into a pair of functions an event loop can drive by
//!   polling a file descriptor and re-entering on readiness, with no
//!   `async`/`await` and no second copy of the call body.
//!
//! ```
//! use corovio::async_call;
//! use corovio::io::AsyncCallState;
//!
//! async_call! {
//!     fn answer(_state: &AsyncCallState) -> i32 {
//!         Ok(42)
//!     }
//! }
//!
//! let state = AsyncCallState::new();
//! let status = answer_start(&state).unwrap();
//! assert_eq!(status.into_done(), Some(42));
//! ```

pub mod call;
pub mod context;
pub mod demo_client;
pub mod error;
pub mod io;

pub use error::{Error, Result};

#[doc(hidden)]
pub use paste as __paste;
