//! Crate-wide error and result types.
//!
//! Mirrors the three origins of failure described by the call protocol:
//! a context backend that failed to prepare machine state, a caller that
//! misused the `start`/`cont`/`yield` protocol, and ordinary I/O failure
//! from the wrapped synchronous body.

use std::fmt;
use std::io;

/// Crate-wide result alias.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Debug)]
pub enum Error {
    /// The context backend failed to save or restore machine state.
    /// Fatal for the call: the stacks involved are in an unknown state
    /// and the owning handle must be discarded, not reused.
    Backend(&'static str),

    /// The caller misused the context or call protocol (e.g. `cont`
    /// without a prior `start`, `yield` from outside a coroutine, or
    /// `cont` on an already-completed call). The handle remains safe
    /// to destroy.
    Protocol(&'static str),

    /// An I/O failure propagated up from the wrapped synchronous body.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Backend(msg) => write!(f, "context backend failure: {}", msg),
            Error::Protocol(msg) => write!(f, "protocol misuse: {}", msg),
            Error::Io(ref e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl ::std::error::Error for Error {
    fn source(&self) -> Option<&(dyn ::std::error::Error + 'static)> {
        match *self {
            Error::Io(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}
