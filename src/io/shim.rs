//! L2: non-blocking I/O wrapped so a synchronous call body sees ordinary
//! blocking-looking `connect`/`recv`/`send` calls whether it's actually
//! running under an event loop or not (spec §4.2).
//!
//! Grounded in `examples/original_source/mysql_async.c`'s
//! `my_async_connect_func`: set the socket non-blocking, attempt the
//! syscall, and on `EINPROGRESS`/`EAGAIN`/`EWOULDBLOCK` record a wait mask
//! and yield instead of retrying in a spin loop. The original installs
//! this as a process-wide `vio_external_*_hook`; we don't -- see the
//! thread-local below instead.
//!
//! Unlike the original, the call-state pointer here is *not* threaded
//! through every call site as an explicit parameter, since `&AsyncCallState`
//! is already a parameter of these functions. What the thread-local carries
//! is narrower: a pointer to the *coroutine* handle, so a deeply nested call
//! inside the wrapped body can yield without the body itself being rewritten
//! to pass a `&mut Coroutine` down through every layer. It is bound once,
//! inside the closure `async_call!` spawns, for the whole lifetime of that
//! closure -- which is also the whole lifetime of the wrapped call, across
//! every `cont` that resumes it.

use std::cell::Cell;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::raw::c_void;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::context::Coroutine;
use crate::error::{Error, Result};
use crate::io::{AsyncCallState, WaitMask};

thread_local! {
    static CURRENT_COROUTINE: Cell<*mut c_void> = Cell::new(std::ptr::null_mut());
}

/// Binds the calling coroutine as the one `wait_for` below yields through.
/// Held for the whole lifetime of the wrapped call's closure; restores the
/// previous binding (normally `None`) on drop, which on a single thread
/// only ever matters for the degenerate case of one wrapped call invoking
/// another.
pub(crate) struct CoroutineGuard {
    prev: *mut c_void,
}

impl Drop for CoroutineGuard {
    fn drop(&mut self) {
        CURRENT_COROUTINE.with(|c| c.set(self.prev));
    }
}

pub(crate) fn bind_coroutine(coro: &mut Coroutine) -> CoroutineGuard {
    let ptr = coro as *mut Coroutine as *mut c_void;
    let prev = CURRENT_COROUTINE.with(|c| c.replace(ptr));
    CoroutineGuard { prev }
}

fn yield_current() -> Result<()> {
    let ptr = CURRENT_COROUTINE.with(|c| c.get());
    if ptr.is_null() {
        return Err(Error::Protocol(
            "async I/O shim function called outside an active async call",
        ));
    }
    // Safety: `ptr` was produced from a live `&mut Coroutine` by
    // `bind_coroutine` and the binding is only ever cleared when that
    // coroutine's closure has returned, so the pointee is still valid here.
    let coro: &mut Coroutine<'static> = unsafe { &mut *(ptr as *mut Coroutine<'static>) };
    coro.yield_now()
}

/// Records `mask` on `state`, yields, and on resume checks whether the
/// caller reported a timeout instead of real readiness (spec §4.3 `cont`
/// step 2: the caller can wake a wrapped call up with nothing ready to
/// signal its deadline passed).
fn wait_for(state: &AsyncCallState, fd: RawFd, mask: WaitMask) -> Result<()> {
    state.set_socket_fd(fd);
    state.set_wait_mask(mask);
    state.set_suspended(true);
    log::debug!("corovio: yielding, waiting for {}", mask);
    yield_current()?;
    state.set_suspended(false);
    state.set_wait_mask(WaitMask::NONE);

    let ready = state.ready_mask();
    state.set_ready_mask(WaitMask::NONE);
    if ready.contains(WaitMask::TIMEOUT) {
        log::debug!("corovio: wait for {} timed out", mask);
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "corovio: operation timed out",
        )));
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
    }
    Ok(())
}

/// Reads `SO_ERROR` off `fd` (spec §4.2 `async_connect` step 4): the way a
/// non-blocking `connect()` that reported `EINPROGRESS` surfaces its
/// eventual success or failure once the socket becomes writable.
fn socket_error(fd: RawFd) -> Result<i32> {
    let mut errno: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut errno as *mut libc::c_int as *mut c_void,
            &mut len,
        )
    };
    if ret < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    Ok(errno)
}

fn raw_sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
            }
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
            }
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

/// Connects `fd` to `addr`. Under an active async call, sets the socket
/// non-blocking and yields on `EINPROGRESS`/`EALREADY` instead of
/// blocking, reporting `timeout` alongside the wait mask so the caller's
/// event loop knows how long to wait before giving up (spec §4.2
/// `async_connect` steps 3–4); outside one, connects the ordinary blocking
/// way (spec §4.2 "Sync/async discrimination").
pub fn async_connect(state: &AsyncCallState, fd: RawFd, addr: &SocketAddr, timeout: Duration) -> Result<()> {
    let (storage, len) = raw_sockaddr(addr);
    let sockaddr = &storage as *const _ as *const libc::sockaddr;

    if !state.call_active() {
        log::trace!("corovio: connect() (sync path)");
        loop {
            let ret = unsafe { libc::connect(fd, sockaddr, len) };
            if ret == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(Error::Io(err));
        }
    }

    set_nonblocking(fd)?;
    loop {
        let ret = unsafe { libc::connect(fd, sockaddr, len) };
        if ret == 0 {
            log::trace!("corovio: connect() completed immediately");
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EISCONN) => return Ok(()),
            Some(libc::EINPROGRESS) | Some(libc::EALREADY) => break,
            Some(libc::EINTR) => continue,
            _ => return Err(Error::Io(err)),
        }
    }

    state.set_timeout_hint(timeout);
    wait_for(state, fd, WaitMask::WRITE | WaitMask::TIMEOUT)?;

    match socket_error(fd)? {
        0 => Ok(()),
        errno => Err(Error::Io(io::Error::from_raw_os_error(errno))),
    }
}

/// Receives into `buf`. Yields on `EAGAIN`/`EWOULDBLOCK` under an active
/// async call; blocks the ordinary way otherwise.
pub fn async_recv(state: &AsyncCallState, fd: RawFd, buf: &mut [u8]) -> Result<usize> {
    if !state.call_active() {
        loop {
            let ret = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut c_void, buf.len(), 0) };
            if ret >= 0 {
                return Ok(ret as usize);
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(Error::Io(err));
        }
    }

    set_nonblocking(fd)?;
    loop {
        let ret = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut c_void, buf.len(), 0) };
        if ret >= 0 {
            return Ok(ret as usize);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) => {
                wait_for(state, fd, WaitMask::READ)?;
            }
            Some(libc::EINTR) => continue,
            _ => return Err(Error::Io(err)),
        }
    }
}

/// Sends `buf`. Yields on `EAGAIN`/`EWOULDBLOCK` under an active async
/// call; blocks the ordinary way otherwise.
pub fn async_send(state: &AsyncCallState, fd: RawFd, buf: &[u8]) -> Result<usize> {
    if !state.call_active() {
        loop {
            let ret = unsafe { libc::send(fd, buf.as_ptr() as *const c_void, buf.len(), 0) };
            if ret >= 0 {
                return Ok(ret as usize);
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(Error::Io(err));
        }
    }

    set_nonblocking(fd)?;
    loop {
        let ret = unsafe { libc::send(fd, buf.as_ptr() as *const c_void, buf.len(), 0) };
        if ret >= 0 {
            return Ok(ret as usize);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) => {
                wait_for(state, fd, WaitMask::WRITE)?;
            }
            Some(libc::EINTR) => continue,
            _ => return Err(Error::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shim_functions_reject_use_outside_an_active_call() {
        // `yield_current` is only reachable once a wait actually happens,
        // which only happens on a nonblocking socket; exercising the
        // "no coroutine bound" guard directly is simpler and just as
        // faithful to the invariant being tested.
        let err = yield_current().unwrap_err();
        match err {
            Error::Protocol(_) => {}
            other => panic!("expected Protocol error, got {:?}", other),
        }
    }
}
