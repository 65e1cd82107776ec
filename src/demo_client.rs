//! A minimal synchronous line-protocol client: connect, send one request
//! line, read one response line. Stand-in for the real (and out of scope,
//! per the purpose this shim serves) database client library -- this is
//! the "opaque synchronous body" that [`crate::call::async_call!`] wraps in
//! the integration tests and the two demo binaries.
//!
//! Grounded in the shape of `examples/original_source/sync-example1.c`'s
//! `doit()`: connect, issue one request, read results, close. Written the
//! same way that function is -- ordinary blocking-looking code -- except
//! every socket operation goes through [`crate::io::shim`] instead of a
//! bare libc call, which is what makes it driveable from both
//! [`crate::demo_client::DemoClient::connect`]'s direct synchronous use and
//! from behind an `async_call!`-generated `start`/`cont` pair.

use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::io::shim;
use crate::io::AsyncCallState;

/// Connect timeout used by [`DemoClient::connect`] when the caller doesn't
/// need a tighter deadline than this.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One connection to a line-protocol echo-style server.
pub struct DemoClient {
    fd: RawFd,
}

impl DemoClient {
    /// Opens a TCP socket and connects it to `addr` with
    /// [`DEFAULT_CONNECT_TIMEOUT`]. Blocks under a plain call; yields
    /// through `state` when invoked from inside a wrapped `start`/`cont`
    /// call (spec §4.2 "Sync/async discrimination").
    pub fn connect(state: &AsyncCallState, addr: SocketAddr) -> Result<DemoClient> {
        DemoClient::connect_timeout(state, addr, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Same as [`DemoClient::connect`], with an explicit connect timeout
    /// (spec §4.2 `async_connect`'s `timeout` argument).
    pub fn connect_timeout(state: &AsyncCallState, addr: SocketAddr, timeout: Duration) -> Result<DemoClient> {
        let family = if addr.is_ipv4() {
            libc::AF_INET
        } else {
            libc::AF_INET6
        };
        let fd = unsafe { libc::socket(family, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        if let Err(e) = shim::async_connect(state, fd, &addr, timeout) {
            unsafe {
                libc::close(fd);
            }
            return Err(e);
        }

        Ok(DemoClient { fd })
    }

    /// File descriptor backing this connection, for `get_socket_fd`-style
    /// accessors on the type that embeds both a `DemoClient` and an
    /// `AsyncCallState`.
    pub fn socket_fd(&self) -> RawFd {
        self.fd
    }

    /// Sends `line` followed by `\n`, then reads and returns one `\n`
    /// terminated response line (without the trailing newline).
    pub fn request(&self, state: &AsyncCallState, line: &str) -> Result<String> {
        self.write_all(state, line.as_bytes())?;
        self.write_all(state, b"\n")?;
        self.read_line(state)
    }

    fn write_all(&self, state: &AsyncCallState, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = shim::async_send(state, self.fd, buf)?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "corovio: connection closed during write",
                )));
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    fn read_line(&self, state: &AsyncCallState) -> Result<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = shim::async_recv(state, self.fd, &mut byte)?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "corovio: connection closed before a full line was read",
                )));
            }
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        String::from_utf8(line)
            .map_err(|_| Error::Protocol("response line was not valid utf-8"))
    }
}

impl Drop for DemoClient {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn request_round_trips_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let n = sock.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"ping\n");
            sock.write_all(b"pong\n").unwrap();
        });

        let state = AsyncCallState::new();
        let client = DemoClient::connect(&state, addr).unwrap();
        let reply = client.request(&state, "ping").unwrap();
        assert_eq!(reply, "pong");

        server.join().unwrap();
    }
}
