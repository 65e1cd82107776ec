//! Loopback test servers for exercising the call protocol's yield paths
//! deterministically (spec §8 scenarios 3–6), per SPEC_FULL.md's test
//! tooling section: plain `std::net` sockets, no mocking crate.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

/// A server that accepts one connection, reads a line, and immediately
/// echoes a fixed reply. Used for the "everything succeeds on the first
/// try" path.
pub fn spawn_immediate_echo(reply: &'static str) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = [0u8; 256];
        let n = sock.read(&mut buf).unwrap();
        assert!(n > 0);
        sock.write_all(reply.as_bytes()).unwrap();
        sock.write_all(b"\n").unwrap();
    });
    (addr, handle)
}

/// A server that accepts one connection, reads a line, then replies one
/// byte at a time with a short sleep between bytes -- forces a client
/// reading byte-by-byte (as `corovio::demo_client::DemoClient` does) to
/// observe `EAGAIN` and yield more than once before the full line is
/// available.
pub fn spawn_trickle_echo(reply: &'static str, delay: Duration) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = [0u8; 256];
        let n = sock.read(&mut buf).unwrap();
        assert!(n > 0);
        for byte in reply.as_bytes().iter().chain(std::iter::once(&b'\n')) {
            thread::sleep(delay);
            sock.write_all(&[*byte]).unwrap();
        }
    });
    (addr, handle)
}

/// A server that accepts a connection and then holds it open without ever
/// reading or writing, until the test is done with it. Used to put a
/// client's `recv` into a guaranteed, indefinite `EAGAIN` so the test can
/// drive a manual timeout through `cont` deterministically, without
/// depending on real elapsed time.
pub fn spawn_silent(hold: Duration) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (sock, _) = listener.accept().unwrap();
        thread::sleep(hold);
        drop(sock);
    });
    (addr, handle)
}
