//! The same request as `sync_demo.rs`, but driven from an explicit
//! `poll()` loop through a `start`/`cont` pair instead of blocking --
//! mirrors `examples/original_source/async-example1.c`'s `wait_for_mysql`/
//! `doit()` pattern, with `corovio::async_call!` standing in for the
//! `mysql_real_connect_start`/`_cont` pair that file hand-writes.
//!
//! ```text
//! cargo run --example async_demo -- 127.0.0.1:7878 "hello"
//! ```

use std::env;
use std::net::{SocketAddr, ToSocketAddrs};
use std::process;
use std::time::Duration;

use corovio::async_call;
use corovio::call::CallStatus;
use corovio::demo_client::DemoClient;
use corovio::io::{AsyncCallState, WaitMask};

async_call! {
    fn echo(state: &AsyncCallState, addr: SocketAddr, line: String) -> String {
        let client = DemoClient::connect(state, addr)?;
        let reply = client.request(state, &line)?;
        Ok(reply)
    }
}

/// The event loop's side of `wait_for_mysql`: block in `poll()` until the
/// requested events are ready or the deadline passes.
fn wait_for(mask: WaitMask, timeout: Duration, fd: libc::c_int) -> WaitMask {
    let mut pfd = libc::pollfd {
        fd,
        events: 0,
        revents: 0,
    };
    if mask.contains(WaitMask::READ) {
        pfd.events |= libc::POLLIN;
    }
    if mask.contains(WaitMask::WRITE) {
        pfd.events |= libc::POLLOUT;
    }
    let timeout_ms = if mask.contains(WaitMask::TIMEOUT) {
        timeout.as_millis() as libc::c_int
    } else {
        -1
    };

    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if ret == 0 {
        return WaitMask::TIMEOUT;
    }

    let mut ready = WaitMask::NONE;
    if pfd.revents & libc::POLLIN != 0 {
        ready = ready | WaitMask::READ;
    }
    if pfd.revents & libc::POLLOUT != 0 {
        ready = ready | WaitMask::WRITE;
    }
    ready
}

fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let addr_arg = args.next().unwrap_or_else(|| "127.0.0.1:7878".to_string());
    let line = args.next().unwrap_or_else(|| "ping".to_string());

    let addr: SocketAddr = addr_arg
        .to_socket_addrs()
        .unwrap_or_else(|e| {
            eprintln!("corovio: bad address {:?}: {}", addr_arg, e);
            process::exit(1);
        })
        .next()
        .unwrap_or_else(|| {
            eprintln!("corovio: address {:?} resolved to nothing", addr_arg);
            process::exit(1);
        });

    let state = AsyncCallState::new();

    let mut status = echo_start(&state, addr, line).unwrap_or_else(|e| {
        eprintln!("corovio: echo_start failed: {}", e);
        process::exit(1);
    });

    loop {
        match status {
            CallStatus::Done(reply) => {
                println!("{}", reply);
                break;
            }
            CallStatus::Wait { mask, timeout } => {
                let fd = state
                    .socket_fd()
                    .expect("a waiting call always has a socket to poll");
                let ready = wait_for(mask, timeout, fd);
                status = echo_cont(&state, ready).unwrap_or_else(|e| {
                    eprintln!("corovio: echo_cont failed: {}", e);
                    process::exit(1);
                });
            }
        }
    }
}
