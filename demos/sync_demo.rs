//! Plain synchronous use of [`corovio::demo_client::DemoClient`], with no
//! coroutine in sight -- mirrors
//! `examples/original_source/sync-example1.c`'s `doit()`: connect, issue
//! one request, print the result, done.
//!
//! Run against `demos/async_demo.rs`'s companion server, or any line
//! server that echoes a response line per request line:
//!
//! ```text
//! cargo run --example sync_demo -- 127.0.0.1:7878 "hello"
//! ```

use std::env;
use std::net::ToSocketAddrs;
use std::process;

use corovio::io::AsyncCallState;
use corovio::demo_client::DemoClient;

fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:7878".to_string());
    let line = args.next().unwrap_or_else(|| "ping".to_string());

    let addr = addr
        .to_socket_addrs()
        .unwrap_or_else(|e| {
            eprintln!("corovio: bad address {:?}: {}", addr, e);
            process::exit(1);
        })
        .next()
        .unwrap_or_else(|| {
            eprintln!("corovio: address {:?} resolved to nothing", addr);
            process::exit(1);
        });

    // `AsyncCallState::call_active()` defaults to false, so every shim
    // call below takes the ordinary blocking path.
    let state = AsyncCallState::new();

    let client = DemoClient::connect(&state, addr).unwrap_or_else(|e| {
        eprintln!("corovio: connect failed: {}", e);
        process::exit(1);
    });

    let reply = client.request(&state, &line).unwrap_or_else(|e| {
        eprintln!("corovio: request failed: {}", e);
        process::exit(1);
    });

    println!("{}", reply);
}
