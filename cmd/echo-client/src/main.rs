//! Load-generating echo client
//!
//! Opens N engine-driven connections to an echo server, pushes bursts
//! on each and verifies every byte comes back.
//!
//! Usage:
//!     ./target/release/echo-client [host] [port] [connections] [bursts]

use burstio_net::socket::Socket;
use burstio_net::{NetConfig, SocketHandler, SocketManager};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const BURST: &[u8] = &[0xA5; 1024];

struct Verify {
    echoed: Arc<AtomicU64>,
    mismatches: Arc<AtomicU64>,
}

impl SocketHandler for Verify {
    fn on_read(&self, sock: &Socket) {
        let mut rb = sock.recv_buffer();
        while !rb.is_empty() {
            let n = rb.contiguous_len();
            if rb.readable()[..n].iter().any(|&b| b != 0xA5) {
                self.mismatches.fetch_add(1, Ordering::Relaxed);
            }
            rb.consume(n);
            self.echoed.fetch_add(n as u64, Ordering::Relaxed);
        }
    }
}

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().and_then(|s| s.parse().ok()).unwrap_or(9998);
    let conns: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(16);
    let bursts: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(100);

    let manager = SocketManager::new(NetConfig::from_env()).expect("engine start failed");

    let echoed = Arc::new(AtomicU64::new(0));
    let mismatches = Arc::new(AtomicU64::new(0));

    eprintln!(
        "echo-client: {} connections x {} bursts of {} bytes to {}:{}",
        conns,
        bursts,
        BURST.len(),
        host,
        port
    );

    let start = Instant::now();
    let mut sockets = Vec::with_capacity(conns);
    for _ in 0..conns {
        let sock = manager
            .connect_tcp(
                &host,
                port,
                None,
                Box::new(Verify {
                    echoed: Arc::clone(&echoed),
                    mismatches: Arc::clone(&mismatches),
                }),
            )
            .expect("connect failed");
        sockets.push(sock);
    }

    for _ in 0..bursts {
        for sock in &sockets {
            while !sock.burst_send(BURST) {
                std::thread::yield_now();
            }
            sock.burst_push();
        }
    }

    let expected = (conns * bursts * BURST.len()) as u64;
    while echoed.load(Ordering::Relaxed) < expected {
        if start.elapsed() > Duration::from_secs(60) {
            eprintln!(
                "timeout: {}/{} bytes echoed",
                echoed.load(Ordering::Relaxed),
                expected
            );
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    let elapsed = start.elapsed();
    eprintln!(
        "done: {} bytes in {:.2}s ({:.1} MiB/s), {} mismatched chunks",
        echoed.load(Ordering::Relaxed),
        elapsed.as_secs_f64(),
        echoed.load(Ordering::Relaxed) as f64 / elapsed.as_secs_f64() / (1024.0 * 1024.0),
        mismatches.load(Ordering::Relaxed),
    );

    for sock in &sockets {
        sock.disconnect();
    }
    manager.shutdown();
}
