//! Echo server on the burstio engine
//!
//! Usage:
//!     ./target/release/echo-server [port]
//!
//! Environment:
//!     BURST_NUM_WORKERS, BURST_READ_BUFFER, ... (see burstio-net)
//!     RUST_LOG=debug for engine tracing

use burstio_net::socket::Socket;
use burstio_net::{ListenSocket, NetConfig, SocketHandler, SocketManager};
use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Stats {
    accepts: AtomicU64,
    bytes: AtomicU64,
    active: AtomicU64,
    errors: AtomicU64,
}

impl Stats {
    fn new() -> Self {
        Self {
            accepts: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            active: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

struct Echo {
    stats: Arc<Stats>,
}

impl SocketHandler for Echo {
    fn on_connect(&self, _sock: &Socket) {
        self.stats.accepts.fetch_add(1, Ordering::Relaxed);
        self.stats.active.fetch_add(1, Ordering::Relaxed);
    }

    fn on_read(&self, sock: &Socket) {
        let mut data = Vec::new();
        {
            let mut rb = sock.recv_buffer();
            while !rb.is_empty() {
                let n = rb.contiguous_len();
                data.extend_from_slice(&rb.readable()[..n]);
                rb.consume(n);
            }
        }
        self.stats.bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
        sock.burst_send(&data);
        sock.burst_push();
    }

    fn on_disconnect(&self, _sock: &Socket) {
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
    }

    fn on_error(&self, _sock: &Socket, _code: i32) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() {
    env_logger::init();

    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(9998);

    let manager = SocketManager::new(NetConfig::from_env()).expect("engine start failed");

    let stats = Arc::new(Stats::new());
    let factory_stats = Arc::clone(&stats);
    let listener = ListenSocket::bind(
        &manager,
        "0.0.0.0",
        port,
        Box::new(move || {
            Box::new(Echo {
                stats: Arc::clone(&factory_stats),
            })
        }),
    )
    .expect("bind failed");

    info!("echo-server: listening on {}", listener.local_addr());

    let start = Instant::now();
    loop {
        std::thread::sleep(Duration::from_secs(5));
        eprintln!(
            "[{:.1}s] active={} accepts={} bytes={} err={}",
            start.elapsed().as_secs_f64(),
            stats.active.load(Ordering::Relaxed),
            stats.accepts.load(Ordering::Relaxed),
            stats.bytes.load(Ordering::Relaxed),
            stats.errors.load(Ordering::Relaxed),
        );
    }
}
