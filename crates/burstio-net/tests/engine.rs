//! End-to-end engine tests over real loopback sockets.

use burstio_net::socket::Socket;
use burstio_net::{ListenSocket, NetConfig, SocketHandler, SocketManager};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn test_config() -> NetConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    NetConfig::from_env()
        .num_workers(4)
        .wait_timeout(Duration::from_millis(20))
}

/// Echoes everything back and counts lifecycle hooks.
struct Echo {
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

impl SocketHandler for Echo {
    fn on_connect(&self, _sock: &Socket) {
        self.connects.fetch_add(1, Ordering::SeqCst);
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
        sock.burst_send(&data);
        sock.burst_push();
    }

    fn on_disconnect(&self, _sock: &Socket) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Swallows input; used when only lifecycle behavior matters.
struct Sink;

impl SocketHandler for Sink {
    fn on_read(&self, sock: &Socket) {
        let mut rb = sock.recv_buffer();
        while !rb.is_empty() {
            let n = rb.contiguous_len();
            rb.consume(n);
        }
    }
}

fn bind_echo(
    manager: &Arc<SocketManager>,
) -> (Arc<ListenSocket>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let (c, d) = (Arc::clone(&connects), Arc::clone(&disconnects));
    let listener = ListenSocket::bind(
        manager,
        "127.0.0.1",
        0,
        Box::new(move || {
            Box::new(Echo {
                connects: Arc::clone(&c),
                disconnects: Arc::clone(&d),
            })
        }),
    )
    .unwrap();
    (listener, connects, disconnects)
}

#[test]
fn test_echo_round_trip() {
    let manager = SocketManager::new(test_config()).unwrap();
    let (listener, connects, disconnects) = bind_echo(&manager);
    let addr = listener.local_addr();

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"burst of bytes").unwrap();

    let mut buf = [0u8; 64];
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut got = Vec::new();
    while got.len() < 14 {
        let n = client.read(&mut buf).unwrap();
        assert!(n > 0, "server closed early");
        got.extend_from_slice(&buf[..n]);
    }
    assert_eq!(&got, b"burst of bytes");
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    drop(client);
    let start = Instant::now();
    while disconnects.load(Ordering::SeqCst) == 0 {
        assert!(start.elapsed() < Duration::from_secs(5), "no disconnect");
        std::thread::sleep(Duration::from_millis(10));
    }

    manager.shutdown();
}

#[test]
fn test_large_burst_echo() {
    // larger than any single send/recv, forces partial sends, ring
    // wraparound and write re-arms
    let manager = SocketManager::new(test_config()).unwrap();
    let (listener, _connects, _disconnects) = bind_echo(&manager);
    let addr = listener.local_addr();

    let payload: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();

    let mut client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let writer = {
        let payload = payload.clone();
        let mut w = client.try_clone().unwrap();
        std::thread::spawn(move || {
            w.write_all(&payload).unwrap();
        })
    };

    let mut got = Vec::with_capacity(payload.len());
    let mut buf = [0u8; 8192];
    while got.len() < payload.len() {
        let n = client.read(&mut buf).unwrap();
        assert!(n > 0, "server closed mid-burst");
        got.extend_from_slice(&buf[..n]);
    }
    writer.join().unwrap();
    assert_eq!(got, payload, "echoed bytes differ");

    manager.shutdown();
}

#[test]
fn test_single_burst_70k() {
    // one burst_send, one burst_push; the write path must carry the
    // whole payload through partial sends and write re-arms
    let manager = SocketManager::new(test_config()).unwrap();

    struct Collect {
        got: Arc<Mutex<Vec<u8>>>,
        disconnects: Arc<AtomicUsize>,
    }
    impl SocketHandler for Collect {
        fn on_read(&self, sock: &Socket) {
            let mut rb = sock.recv_buffer();
            let mut got = self.got.lock().unwrap();
            while !rb.is_empty() {
                let n = rb.contiguous_len();
                got.extend_from_slice(&rb.readable()[..n]);
                rb.consume(n);
            }
        }
        fn on_disconnect(&self, _sock: &Socket) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    let got = Arc::new(Mutex::new(Vec::new()));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let (g, d) = (Arc::clone(&got), Arc::clone(&disconnects));
    let listener = ListenSocket::bind(
        &manager,
        "127.0.0.1",
        0,
        Box::new(move || {
            Box::new(Collect {
                got: Arc::clone(&g),
                disconnects: Arc::clone(&d),
            })
        }),
    )
    .unwrap();

    let payload: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
    let sock = manager
        .connect_tcp("127.0.0.1", listener.local_addr().port(), None, Box::new(Sink))
        .unwrap();

    assert!(sock.burst_send(&payload), "payload exceeds write ring");
    sock.burst_push();

    let start = Instant::now();
    loop {
        if got.lock().unwrap().len() >= payload.len() {
            break;
        }
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "only {} of {} bytes arrived",
            got.lock().unwrap().len(),
            payload.len()
        );
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(*got.lock().unwrap(), payload, "bytes differ");

    sock.disconnect();
    let start = Instant::now();
    while disconnects.load(Ordering::SeqCst) == 0 {
        assert!(start.elapsed() < Duration::from_secs(5), "no disconnect");
        std::thread::sleep(Duration::from_millis(10));
    }

    manager.shutdown();
}

#[test]
fn test_many_clients() {
    let manager = SocketManager::new(test_config()).unwrap();
    let (listener, connects, _) = bind_echo(&manager);
    let addr = listener.local_addr();

    let mut handles = Vec::new();
    for i in 0..20u8 {
        handles.push(std::thread::spawn(move || {
            let mut c = TcpStream::connect(addr).unwrap();
            c.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            let msg = [i; 100];
            c.write_all(&msg).unwrap();
            let mut got = Vec::new();
            let mut buf = [0u8; 256];
            while got.len() < msg.len() {
                let n = c.read(&mut buf).unwrap();
                assert!(n > 0);
                got.extend_from_slice(&buf[..n]);
            }
            assert_eq!(&got[..], &msg[..]);
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(connects.load(Ordering::SeqCst), 20);

    manager.shutdown();
}

#[test]
fn test_concurrent_disconnect_exactly_once() {
    let manager = SocketManager::new(test_config()).unwrap();
    let (listener, connects, disconnects) = bind_echo(&manager);
    let addr = listener.local_addr();

    let client = TcpStream::connect(addr).unwrap();
    let start = Instant::now();
    while connects.load(Ordering::SeqCst) == 0 {
        assert!(start.elapsed() < Duration::from_secs(5));
        std::thread::sleep(Duration::from_millis(5));
    }

    // peer reset and local teardown race; the hooks must fire once
    drop(client);
    manager.close_all();

    let start = Instant::now();
    while manager.live_count() > 0 {
        assert!(start.elapsed() < Duration::from_secs(5));
        std::thread::sleep(Duration::from_millis(5));
    }
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    let _ = listener;

    manager.shutdown();
}

#[test]
fn test_connect_tcp_refused() {
    let manager = SocketManager::new(test_config()).unwrap();

    // bind then drop to get a port nothing listens on
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };

    let result = manager.connect_tcp(
        "127.0.0.1",
        port,
        Some(Duration::from_millis(500)),
        Box::new(Sink),
    );
    assert!(result.is_err(), "connect to dead port succeeded");

    manager.shutdown();
}

#[test]
fn test_connect_tcp_round_trip() {
    let manager = SocketManager::new(test_config()).unwrap();
    let (listener, _, _) = bind_echo(&manager);
    let addr = listener.local_addr();

    struct Collect {
        got: Arc<Mutex<Vec<u8>>>,
    }
    impl SocketHandler for Collect {
        fn on_read(&self, sock: &Socket) {
            let mut rb = sock.recv_buffer();
            let mut got = self.got.lock().unwrap();
            while !rb.is_empty() {
                let n = rb.contiguous_len();
                got.extend_from_slice(&rb.readable()[..n]);
                rb.consume(n);
            }
        }
    }

    let got = Arc::new(Mutex::new(Vec::new()));
    let sock = manager
        .connect_tcp(
            "127.0.0.1",
            addr.port(),
            None,
            Box::new(Collect {
                got: Arc::clone(&got),
            }),
        )
        .unwrap();

    assert_eq!(sock.remote_ip(), std::net::IpAddr::from([127, 0, 0, 1]));
    assert!(sock.burst_send(b"ping over the engine"));
    sock.burst_push();

    let start = Instant::now();
    loop {
        if got.lock().unwrap().as_slice() == b"ping over the engine" {
            break;
        }
        assert!(start.elapsed() < Duration::from_secs(5), "echo never arrived");
        std::thread::sleep(Duration::from_millis(10));
    }

    manager.shutdown();
}

#[test]
fn test_burst_push_from_many_threads() {
    // hammer burst_send/burst_push from several producers; the send
    // token must keep the byte stream intact
    let manager = SocketManager::new(test_config()).unwrap();

    struct Count {
        seen: Arc<AtomicUsize>,
    }
    impl SocketHandler for Count {
        fn on_read(&self, sock: &Socket) {
            let mut rb = sock.recv_buffer();
            let n = rb.len();
            while !rb.is_empty() {
                let c = rb.contiguous_len();
                rb.consume(c);
            }
            drop(rb);
            self.seen.fetch_add(n, Ordering::SeqCst);
        }
    }

    let seen = Arc::new(AtomicUsize::new(0));
    let seen2 = Arc::clone(&seen);
    let listener = ListenSocket::bind(
        &manager,
        "127.0.0.1",
        0,
        Box::new(move || {
            Box::new(Count {
                seen: Arc::clone(&seen2),
            })
        }),
    )
    .unwrap();

    let sock = manager
        .connect_tcp("127.0.0.1", listener.local_addr().port(), None, Box::new(Sink))
        .unwrap();

    let producers: Vec<_> = (0..8)
        .map(|_| {
            let sock = Arc::clone(&sock);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    while !sock.burst_send(&[7u8; 64]) {
                        std::thread::yield_now();
                    }
                    sock.burst_push();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    sock.burst_push();

    let expected = 8 * 100 * 64;
    let start = Instant::now();
    while seen.load(Ordering::SeqCst) < expected {
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "only {} of {} bytes arrived",
            seen.load(Ordering::SeqCst),
            expected
        );
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(seen.load(Ordering::SeqCst), expected);

    manager.shutdown();
}

#[test]
fn test_burst_during_read_dispatch() {
    // while a read dispatch is still running its on_read, producers
    // arm write events for the same socket; dispatches must stay
    // serialized (debug builds assert overlap) and every byte must
    // come back
    let manager = SocketManager::new(test_config()).unwrap();
    let (listener, _, _) = bind_echo(&manager);

    struct SlowReader {
        seen: Arc<AtomicUsize>,
    }
    impl SocketHandler for SlowReader {
        fn on_read(&self, sock: &Socket) {
            // keep the read dispatch in flight while producers push
            std::thread::sleep(Duration::from_millis(2));
            let mut rb = sock.recv_buffer();
            let n = rb.len();
            while !rb.is_empty() {
                let c = rb.contiguous_len();
                rb.consume(c);
            }
            drop(rb);
            self.seen.fetch_add(n, Ordering::SeqCst);
        }
    }

    let seen = Arc::new(AtomicUsize::new(0));
    let sock = manager
        .connect_tcp(
            "127.0.0.1",
            listener.local_addr().port(),
            None,
            Box::new(SlowReader {
                seen: Arc::clone(&seen),
            }),
        )
        .unwrap();

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let sock = Arc::clone(&sock);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    while !sock.burst_send(&[3u8; 128]) {
                        std::thread::yield_now();
                    }
                    sock.burst_push();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    sock.burst_push();

    let expected = 4 * 50 * 128;
    let start = Instant::now();
    while seen.load(Ordering::SeqCst) < expected {
        assert!(
            start.elapsed() < Duration::from_secs(20),
            "only {} of {} bytes echoed back",
            seen.load(Ordering::SeqCst),
            expected
        );
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(seen.load(Ordering::SeqCst), expected);

    manager.shutdown();
}

#[test]
fn test_concurrent_teardown_exactly_once() {
    let manager = SocketManager::new(test_config()).unwrap();
    let (listener, _, _) = bind_echo(&manager);

    struct CountDown {
        disconnects: Arc<AtomicUsize>,
    }
    impl SocketHandler for CountDown {
        fn on_read(&self, sock: &Socket) {
            let mut rb = sock.recv_buffer();
            while !rb.is_empty() {
                let n = rb.contiguous_len();
                rb.consume(n);
            }
        }
        fn on_disconnect(&self, _sock: &Socket) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    let disconnects = Arc::new(AtomicUsize::new(0));
    let sock = manager
        .connect_tcp(
            "127.0.0.1",
            listener.local_addr().port(),
            None,
            Box::new(CountDown {
                disconnects: Arc::clone(&disconnects),
            }),
        )
        .unwrap();

    // half tear down, half delete, all at once
    let barrier = Arc::new(std::sync::Barrier::new(8));
    let racers: Vec<_> = (0..8)
        .map(|i| {
            let sock = Arc::clone(&sock);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                if i % 2 == 0 {
                    sock.disconnect();
                } else {
                    sock.delete();
                }
            })
        })
        .collect();
    for r in racers {
        r.join().unwrap();
    }

    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert!(sock.is_deleted());
    assert!(!sock.is_connected());

    // only the listener remains live
    let start = Instant::now();
    while manager.live_count() > 1 {
        assert!(start.elapsed() < Duration::from_secs(5));
        std::thread::sleep(Duration::from_millis(5));
    }

    manager.shutdown();
}

#[test]
fn test_no_hooks_when_registration_fails() {
    // a shut-down manager refuses new streams; the handler must see
    // neither on_connect nor on_disconnect for a socket that never
    // entered the reactor
    let manager = SocketManager::new(test_config()).unwrap();
    manager.shutdown();

    let server = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = server.local_addr().unwrap().port();

    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let (c, d) = (Arc::clone(&connects), Arc::clone(&disconnects));
    let result = manager.connect_tcp(
        "127.0.0.1",
        port,
        Some(Duration::from_secs(1)),
        Box::new(Echo {
            connects: c,
            disconnects: d,
        }),
    );
    assert!(result.is_err(), "stream joined a stopped manager");
    assert_eq!(connects.load(Ordering::SeqCst), 0);
    assert_eq!(disconnects.load(Ordering::SeqCst), 0);
}

#[test]
fn test_shutdown_drains_everything() {
    let manager = SocketManager::new(test_config()).unwrap();
    let (listener, connects, disconnects) = bind_echo(&manager);
    let addr = listener.local_addr();

    let clients: Vec<_> = (0..10).map(|_| TcpStream::connect(addr).unwrap()).collect();
    let start = Instant::now();
    while connects.load(Ordering::SeqCst) < 10 {
        assert!(start.elapsed() < Duration::from_secs(5));
        std::thread::sleep(Duration::from_millis(5));
    }

    manager.shutdown();
    assert_eq!(manager.live_count(), 0);
    assert_eq!(disconnects.load(Ordering::SeqCst), 10);
    drop(clients);

    // second shutdown is a no-op
    manager.shutdown();
}
