//! Socket manager: demultiplexer, registry and worker pool
//!
//! One instance owns the platform demultiplexer, the registry of live
//! sockets keyed by token, the worker threads that block in the wait
//! call, and the reaper. Multiple managers can coexist in a process;
//! nothing here is global.
//!
//! Workers pull event batches and dispatch them through the registry.
//! An event whose token has no registry entry is stale (the socket was
//! removed after the batch was pulled) and is dropped; a spurious
//! dispatch against a live socket ends in `WouldBlock` and is equally
//! harmless.

use crate::config::NetConfig;
use crate::demux::{Demultiplexer, Event, PlatformDemux, MAX_EVENTS};
use crate::handler::SocketHandler;
use crate::listener::ListenSocket;
use crate::ops;
use crate::reaper::SocketReaper;
use crate::socket::{Socket, SocketState};
use burstio_core::{NetError, NetResult, ThreadContext};
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::io;
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Clone)]
enum Entry {
    Listener(Arc<ListenSocket>),
    Stream(Arc<Socket>),
}

/// The engine instance. Worker threads hold a reference to it, so it
/// stays alive until [`shutdown`](SocketManager::shutdown) is called;
/// call it when the engine is no longer needed.
pub struct SocketManager {
    demux: PlatformDemux,
    registry: Mutex<HashMap<u64, Entry>>,
    workers: Mutex<Vec<(Arc<ThreadContext>, JoinHandle<()>)>>,
    reaper: SocketReaper,
    config: NetConfig,
    stopped: AtomicBool,
    weak_self: Weak<SocketManager>,
}

impl SocketManager {
    /// Create the demultiplexer and start the worker pool and reaper.
    pub fn new(config: NetConfig) -> NetResult<Arc<Self>> {
        let demux = PlatformDemux::new()?;
        let manager = Arc::new_cyclic(|weak| Self {
            demux,
            registry: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            reaper: SocketReaper::new(config.reaper_capacity),
            config,
            stopped: AtomicBool::new(false),
            weak_self: weak.clone(),
        });

        manager.reaper.start();

        let mut workers = manager.workers.lock().unwrap();
        for i in 0..manager.config.num_workers {
            let me = Arc::clone(&manager);
            let pair = burstio_core::thread::spawn_worker(
                &format!("burstio-worker-{}", i),
                move |ctx| me.worker_loop(&ctx),
            );
            workers.push(pair);
        }
        drop(workers);

        info!(
            "socket manager up: {} workers, {}ms wait",
            manager.config.num_workers,
            manager.config.wait_timeout.as_millis()
        );
        Ok(manager)
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub(crate) fn demux(&self) -> &PlatformDemux {
        &self.demux
    }

    pub(crate) fn reaper(&self) -> &SocketReaper {
        &self.reaper
    }

    /// Number of live registry entries, listeners included.
    pub fn live_count(&self) -> usize {
        self.registry.lock().unwrap().len()
    }

    fn worker_loop(&self, ctx: &ThreadContext) {
        let mut events: Vec<Event> = Vec::with_capacity(MAX_EVENTS);
        while ctx.is_running() {
            match self.demux.wait(&mut events, self.config.wait_timeout) {
                Ok(0) => continue,
                Ok(n) => {
                    trace!("dispatching {} events", n);
                    for i in 0..n {
                        let ev = events[i];
                        self.dispatch(ev);
                    }
                }
                Err(e) => {
                    if ctx.is_running() {
                        warn!("demultiplexer wait failed: {}", e);
                    }
                }
            }
        }
    }

    fn dispatch(&self, ev: Event) {
        let entry = match self.registry.lock().unwrap().get(&ev.token) {
            Some(e) => e.clone(),
            // stale event for a removed socket
            None => return,
        };
        match entry {
            Entry::Listener(listener) => listener.accept_ready(),
            Entry::Stream(sock) => {
                // held through finish_dispatch so dispatches for one
                // socket never overlap, even when a producer arms a
                // write event mid-batch
                let _serial = sock.begin_dispatch();
                if ev.error && !ev.readable && !ev.writable {
                    // failed completion or EOF reported without
                    // readiness; the syscall paths report their own
                    // error codes
                    sock.disconnect();
                } else {
                    if ev.readable {
                        sock.read_callback(ev.len);
                    }
                    if ev.writable {
                        sock.write_callback(ev.len);
                    }
                }
                sock.finish_dispatch();
            }
        }
    }

    /// Insert an accepted or connected stream and arm its first read.
    /// Rolls the registry entry back if registration fails.
    pub(crate) fn add_stream(&self, sock: Arc<Socket>) -> io::Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "manager is shut down",
            ));
        }
        let token = sock.token();
        let handle = sock.handle();
        {
            let mut reg = self.registry.lock().unwrap();
            if reg.contains_key(&token) {
                return Ok(());
            }
            reg.insert(token, Entry::Stream(sock));
        }
        if let Err(e) = self
            .demux
            .register(handle, token, crate::demux::Interest::Read)
        {
            self.registry.lock().unwrap().remove(&token);
            return Err(e);
        }
        Ok(())
    }

    pub(crate) fn add_listener(&self, listener: Arc<ListenSocket>) -> NetResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(NetError::ShutDown);
        }
        let token = listener.token();
        let handle = listener.handle();
        {
            let mut reg = self.registry.lock().unwrap();
            if reg.contains_key(&token) {
                return Ok(());
            }
            reg.insert(token, Entry::Listener(Arc::clone(&listener)));
        }

        cfg_if::cfg_if! {
            if #[cfg(windows)] {
                // completion ports have no readiness events for plain
                // listeners; a dedicated thread drains the accept queue
                let _ = handle;
                let me = self.arc();
                let _ = burstio_core::thread::spawn_worker("burstio-accept", move |ctx| {
                    while ctx.is_running() && listener.is_open() {
                        listener.accept_ready();
                        ctx.wait(Duration::from_millis(20));
                    }
                    let _ = me;
                });
                Ok(())
            } else {
                if let Err(e) = self
                    .demux
                    .register(handle, token, crate::demux::Interest::Read)
                {
                    self.registry.lock().unwrap().remove(&token);
                    return Err(e.into());
                }
                Ok(())
            }
        }
    }

    /// Drop the registry entry and stop watching the handle.
    /// Idempotent; a missing token is a no-op.
    pub(crate) fn remove_socket(&self, token: u64) {
        let removed = self.registry.lock().unwrap().remove(&token);
        if let Some(entry) = removed {
            let handle = match &entry {
                Entry::Listener(l) => l.handle(),
                Entry::Stream(s) => s.handle(),
            };
            if let Err(e) = self.demux.unregister(handle) {
                trace!("unregister {} failed: {}", token, e);
            }
        }
    }

    /// Kick the write path of a registered stream by token. Listeners
    /// and unknown tokens are ignored.
    pub fn want_write(&self, token: u64) {
        let entry = self.registry.lock().unwrap().get(&token).cloned();
        if let Some(Entry::Stream(sock)) = entry {
            sock.burst_push();
        }
    }

    /// Outbound connection with a bounded handshake.
    pub fn connect_tcp(
        &self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
        handler: Box<dyn SocketHandler>,
    ) -> NetResult<Arc<Socket>> {
        let timeout = timeout.unwrap_or(self.config.connect_timeout);
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|_| NetError::Resolve(host.to_string()))?
            .next()
            .ok_or_else(|| NetError::Resolve(host.to_string()))?;

        let sock = socket2::Socket::new(
            socket2::Domain::for_address(addr),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        sock.connect_timeout(&addr.into(), timeout).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                NetError::ConnectTimeout
            } else {
                NetError::Io(e)
            }
        })?;
        ops::configure_stream(&sock)?;
        let handle = ops::into_handle(sock);

        debug!("connected to {}", addr);
        let socket = Socket::new(handle, addr, handler, &self.arc(), SocketState::Connecting);
        if let Err(e) = socket.establish() {
            socket.disconnect();
            return Err(e.into());
        }
        Ok(socket)
    }

    /// Disconnect every stream and close every listener, then wait for
    /// the registry to drain. Safe against concurrent disconnects; the
    /// per-socket guards make every teardown exactly-once.
    pub fn close_all(&self) {
        let snapshot: Vec<Entry> = self.registry.lock().unwrap().values().cloned().collect();
        info!("closing {} live sockets", snapshot.len());
        for entry in snapshot {
            match entry {
                Entry::Listener(l) => l.close(),
                Entry::Stream(s) => s.disconnect(),
            }
        }
        while self.live_count() > 0 {
            std::thread::sleep(Duration::from_micros(500));
        }
    }

    /// Full shutdown: close everything, stop the workers and the
    /// reaper. Exactly-once; later calls return immediately.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("socket manager shutting down");
        self.close_all();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for (ctx, _) in &workers {
            ctx.terminate();
        }
        for _ in &workers {
            self.demux.wake();
        }
        for (_, handle) in workers {
            let _ = handle.join();
        }
        self.reaper.stop();
        info!("socket manager stopped");
    }

    fn arc(&self) -> Arc<Self> {
        self.weak_self.upgrade().expect("manager arc during drop")
    }
}
