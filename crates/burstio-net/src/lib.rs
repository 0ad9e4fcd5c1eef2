//! # burstio-net
//!
//! Asynchronous TCP socket engine: non-blocking accept/connect/read/
//! write over a pool of worker threads, with the OS readiness or
//! completion mechanism (epoll, kqueue, select, IOCP) behind a single
//! demultiplexer contract.
//!
//! ## Architecture
//!
//! - [`demux`] - one reactor contract, four platform backends
//! - [`socket::Socket`] - a connection: fd, atomic state machine,
//!   read/write ring buffers, send token
//! - [`listener::ListenSocket`] - accepts connections
//! - [`manager::SocketManager`] - owns the demultiplexer, the live
//!   registry and the worker threads
//! - [`reaper::SocketReaper`] - deferred release off the dispatch
//!   threads
//!
//! ## Event discipline
//!
//! All interest is one-shot at the contract level: delivering an event
//! disarms the handle until the dispatcher re-arms it. At most one
//! interest (read or write) is armed per socket at a time; write
//! interest replaces read for the duration of a burst. A per-socket
//! dispatch lock held across each event's callbacks closes the
//! remaining window (a producer arming a write event while another
//! worker still carries an undispatched read event), so two threads
//! never dispatch callbacks for the same socket concurrently; the
//! send token additionally serializes the write path itself.
//!
//! ```no_run
//! use std::sync::Arc;
//! use burstio_net::{NetConfig, SocketManager, SocketHandler, ListenSocket};
//! use burstio_net::socket::Socket;
//!
//! struct Echo;
//! impl SocketHandler for Echo {
//!     fn on_read(&self, sock: &Socket) {
//!         let mut data = Vec::new();
//!         {
//!             let mut rb = sock.recv_buffer();
//!             while !rb.is_empty() {
//!                 let n = rb.contiguous_len();
//!                 data.extend_from_slice(&rb.readable()[..n]);
//!                 rb.consume(n);
//!             }
//!         }
//!         sock.burst_send(&data);
//!         sock.burst_push();
//!     }
//! }
//!
//! let manager = SocketManager::new(NetConfig::from_env()).unwrap();
//! let listener = ListenSocket::bind(&manager, "0.0.0.0", 4000,
//!     Box::new(|| Box::new(Echo))).unwrap();
//! # let _ = listener;
//! ```

pub mod config;
pub mod demux;
pub mod handler;
pub mod listener;
pub mod manager;
pub mod ops;
pub mod reaper;
pub mod socket;

// Re-exports for convenience
pub use burstio_core::{ConcurrentQueue, NetError, NetResult, RingBuffer, ThreadContext};
pub use config::NetConfig;
pub use handler::{HandlerFactory, SocketHandler};
pub use listener::ListenSocket;
pub use manager::SocketManager;
pub use socket::Socket;
