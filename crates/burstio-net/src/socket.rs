//! A live TCP connection
//!
//! Each socket carries the OS handle, two ring buffers, an atomic
//! state machine and the send token. Lifecycle transitions are
//! exactly-once: `disconnect` is guarded by an atomic state swap,
//! `delete` by an atomic flag swap, and either one triggers the other
//! so a connection always ends up disconnected, removed from the
//! registry and queued on the reaper exactly once, whichever side
//! (peer reset, handler call, engine shutdown) fires first.
//!
//! The handle itself closes in `Drop`, when the last [`Arc`] owner
//! (registry entry, in-flight dispatch, reaper slot or embedder clone)
//! releases the socket. Disconnect only shuts the connection down, so
//! the fd number cannot be reused by the OS while callbacks may still
//! reference it.

use crate::demux::{Demultiplexer, Handle, Interest};
use crate::handler::SocketHandler;
use crate::manager::SocketManager;
use crate::ops;
use burstio_core::RingBuffer;
use log::{trace, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

#[cfg(windows)]
use crate::demux::iocp::{OpKind, OverlappedOp};
#[cfg(windows)]
use std::cell::UnsafeCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum SocketState {
    Connecting = 0,
    Connected = 1,
    Disconnected = 2,
}

/// Arbitration between the dispatcher and concurrent producers.
///
/// `armed` is the interest that should be active once no dispatch is
/// running. While `in_flight` is set a producer only records the
/// desired interest; the dispatcher applies it when it finishes, so
/// the one-shot re-arm and the burst arm can never race into two
/// concurrent dispatches for the same socket.
struct InterestState {
    in_flight: bool,
    armed: Interest,
}

pub struct Socket {
    handle: Handle,
    peer: SocketAddr,
    manager: Arc<SocketManager>,
    handler: Box<dyn SocketHandler>,
    state: AtomicU8,
    deleted: AtomicBool,
    /// Held by whichever thread owns the write path. Acquired by
    /// `burst_push`, released only when the write ring drains.
    send_token: AtomicBool,
    interest: Mutex<InterestState>,
    /// Held for the whole of one event dispatch. A producer can arm a
    /// write event while a read dispatch is between `wait` returning
    /// and `begin_dispatch`; the worker picking that event up parks
    /// here instead of overlapping the in-flight callbacks.
    dispatch: Mutex<()>,
    read_ring: Mutex<RingBuffer>,
    write_ring: Mutex<RingBuffer>,
    /// Dispatch entry count, used to assert dispatches for this
    /// socket never overlap.
    active_dispatches: AtomicU32,
    /// Write dispatch entry count, used to assert the token actually
    /// serializes the write path.
    busy_writers: AtomicU32,
    weak_self: Weak<Socket>,
    #[cfg(windows)]
    read_op: Box<UnsafeCell<OverlappedOp>>,
    #[cfg(windows)]
    write_op: Box<UnsafeCell<OverlappedOp>>,
    /// Length of the overlapped send currently in flight.
    #[cfg(windows)]
    posted_send: AtomicU32,
}

#[cfg(windows)]
unsafe impl Send for Socket {}
#[cfg(windows)]
unsafe impl Sync for Socket {}

impl Socket {
    pub(crate) fn new(
        handle: Handle,
        peer: SocketAddr,
        handler: Box<dyn SocketHandler>,
        manager: &Arc<SocketManager>,
        state: SocketState,
    ) -> Arc<Self> {
        let cfg = manager.config();
        Arc::new_cyclic(|weak| Self {
            handle,
            peer,
            manager: Arc::clone(manager),
            handler,
            state: AtomicU8::new(state as u8),
            deleted: AtomicBool::new(false),
            send_token: AtomicBool::new(false),
            interest: Mutex::new(InterestState {
                in_flight: false,
                armed: Interest::Read,
            }),
            dispatch: Mutex::new(()),
            read_ring: Mutex::new(RingBuffer::new(cfg.read_buffer_size)),
            write_ring: Mutex::new(RingBuffer::new(cfg.write_buffer_size)),
            active_dispatches: AtomicU32::new(0),
            busy_writers: AtomicU32::new(0),
            weak_self: weak.clone(),
            #[cfg(windows)]
            read_op: Box::new(UnsafeCell::new(OverlappedOp::new(OpKind::Read))),
            #[cfg(windows)]
            write_op: Box::new(UnsafeCell::new(OverlappedOp::new(OpKind::Write))),
            #[cfg(windows)]
            posted_send: AtomicU32::new(0),
        })
    }

    pub(crate) fn arc(&self) -> Arc<Self> {
        // weak_self is set by new_cyclic before the socket is shared
        self.weak_self.upgrade().expect("socket arc during drop")
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    /// Registry token identifying this socket within its manager.
    pub fn token(&self) -> u64 {
        self.handle as u64
    }

    /// Peer address captured at accept/connect time.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Just the peer's IP, without the port.
    pub fn remote_ip(&self) -> std::net::IpAddr {
        self.peer.ip()
    }

    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == SocketState::Connected as u8
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// The inbound ring. Drain it from `on_read`; undrained bytes stay
    /// for the next callback.
    pub fn recv_buffer(&self) -> MutexGuard<'_, RingBuffer> {
        self.read_ring.lock().unwrap()
    }

    /// Bytes currently queued for sending.
    pub fn pending_send(&self) -> usize {
        self.write_ring.lock().unwrap().len()
    }

    /// Enter the reactor: mark connected, register for read events and
    /// run the `on_connect` hook.
    pub(crate) fn establish(&self) -> io::Result<()> {
        self.state
            .store(SocketState::Connected as u8, Ordering::Release);
        if let Err(e) = self.manager.add_stream(self.arc()) {
            // never entered the reactor, so no lifecycle hooks fire
            self.state
                .store(SocketState::Connecting as u8, Ordering::Release);
            return Err(e);
        }
        self.handler.on_connect(self);
        #[cfg(windows)]
        self.post_recv();
        Ok(())
    }

    /// Append `data` to the write ring. All-or-nothing: returns false
    /// and leaves the ring untouched when it would not fit. Does not
    /// arm the write path; follow with [`burst_push`](Self::burst_push)
    /// once the burst is assembled.
    pub fn burst_send(&self, data: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }
        let ok = self.write_ring.lock().unwrap().write(data);
        if !ok {
            warn!(
                "write ring full for {}: dropping {} byte burst",
                self.peer,
                data.len()
            );
        }
        ok
    }

    /// Kick the write path. Safe to call from any thread and any
    /// handler; the send token makes sure only one write dispatch runs
    /// at a time, and redundant pushes are free.
    pub fn burst_push(&self) {
        if !self.is_connected() {
            return;
        }
        if self
            .send_token
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.arm_write();
        }
    }

    #[cfg(not(windows))]
    fn arm_write(&self) {
        let mut st = self.interest.lock().unwrap();
        st.armed = Interest::Write;
        if !st.in_flight {
            if let Err(e) = self
                .manager
                .demux()
                .rearm(self.handle, self.token(), Interest::Write)
            {
                warn!("arm write for {} failed: {}", self.peer, e);
            }
        }
        // in flight: the dispatcher applies the recorded interest when
        // it finishes
    }

    #[cfg(windows)]
    fn arm_write(&self) {
        self.post_send();
    }

    /// Called by the dispatcher before running callbacks. The returned
    /// guard serializes dispatches for this socket; the dispatcher
    /// holds it through [`finish_dispatch`](Self::finish_dispatch).
    /// Distinct from the interest lock so handlers calling
    /// `burst_push` from inside a callback do not self-deadlock.
    pub(crate) fn begin_dispatch(&self) -> MutexGuard<'_, ()> {
        let guard = self.dispatch.lock().unwrap();
        let prev = self.active_dispatches.fetch_add(1, Ordering::AcqRel);
        debug_assert_eq!(prev, 0, "overlapping dispatch for one socket");
        self.interest.lock().unwrap().in_flight = true;
        guard
    }

    /// Called by the dispatcher after callbacks. Re-arms the recorded
    /// interest unless the socket left the reactor meanwhile.
    pub(crate) fn finish_dispatch(&self) {
        let mut st = self.interest.lock().unwrap();
        st.in_flight = false;
        self.active_dispatches.fetch_sub(1, Ordering::AcqRel);
        if !self.is_connected() {
            return;
        }
        if let Err(e) = self
            .manager
            .demux()
            .rearm(self.handle, self.token(), st.armed)
        {
            // raced with unregister; the socket is on its way out
            trace!("rearm for {} failed: {}", self.peer, e);
        }
    }

    /// Readiness path: one non-blocking recv into the read ring, then
    /// the `on_read` hook.
    #[cfg(not(windows))]
    pub(crate) fn read_callback(&self, _len: usize) {
        if !self.is_connected() {
            return;
        }
        {
            let mut ring = self.read_ring.lock().unwrap();
            let space = ring.writable();
            if space.is_empty() {
                drop(ring);
                warn!("read ring full for {}, disconnecting", self.peer);
                self.disconnect();
                return;
            }
            match ops::recv(self.handle, space) {
                Ok(0) => {
                    // orderly close
                    drop(ring);
                    self.disconnect();
                    return;
                }
                Ok(n) => ring.advance_written(n),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    // spurious or stale readiness
                    return;
                }
                Err(e) => {
                    drop(ring);
                    let code = e.raw_os_error().unwrap_or(0);
                    self.handler.on_error(self, code);
                    self.disconnect();
                    return;
                }
            }
        }
        self.handler.on_read(self);
    }

    /// Completion path: `len` bytes already landed in the read ring.
    #[cfg(windows)]
    pub(crate) fn read_callback(&self, len: usize) {
        if !self.is_connected() {
            return;
        }
        self.read_ring.lock().unwrap().advance_written(len);
        self.handler.on_read(self);
        self.post_recv();
    }

    pub(crate) fn write_callback(&self, len: usize) {
        let prev = self.busy_writers.fetch_add(1, Ordering::AcqRel);
        debug_assert_eq!(prev, 0, "send token failed to serialize writes");
        self.write_inner(len);
        self.busy_writers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Drain the write ring to the OS. Keeps the send token on a
    /// partial send or `WouldBlock` so the next writability event
    /// resumes the burst; releases it only once the ring is empty.
    #[cfg(not(windows))]
    fn write_inner(&self, _len: usize) {
        if !self.is_connected() {
            return;
        }
        {
            let mut ring = self.write_ring.lock().unwrap();
            while !ring.is_empty() {
                let chunk = ring.readable();
                match ops::send(self.handle, chunk) {
                    Ok(n) => {
                        let partial = n < chunk.len();
                        ring.consume(n);
                        if partial {
                            return;
                        }
                    }
                    Err(e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::Interrupted =>
                    {
                        return;
                    }
                    Err(e) => {
                        drop(ring);
                        let code = e.raw_os_error().unwrap_or(0);
                        self.handler.on_error(self, code);
                        self.disconnect();
                        return;
                    }
                }
            }
        }
        self.release_send_token();
    }

    /// Completion path: `len` bytes of the posted send went out.
    #[cfg(windows)]
    fn write_inner(&self, len: usize) {
        if !self.is_connected() {
            return;
        }
        let posted = self.posted_send.swap(0, Ordering::AcqRel) as usize;
        let empty = {
            let mut ring = self.write_ring.lock().unwrap();
            ring.consume(len.min(posted));
            ring.is_empty()
        };
        if empty {
            self.release_send_token();
        } else {
            self.post_send();
        }
    }

    /// Release the token, then re-check the ring. A producer may have
    /// appended between the last drain and the release; without the
    /// re-check those bytes would sit until the next push.
    fn release_send_token(&self) {
        {
            let mut st = self.interest.lock().unwrap();
            st.armed = Interest::Read;
        }
        self.send_token.store(false, Ordering::Release);

        let refilled = !self.write_ring.lock().unwrap().is_empty();
        if refilled {
            self.burst_push();
        }
    }

    /// Tear the connection down. Exactly-once: the state swap admits a
    /// single caller, every later call is a no-op.
    pub fn disconnect(&self) {
        let prev = self
            .state
            .swap(SocketState::Disconnected as u8, Ordering::AcqRel);
        if prev == SocketState::Disconnected as u8 {
            return;
        }
        trace!("disconnect {}", self.peer);
        // on_disconnect pairs with on_connect: a socket that never
        // reached Connected saw neither
        if prev == SocketState::Connected as u8 {
            self.handler.on_disconnect(self);
        }
        self.manager.remove_socket(self.token());
        ops::shutdown_both(self.handle);
        if !self.deleted.load(Ordering::Acquire) {
            self.delete();
        }
    }

    /// Queue the socket for deferred release. Exactly-once; makes sure
    /// the connection is disconnected first.
    pub fn delete(&self) {
        if self.deleted.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.is_connected() {
            self.disconnect();
        }
        if let Some(me) = self.weak_self.upgrade() {
            self.manager.reaper().queue(me);
        }
    }

    #[cfg(windows)]
    fn post_recv(&self) {
        use windows_sys::Win32::Networking::WinSock::{
            WSAGetLastError, WSARecv, SOCKET_ERROR, WSABUF, WSA_IO_PENDING,
        };

        let mut ring = self.read_ring.lock().unwrap();
        let space = ring.writable();
        if space.is_empty() {
            drop(ring);
            warn!("read ring full for {}, disconnecting", self.peer);
            self.disconnect();
            return;
        }
        let mut buf = WSABUF {
            len: space.len() as u32,
            buf: space.as_mut_ptr(),
        };
        let op = self.read_op.get();
        let mut flags: u32 = 0;
        let rc = unsafe {
            (*op).overlapped = std::mem::zeroed();
            WSARecv(
                self.handle as usize,
                &mut buf,
                1,
                std::ptr::null_mut(),
                &mut flags,
                op as *mut _,
                None,
            )
        };
        if rc == SOCKET_ERROR {
            let err = unsafe { WSAGetLastError() };
            if err != WSA_IO_PENDING {
                drop(ring);
                self.handler.on_error(self, err);
                self.disconnect();
            }
        }
    }

    #[cfg(windows)]
    fn post_send(&self) {
        use windows_sys::Win32::Networking::WinSock::{
            WSAGetLastError, WSASend, SOCKET_ERROR, WSABUF, WSA_IO_PENDING,
        };

        let ring = self.write_ring.lock().unwrap();
        let chunk = ring.readable();
        if chunk.is_empty() {
            drop(ring);
            self.release_send_token();
            return;
        }
        self.posted_send.store(chunk.len() as u32, Ordering::Release);
        let mut buf = WSABUF {
            len: chunk.len() as u32,
            buf: chunk.as_ptr() as *mut u8,
        };
        let op = self.write_op.get();
        let rc = unsafe {
            (*op).overlapped = std::mem::zeroed();
            WSASend(
                self.handle as usize,
                &mut buf,
                1,
                std::ptr::null_mut(),
                0,
                op as *mut _,
                None,
            )
        };
        if rc == SOCKET_ERROR {
            let err = unsafe { WSAGetLastError() };
            if err != WSA_IO_PENDING {
                drop(ring);
                self.handler.on_error(self, err);
                self.disconnect();
            }
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        ops::close_handle(self.handle);
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}
