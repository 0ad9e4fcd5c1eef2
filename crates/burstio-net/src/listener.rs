//! Accepting socket
//!
//! Bound non-blocking listener registered for one-shot read events.
//! An event means the accept queue is non-empty; the dispatcher drains
//! it completely before re-arming, so no pending connection is left
//! behind by the one-shot discipline.

use crate::demux::{Demultiplexer, Handle, Interest};
use crate::handler::HandlerFactory;
use crate::manager::SocketManager;
use crate::ops;
use crate::socket::{Socket, SocketState};
use burstio_core::{NetError, NetResult};
use log::{debug, info, warn};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct ListenSocket {
    handle: Handle,
    local: SocketAddr,
    manager: Arc<SocketManager>,
    factory: HandlerFactory,
    open: AtomicBool,
}

impl ListenSocket {
    /// Bind `host:port` and start accepting. `"0.0.0.0"` binds the
    /// wildcard address; anything else is resolved first.
    pub fn bind(
        manager: &Arc<SocketManager>,
        host: &str,
        port: u16,
        factory: HandlerFactory,
    ) -> NetResult<Arc<Self>> {
        let addr = if host == "0.0.0.0" {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
        } else {
            (host, port)
                .to_socket_addrs()
                .map_err(|_| NetError::Resolve(host.to_string()))?
                .next()
                .ok_or_else(|| NetError::Resolve(host.to_string()))?
        };

        let sock = socket2::Socket::new(
            socket2::Domain::for_address(addr),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        #[cfg(unix)]
        let backlog = libc::SOMAXCONN;
        #[cfg(windows)]
        let backlog = windows_sys::Win32::Networking::WinSock::SOMAXCONN as i32;

        sock.set_reuse_address(true)?;
        sock.bind(&addr.into())?;
        sock.listen(backlog)?;
        sock.set_nonblocking(true)?;

        let local = sock
            .local_addr()?
            .as_socket()
            .ok_or_else(|| NetError::Resolve(host.to_string()))?;
        let handle = ops::into_handle(sock);

        let listener = Arc::new(Self {
            handle,
            local,
            manager: Arc::clone(manager),
            factory,
            open: AtomicBool::new(true),
        });
        manager.add_listener(Arc::clone(&listener))?;
        info!("listening on {}", local);
        Ok(listener)
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    pub(crate) fn token(&self) -> u64 {
        self.handle as u64
    }

    /// Actual bound address; useful after binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Drain the accept queue, then re-arm. Called by the dispatcher
    /// on a read event for the listening handle.
    pub(crate) fn accept_ready(&self) {
        if !self.is_open() {
            return;
        }
        loop {
            match self.accept_one() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    warn!("accept on {} failed: {}", self.local, e);
                    break;
                }
            }
        }
        if self.is_open() {
            if let Err(e) =
                self.manager
                    .demux()
                    .rearm(self.handle, self.token(), Interest::Read)
            {
                warn!("re-arm listener {} failed: {}", self.local, e);
            }
        }
    }

    /// Accept one connection. Ok(false) means the queue is empty.
    fn accept_one(&self) -> io::Result<bool> {
        // borrow the raw handle as a socket2 socket for the accept call
        let sock = unsafe { self.borrowed() };
        let (peer_sock, peer_addr) = match sock.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(true),
            Err(e) => return Err(e),
        };

        let peer = match peer_addr.as_socket() {
            Some(p) => p,
            None => return Ok(true),
        };
        ops::configure_stream(&peer_sock)?;
        let handle = ops::into_handle(peer_sock);

        debug!("accepted {} on {}", peer, self.local);
        let socket = Socket::new(
            handle,
            peer,
            (self.factory)(),
            &self.manager,
            SocketState::Connecting,
        );
        if let Err(e) = socket.establish() {
            warn!("register accepted {} failed: {}", peer, e);
            socket.disconnect();
        }
        Ok(true)
    }

    /// Wrap the raw listening handle without taking ownership.
    unsafe fn borrowed(&self) -> std::mem::ManuallyDrop<socket2::Socket> {
        cfg_if::cfg_if! {
            if #[cfg(windows)] {
                use std::os::windows::io::FromRawSocket;
                std::mem::ManuallyDrop::new(socket2::Socket::from_raw_socket(self.handle))
            } else {
                use std::os::unix::io::FromRawFd;
                std::mem::ManuallyDrop::new(socket2::Socket::from_raw_fd(self.handle))
            }
        }
    }

    /// Stop accepting. Idempotent. Established connections are not
    /// affected; the handle itself closes when the last owner drops.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("closing listener {}", self.local);
        self.manager.remove_socket(self.token());
        ops::shutdown_both(self.handle);
    }
}

impl Drop for ListenSocket {
    fn drop(&mut self) {
        ops::close_handle(self.handle);
    }
}
