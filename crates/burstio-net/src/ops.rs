//! Raw socket plumbing shared by the stream, listen and connect paths.

use crate::config::SOCKET_SEND_RECV_TIMEOUT;
use crate::demux::Handle;
use std::io;
use std::time::Duration;

/// Options applied to every stream socket before it enters the
/// reactor: non-blocking, Nagle off, keepalive on, and bounded
/// send/recv timeouts so a blocking fallback path cannot hang.
pub fn configure_stream(sock: &socket2::Socket) -> io::Result<()> {
    sock.set_nonblocking(true)?;
    sock.set_tcp_nodelay(true)?;
    sock.set_keepalive(true)?;
    let timeout = Some(Duration::from_secs(SOCKET_SEND_RECV_TIMEOUT));
    sock.set_read_timeout(timeout)?;
    sock.set_write_timeout(timeout)?;
    Ok(())
}

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        use std::os::windows::io::IntoRawSocket;
        use windows_sys::Win32::Networking::WinSock::{closesocket, shutdown, SD_BOTH};

        pub fn into_handle(sock: socket2::Socket) -> Handle {
            sock.into_raw_socket()
        }

        /// Cut both directions without releasing the handle. The last
        /// owner closes it.
        pub fn shutdown_both(handle: Handle) {
            unsafe {
                shutdown(handle as usize, SD_BOTH);
            }
        }

        pub fn close_handle(handle: Handle) {
            unsafe {
                closesocket(handle as usize);
            }
        }
    } else {
        use std::os::unix::io::IntoRawFd;

        // macOS has no MSG_NOSIGNAL; SIGPIPE suppression there relies
        // on the process-wide handler.
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        const SEND_FLAGS: libc::c_int = 0;
        #[cfg(not(any(target_os = "macos", target_os = "ios")))]
        const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;

        pub fn into_handle(sock: socket2::Socket) -> Handle {
            sock.into_raw_fd()
        }

        /// Cut both directions without releasing the fd. The fd number
        /// stays reserved until the last owner closes it, so the OS
        /// cannot hand it to a new connection while callbacks may
        /// still run.
        pub fn shutdown_both(handle: Handle) {
            unsafe {
                libc::shutdown(handle, libc::SHUT_RDWR);
            }
        }

        pub fn close_handle(handle: Handle) {
            unsafe {
                libc::close(handle);
            }
        }

        /// Single non-blocking recv into `buf`.
        pub fn recv(handle: Handle, buf: &mut [u8]) -> io::Result<usize> {
            let n = unsafe {
                libc::recv(handle, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
            };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(n as usize)
        }

        /// Single non-blocking send of `buf`. Partial sends are
        /// expected and reported via the returned count.
        pub fn send(handle: Handle, buf: &[u8]) -> io::Result<usize> {
            let n = unsafe {
                libc::send(
                    handle,
                    buf.as_ptr() as *const libc::c_void,
                    buf.len(),
                    SEND_FLAGS,
                )
            };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(n as usize)
        }
    }
}
