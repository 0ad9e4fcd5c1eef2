//! Windows I/O completion port backend
//!
//! Unlike the readiness backends, completions are driven by pre-posted
//! overlapped operations: the socket layer posts a `WSARecv`/`WSASend`
//! with an [`OverlappedOp`] and a completion dequeued here names the
//! finished operation and its byte count. `register` associates the
//! handle with the port once; re-posting the next operation plays the
//! role of `rearm`, so `rearm` and `unregister` are no-ops here.

use super::{Demultiplexer, Event, Handle, Interest, WAKE_TOKEN};
use std::io;
use std::time::Duration;
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ABANDONED_WAIT_0, HANDLE, INVALID_HANDLE_VALUE, WAIT_TIMEOUT,
};
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatus, PostQueuedCompletionStatus, OVERLAPPED,
};

/// Which direction an overlapped operation was posted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
}

/// Overlapped block the socket layer embeds in each posted operation.
/// The `OVERLAPPED` must stay first so the pointer handed back by the
/// completion port casts straight back to the containing struct.
#[repr(C)]
pub struct OverlappedOp {
    pub overlapped: OVERLAPPED,
    pub kind: OpKind,
}

impl OverlappedOp {
    pub fn new(kind: OpKind) -> Self {
        Self {
            overlapped: unsafe { std::mem::zeroed() },
            kind,
        }
    }
}

pub struct Iocp {
    port: HANDLE,
}

unsafe impl Send for Iocp {}
unsafe impl Sync for Iocp {}

impl Iocp {
    pub fn new() -> io::Result<Self> {
        let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, 0, 0, 0) };
        if port == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { port })
    }
}

impl Demultiplexer for Iocp {
    fn register(&self, handle: Handle, token: u64, _interest: Interest) -> io::Result<()> {
        let ret = unsafe {
            CreateIoCompletionPort(handle as HANDLE, self.port, token as usize, 0)
        };
        if ret == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn rearm(&self, _handle: Handle, _token: u64, _interest: Interest) -> io::Result<()> {
        // posting the next overlapped operation is the re-arm
        Ok(())
    }

    fn unregister(&self, _handle: Handle) -> io::Result<()> {
        // association ends when the socket handle closes
        Ok(())
    }

    fn wait(&self, events: &mut Vec<Event>, timeout: Duration) -> io::Result<usize> {
        events.clear();

        let mut bytes: u32 = 0;
        let mut key: usize = 0;
        let mut overlapped: *mut OVERLAPPED = std::ptr::null_mut();
        let ok = unsafe {
            GetQueuedCompletionStatus(
                self.port,
                &mut bytes,
                &mut key,
                &mut overlapped,
                timeout.as_millis() as u32,
            )
        };

        if ok == 0 && overlapped.is_null() {
            let err = unsafe { GetLastError() };
            if err == WAIT_TIMEOUT {
                return Ok(0);
            }
            if err == ERROR_ABANDONED_WAIT_0 {
                return Ok(0);
            }
            return Err(io::Error::from_raw_os_error(err as i32));
        }

        let token = key as u64;
        if token == WAKE_TOKEN {
            return Ok(0);
        }
        if overlapped.is_null() {
            return Ok(0);
        }

        let op = unsafe { &*(overlapped as *const OverlappedOp) };
        // failed completion, or a zero-byte read meaning EOF
        let failed = ok == 0 || (op.kind == OpKind::Read && bytes == 0);
        events.push(Event {
            token,
            readable: !failed && op.kind == OpKind::Read,
            writable: !failed && op.kind == OpKind::Write,
            error: failed,
            len: bytes as usize,
        });
        Ok(1)
    }

    fn wake(&self) {
        unsafe {
            PostQueuedCompletionStatus(self.port, 0, WAKE_TOKEN as usize, std::ptr::null_mut());
        }
    }
}

impl Drop for Iocp {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.port);
        }
    }
}
