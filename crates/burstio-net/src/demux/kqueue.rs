//! BSD/macOS kqueue backend
//!
//! Read and write are separate filters, each armed `EV_ADD|EV_ONESHOT`.
//! Because a one-shot delivery only consumes its own filter, arming an
//! interest deletes the opposite filter first - that keeps the
//! at-most-one-armed-interest discipline the dispatch layer relies on.
//! Blocked waits are interrupted through an `EVFILT_USER` event.

use super::{Demultiplexer, Event, Handle, Interest, MAX_EVENTS, WAKE_TOKEN};
use std::io;
use std::ptr;
use std::time::Duration;

const WAKE_IDENT: usize = 0;

pub struct Kqueue {
    kq: libc::c_int,
}

fn zeroed_kevent() -> libc::kevent {
    unsafe { std::mem::zeroed() }
}

impl Kqueue {
    pub fn new() -> io::Result<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut ev = zeroed_kevent();
        ev.ident = WAKE_IDENT;
        ev.filter = libc::EVFILT_USER as _;
        ev.flags = (libc::EV_ADD | libc::EV_ENABLE | libc::EV_CLEAR) as _;
        ev.udata = WAKE_TOKEN as usize as *mut _;
        let rc = unsafe { libc::kevent(kq, &ev, 1, ptr::null_mut(), 0, ptr::null()) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(kq) };
            return Err(err);
        }

        Ok(Self { kq })
    }

    fn submit(&self, ev: &libc::kevent) -> io::Result<()> {
        let rc = unsafe { libc::kevent(self.kq, ev, 1, ptr::null_mut(), 0, ptr::null()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn delete_filter(&self, handle: Handle, filter: i16) {
        let mut ev = zeroed_kevent();
        ev.ident = handle as usize;
        ev.filter = filter as _;
        ev.flags = libc::EV_DELETE as _;
        // ENOENT when the filter was never armed, or was consumed
        let _ = self.submit(&ev);
    }

    fn arm(&self, handle: Handle, token: u64, interest: Interest) -> io::Result<()> {
        let (armed, other) = match interest {
            Interest::Read => (libc::EVFILT_READ, libc::EVFILT_WRITE),
            Interest::Write => (libc::EVFILT_WRITE, libc::EVFILT_READ),
        };
        self.delete_filter(handle, other);

        let mut ev = zeroed_kevent();
        ev.ident = handle as usize;
        ev.filter = armed as _;
        ev.flags = (libc::EV_ADD | libc::EV_ONESHOT) as _;
        ev.udata = token as usize as *mut _;
        self.submit(&ev)
    }
}

impl Demultiplexer for Kqueue {
    fn register(&self, handle: Handle, token: u64, interest: Interest) -> io::Result<()> {
        self.arm(handle, token, interest)
    }

    fn rearm(&self, handle: Handle, token: u64, interest: Interest) -> io::Result<()> {
        self.arm(handle, token, interest)
    }

    fn unregister(&self, handle: Handle) -> io::Result<()> {
        self.delete_filter(handle, libc::EVFILT_READ);
        self.delete_filter(handle, libc::EVFILT_WRITE);
        Ok(())
    }

    fn wait(&self, events: &mut Vec<Event>, timeout: Duration) -> io::Result<usize> {
        events.clear();
        let ts = libc::timespec {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as libc::c_long,
        };
        let mut buf: [libc::kevent; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let n = unsafe {
            libc::kevent(
                self.kq,
                ptr::null(),
                0,
                buf.as_mut_ptr(),
                MAX_EVENTS as libc::c_int,
                &ts,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        for ev in buf.iter().take(n as usize) {
            if ev.filter == libc::EVFILT_USER {
                continue;
            }
            let error = ev.flags & libc::EV_ERROR as u16 != 0;
            events.push(Event {
                token: ev.udata as usize as u64,
                // EV_EOF still carries buffered bytes; recv sees the 0
                readable: ev.filter == libc::EVFILT_READ || error,
                writable: ev.filter == libc::EVFILT_WRITE,
                error,
                len: 0,
            });
        }
        Ok(events.len())
    }

    fn wake(&self) {
        let mut ev = zeroed_kevent();
        ev.ident = WAKE_IDENT;
        ev.filter = libc::EVFILT_USER as _;
        ev.fflags = libc::NOTE_TRIGGER;
        let _ = self.submit(&ev);
    }
}

impl Drop for Kqueue {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_wake_interrupts_wait() {
        let kq = Kqueue::new().unwrap();
        kq.wake();
        let mut events = Vec::new();
        let start = std::time::Instant::now();
        kq.wait(&mut events, Duration::from_secs(5)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(events.is_empty());
    }

    #[test]
    fn test_oneshot_read_event() {
        let kq = Kqueue::new().unwrap();
        let (a, b) = std::os::unix::net::UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();

        kq.register(b.as_raw_fd(), 9, Interest::Read).unwrap();

        use std::io::Write;
        (&a).write_all(b"x").unwrap();

        let mut events = Vec::new();
        kq.wait(&mut events, Duration::from_secs(2)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, 9);
        assert!(events[0].readable);

        kq.wait(&mut events, Duration::from_millis(100)).unwrap();
        assert!(events.is_empty());

        kq.rearm(b.as_raw_fd(), 9, Interest::Read).unwrap();
        kq.wait(&mut events, Duration::from_secs(2)).unwrap();
        assert_eq!(events.len(), 1);

        kq.unregister(b.as_raw_fd()).unwrap();
    }
}
