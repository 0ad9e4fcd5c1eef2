//! Portable select() backend
//!
//! O(n) scan over an interest map rebuilt for every wait. `select`
//! has no native cancellation, so a connected socketpair is part of
//! the read set purely to interrupt a blocked wait on membership
//! change or shutdown - a byte on the signal side wakes the scanner.
//!
//! One-shot is implemented at the map level: a delivered fd is removed
//! from the interest map before the event is returned. Only one thread
//! scans at a time (scan lock); the others queue behind it, so a
//! worker pool still dispatches previous results in parallel with the
//! next scan.

use super::{Demultiplexer, Event, Handle, Interest, MAX_EVENTS};
use log::warn;
use std::collections::HashMap;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

pub struct SelectDemux {
    interests: Mutex<HashMap<Handle, (u64, Interest)>>,
    scan: Mutex<()>,
    /// [0] = wait side, [1] = signal side
    pair: [Handle; 2],
}

fn set_nonblocking(fd: Handle) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl SelectDemux {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0 as Handle; 2];
        let rc = unsafe {
            libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr())
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        for fd in fds {
            if let Err(e) = set_nonblocking(fd) {
                unsafe {
                    libc::close(fds[0]);
                    libc::close(fds[1]);
                }
                return Err(e);
            }
        }

        Ok(Self {
            interests: Mutex::new(HashMap::new()),
            scan: Mutex::new(()),
            pair: fds,
        })
    }

    fn signal(&self) {
        let flag: u8 = 0;
        unsafe {
            libc::send(
                self.pair[1],
                &flag as *const u8 as *const libc::c_void,
                1,
                0,
            );
        }
    }

    fn drain_signal(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::recv(
                    self.pair[0],
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                )
            };
            if n <= 0 {
                break;
            }
        }
    }
}

impl Demultiplexer for SelectDemux {
    fn register(&self, handle: Handle, token: u64, interest: Interest) -> io::Result<()> {
        if handle as usize >= libc::FD_SETSIZE as usize {
            warn!("select backend: fd {} exceeds FD_SETSIZE", handle);
            return Err(io::Error::from_raw_os_error(libc::EMFILE));
        }
        self.interests.lock().unwrap().insert(handle, (token, interest));
        self.signal();
        Ok(())
    }

    fn rearm(&self, handle: Handle, token: u64, interest: Interest) -> io::Result<()> {
        self.register(handle, token, interest)
    }

    fn unregister(&self, handle: Handle) -> io::Result<()> {
        self.interests.lock().unwrap().remove(&handle);
        self.signal();
        Ok(())
    }

    fn wait(&self, events: &mut Vec<Event>, timeout: Duration) -> io::Result<usize> {
        events.clear();
        let _scan = self.scan.lock().unwrap();

        let mut readable: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut writable: libc::fd_set = unsafe { std::mem::zeroed() };
        unsafe {
            libc::FD_ZERO(&mut readable);
            libc::FD_ZERO(&mut writable);
            libc::FD_SET(self.pair[0], &mut readable);
        }
        let mut maxfd = self.pair[0];

        {
            let interests = self.interests.lock().unwrap();
            for (&fd, &(_token, interest)) in interests.iter() {
                match interest {
                    Interest::Read => unsafe { libc::FD_SET(fd, &mut readable) },
                    Interest::Write => unsafe { libc::FD_SET(fd, &mut writable) },
                }
                maxfd = maxfd.max(fd);
            }
        }

        let mut tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        let n = unsafe {
            libc::select(
                maxfd + 1,
                &mut readable,
                &mut writable,
                std::ptr::null_mut(),
                &mut tv,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        if n == 0 {
            return Ok(0);
        }

        if unsafe { libc::FD_ISSET(self.pair[0], &readable) } {
            self.drain_signal();
        }

        // collect ready fds and disarm them in one pass under the lock
        let mut interests = self.interests.lock().unwrap();
        let ready: Vec<Handle> = interests
            .iter()
            .filter(|(&fd, &(_, interest))| {
                let set = match interest {
                    Interest::Read => &readable,
                    Interest::Write => &writable,
                };
                unsafe { libc::FD_ISSET(fd, set) }
            })
            .map(|(&fd, _)| fd)
            .take(MAX_EVENTS)
            .collect();

        for fd in ready {
            if let Some((token, interest)) = interests.remove(&fd) {
                events.push(Event {
                    token,
                    readable: interest == Interest::Read,
                    writable: interest == Interest::Write,
                    error: false,
                    len: 0,
                });
            }
        }
        Ok(events.len())
    }

    fn wake(&self) {
        self.signal();
    }
}

impl Drop for SelectDemux {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.pair[0]);
            libc::close(self.pair[1]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_wake_interrupts_wait() {
        let sel = SelectDemux::new().unwrap();
        sel.wake();
        let mut events = Vec::new();
        let start = std::time::Instant::now();
        sel.wait(&mut events, Duration::from_secs(5)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(events.is_empty());
    }

    #[test]
    fn test_oneshot_read_event() {
        let sel = SelectDemux::new().unwrap();
        let (a, b) = std::os::unix::net::UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();

        sel.register(b.as_raw_fd(), 3, Interest::Read).unwrap();

        use std::io::Write;
        (&a).write_all(b"x").unwrap();

        let mut events = Vec::new();
        sel.wait(&mut events, Duration::from_secs(2)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, 3);
        assert!(events[0].readable);

        // disarmed until rearm
        sel.wait(&mut events, Duration::from_millis(100)).unwrap();
        assert!(events.is_empty());

        sel.rearm(b.as_raw_fd(), 3, Interest::Read).unwrap();
        sel.wait(&mut events, Duration::from_secs(2)).unwrap();
        assert_eq!(events.len(), 1);

        sel.unregister(b.as_raw_fd()).unwrap();
    }

    #[test]
    fn test_write_interest() {
        let sel = SelectDemux::new().unwrap();
        let (_a, b) = std::os::unix::net::UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();

        sel.register(b.as_raw_fd(), 4, Interest::Write).unwrap();
        let mut events = Vec::new();
        sel.wait(&mut events, Duration::from_secs(2)).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].writable);
    }
}
