//! Linux epoll backend
//!
//! One-shot via `EPOLLONESHOT`; `rearm` is an `EPOLL_CTL_MOD` that
//! replaces the whole mask, which is what implements the read/write
//! interest swap. Blocked waits are interrupted through an `eventfd`
//! registered level-triggered under [`WAKE_TOKEN`].

use super::{Demultiplexer, Event, Handle, Interest, MAX_EVENTS, WAKE_TOKEN};
use std::io;
use std::time::Duration;

pub struct Epoll {
    epfd: libc::c_int,
    wake_fd: libc::c_int,
}

fn interest_bits(interest: Interest) -> u32 {
    match interest {
        Interest::Read => libc::EPOLLIN as u32,
        Interest::Write => libc::EPOLLOUT as u32,
    }
}

fn timeout_ms(timeout: Duration) -> libc::c_int {
    timeout.as_millis().min(i32::MAX as u128) as libc::c_int
}

impl Epoll {
    pub fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }

        let wake_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wake_fd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epfd) };
            return Err(err);
        }

        // level-triggered on purpose: the waiter that picks it up
        // drains the counter
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        let rc = unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_ADD, wake_fd, &mut ev) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(wake_fd);
                libc::close(epfd);
            }
            return Err(err);
        }

        Ok(Self { epfd, wake_fd })
    }

    fn ctl(&self, op: libc::c_int, fd: Handle, token: u64, interest: Interest) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: interest_bits(interest) | libc::EPOLLONESHOT as u32,
            u64: token,
        };
        let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn drain_wake(&self) {
        let mut buf = [0u8; 8];
        unsafe {
            libc::read(self.wake_fd, buf.as_mut_ptr() as *mut libc::c_void, 8);
        }
    }
}

impl Demultiplexer for Epoll {
    fn register(&self, handle: Handle, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, handle, token, interest)
    }

    fn rearm(&self, handle: Handle, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, handle, token, interest)
    }

    fn unregister(&self, handle: Handle) -> io::Result<()> {
        let rc = unsafe {
            libc::epoll_ctl(
                self.epfd,
                libc::EPOLL_CTL_DEL,
                handle,
                std::ptr::null_mut(),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            // already gone is fine
            if !matches!(err.raw_os_error(), Some(libc::ENOENT) | Some(libc::EBADF)) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn wait(&self, events: &mut Vec<Event>, timeout: Duration) -> io::Result<usize> {
        events.clear();
        let mut buf: [libc::epoll_event; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                buf.as_mut_ptr(),
                MAX_EVENTS as libc::c_int,
                timeout_ms(timeout),
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
            if ev.u64 == WAKE_TOKEN {
                self.drain_wake();
                continue;
            }
            let flags = ev.events;
            let error = flags & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0;
            events.push(Event {
                token: ev.u64,
                // surface error/hangup through the read path so the
                // recv result decides the disconnect
                readable: flags & libc::EPOLLIN as u32 != 0 || error,
                writable: flags & libc::EPOLLOUT as u32 != 0,
                error,
                len: 0,
            });
        }
        Ok(events.len())
    }

    fn wake(&self) {
        let one: u64 = 1;
        unsafe {
            libc::write(self.wake_fd, &one as *const u64 as *const libc::c_void, 8);
        }
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_fd);
            libc::close(self.epfd);
        }
    }
}
