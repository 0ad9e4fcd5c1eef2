//! I/O demultiplexer: one contract, four OS backends
//!
//! The backend is selected at build time: epoll on Linux, kqueue on
//! the BSDs and macOS, completion ports on Windows, and `select` as a
//! portable fallback (or anywhere via the `force-select` feature).
//!
//! The contract is uniformly one-shot: delivering an event disarms the
//! handle until [`Demultiplexer::rearm`] re-enables it. Exactly one
//! interest (read or write) is armed per handle at any moment; the
//! completion backend realizes the same discipline through pre-posted
//! operations, where a completion implicitly means the next operation
//! must be re-posted.

use std::io;
use std::time::Duration;

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        /// OS socket handle
        pub type Handle = std::os::windows::io::RawSocket;
    } else {
        /// OS socket handle
        pub type Handle = std::os::unix::io::RawFd;
    }
}

/// Upper bound on events returned by one `wait` call.
pub const MAX_EVENTS: usize = 32;

/// Token reserved for the internal wake mechanism.
pub const WAKE_TOKEN: u64 = u64::MAX;

/// Which readiness to arm. One-shot: consumed by delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

/// One readiness or completion notification.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub token: u64,
    pub readable: bool,
    pub writable: bool,
    /// Error or hangup reported by the OS alongside (or instead of)
    /// readiness; the read path turns it into a disconnect.
    pub error: bool,
    /// Bytes moved - completion backends only, 0 for readiness ones.
    pub len: usize,
}

/// The reactor contract shared by all four backends.
pub trait Demultiplexer: Send + Sync {
    /// Start watching `handle` with the given one-shot interest.
    fn register(&self, handle: Handle, token: u64, interest: Interest) -> io::Result<()>;

    /// Re-arm a handle after its event was delivered, possibly
    /// swapping the armed interest.
    fn rearm(&self, handle: Handle, token: u64, interest: Interest) -> io::Result<()>;

    /// Stop watching `handle`. No events for it are delivered after
    /// this returns (events already pulled by a waiter may still be
    /// in flight; the registry lookup drops them).
    fn unregister(&self, handle: Handle) -> io::Result<()>;

    /// Block up to `timeout` for events. Clears and refills `events`,
    /// returning the count. May return 0 early (wake or signal).
    fn wait(&self, events: &mut Vec<Event>, timeout: Duration) -> io::Result<usize>;

    /// Interrupt one blocked `wait`, if any.
    fn wake(&self);
}

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        pub mod iocp;
        pub use iocp::Iocp as PlatformDemux;
    } else if #[cfg(feature = "force-select")] {
        pub mod select;
        pub use select::SelectDemux as PlatformDemux;
        #[cfg(any(target_os = "linux", target_os = "android"))]
        pub mod epoll;
    } else if #[cfg(any(target_os = "linux", target_os = "android"))] {
        pub mod epoll;
        pub use epoll::Epoll as PlatformDemux;
        pub mod select;
    } else if #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))] {
        pub mod kqueue;
        pub use kqueue::Kqueue as PlatformDemux;
        pub mod select;
    } else {
        pub mod select;
        pub use select::SelectDemux as PlatformDemux;
    }
}
