//! Blocking MPMC queue with bounded and unbounded modes
//!
//! Mutex plus two condition variables, one for each direction. Serves
//! as the reaper's input queue and as a generic work queue feeding
//! worker threads.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct Inner<T> {
    queue: VecDeque<T>,
    aborted: bool,
}

/// Bounded or unbounded blocking multi-producer/multi-consumer queue.
///
/// An item accepted by `put` (an `Ok` return) is never lost: it stays
/// in the queue until a `get` delivers it.
pub struct ConcurrentQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    /// 0 = unbounded
    maxsize: usize,
}

impl<T> ConcurrentQueue<T> {
    /// Create a queue. `maxsize` of 0 means unbounded.
    pub fn new(maxsize: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                aborted: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            maxsize,
        }
    }

    /// Approximate number of queued items (not reliable under
    /// concurrent mutation).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Put an item into the queue.
    ///
    /// With `block` false the call fails fast when the queue is full
    /// (`timeout` is ignored). With `block` true and no timeout it
    /// waits until a slot frees up; with a timeout it waits at most
    /// that long. On failure the item is handed back in `Err` so the
    /// caller never loses it. Fails after `abort()`.
    pub fn put(&self, item: T, block: bool, timeout: Option<Duration>) -> Result<(), T> {
        let mut inner = self.inner.lock().unwrap();
        if inner.aborted {
            return Err(item);
        }

        if self.maxsize > 0 {
            if !block {
                if inner.queue.len() >= self.maxsize {
                    return Err(item);
                }
            } else if let Some(t) = timeout {
                let (guard, result) = self
                    .not_full
                    .wait_timeout_while(inner, t, |s| {
                        !s.aborted && s.queue.len() >= self.maxsize
                    })
                    .unwrap();
                inner = guard;
                if result.timed_out() && inner.queue.len() >= self.maxsize {
                    return Err(item);
                }
                if inner.aborted {
                    return Err(item);
                }
            } else {
                while !inner.aborted && inner.queue.len() >= self.maxsize {
                    inner = self.not_full.wait(inner).unwrap();
                }
                if inner.aborted {
                    return Err(item);
                }
            }
        }

        inner.queue.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove and return an item from the queue.
    ///
    /// With `block` false, returns immediately (`timeout` ignored).
    /// With `block` true and no timeout, waits until an item arrives
    /// or `abort()` wakes the waiter; with a timeout, waits at most
    /// that long and returns `None` on expiry.
    ///
    /// Items still queued at abort time are delivered; only an empty,
    /// aborted queue returns `None` without waiting.
    pub fn get(&self, block: bool, timeout: Option<Duration>) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();

        if block && inner.queue.is_empty() && !inner.aborted {
            if let Some(t) = timeout {
                let (guard, _result) = self
                    .not_empty
                    .wait_timeout_while(inner, t, |s| !s.aborted && s.queue.is_empty())
                    .unwrap();
                inner = guard;
            } else {
                while !inner.aborted && inner.queue.is_empty() {
                    inner = self.not_empty.wait(inner).unwrap();
                }
            }
        }

        let item = inner.queue.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Unblock every waiting thread without delivering an item and
    /// fail all further blocking calls. Used at shutdown.
    pub fn abort(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.aborted = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Whether `abort()` has been called.
    pub fn is_aborted(&self) -> bool {
        self.inner.lock().unwrap().aborted
    }
}
