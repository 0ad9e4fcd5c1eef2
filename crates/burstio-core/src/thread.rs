//! Cooperative-cancel worker thread context
//!
//! A `ThreadContext` is shared between a worker thread and whoever
//! controls it. The worker loops on `is_running()` and sleeps in
//! `wait()`; the controller flips flags and signals the condvar.
//! Workers must re-check the running flag after every wake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Shared lifecycle state for one worker thread.
pub struct ThreadContext {
    running: AtomicBool,
    suspended: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl ThreadContext {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            suspended: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Whether the worker should keep running.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Request termination and wake the worker if it sleeps in `wait`.
    pub fn terminate(&self) {
        let _guard = self.lock.lock().unwrap();
        self.running.store(false, Ordering::Release);
        self.cond.notify_all();
    }

    /// Ask the worker to park indefinitely at its next `wait`.
    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
    }

    /// Resume a suspended worker.
    pub fn resume(&self) {
        let _guard = self.lock.lock().unwrap();
        self.suspended.store(false, Ordering::Release);
        self.cond.notify_all();
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Condvar sleep for idle or periodic workers. Sleeps up to
    /// `timeout`, or indefinitely while suspended. Returns early on
    /// `terminate`/`resume`.
    pub fn wait(&self, timeout: Duration) {
        let mut guard = self.lock.lock().unwrap();
        if !self.is_running() {
            return;
        }
        if self.is_suspended() {
            while self.is_suspended() && self.is_running() {
                guard = self.cond.wait(guard).unwrap();
            }
        } else {
            let _unused = self.cond.wait_timeout(guard, timeout).unwrap();
        }
    }
}

impl Default for ThreadContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a named worker thread running `f` with a fresh context.
///
/// The returned context is the controller's handle; `f` receives its
/// own clone and is expected to loop on `ctx.is_running()`.
pub fn spawn_worker<F>(name: &str, f: F) -> (Arc<ThreadContext>, JoinHandle<()>)
where
    F: FnOnce(Arc<ThreadContext>) + Send + 'static,
{
    let ctx = Arc::new(ThreadContext::new());
    let worker_ctx = Arc::clone(&ctx);
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || f(worker_ctx))
        .expect("failed to spawn worker thread");
    (ctx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn test_wait_times_out() {
        let ctx = ThreadContext::new();
        let start = Instant::now();
        ctx.wait(Duration::from_millis(50));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_terminate_wakes_waiter() {
        let (ctx, handle) = spawn_worker("test-worker", |ctx| {
            while ctx.is_running() {
                ctx.wait(Duration::from_secs(10));
            }
        });

        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        ctx.terminate();
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_suspend_resume() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks2 = Arc::clone(&ticks);
        let (ctx, handle) = spawn_worker("test-periodic", move |ctx| {
            while ctx.is_running() {
                ticks2.fetch_add(1, Ordering::Relaxed);
                ctx.wait(Duration::from_millis(5));
            }
        });

        thread::sleep(Duration::from_millis(50));
        ctx.suspend();
        thread::sleep(Duration::from_millis(20));
        let at_suspend = ticks.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(50));
        // at most one in-flight tick after suspend took effect
        assert!(ticks.load(Ordering::Relaxed) <= at_suspend + 1);

        ctx.resume();
        thread::sleep(Duration::from_millis(50));
        assert!(ticks.load(Ordering::Relaxed) > at_suspend);

        ctx.terminate();
        handle.join().unwrap();
    }
}
