//! Deferred socket release
//!
//! Deleting a socket from inside its own callback would drop it (and
//! close the handle) while a dispatch still holds it. Instead `delete`
//! hands the final reference to this queue and a dedicated thread
//! drops it later, after the dispatch that triggered the teardown has
//! long since let go.

use crate::socket::Socket;
use burstio_core::{ConcurrentQueue, ThreadContext};
use log::{debug, trace};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

pub struct SocketReaper {
    queue: Arc<ConcurrentQueue<Arc<Socket>>>,
    ctx: Mutex<Option<(Arc<ThreadContext>, JoinHandle<()>)>>,
}

impl SocketReaper {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ConcurrentQueue::new(capacity)),
            ctx: Mutex::new(None),
        }
    }

    pub(crate) fn start(&self) {
        let queue = Arc::clone(&self.queue);
        let pair = burstio_core::thread::spawn_worker("burstio-reaper", move |ctx| {
            while ctx.is_running() {
                if let Some(sock) = queue.get(true, Some(Duration::from_millis(250))) {
                    trace!("reaping {:?}", sock);
                    drop(sock);
                }
            }
            // drain whatever was queued between close_all and terminate
            while let Some(sock) = queue.get(false, None) {
                drop(sock);
            }
        });
        *self.ctx.lock().unwrap() = Some(pair);
    }

    /// Hand a socket over for deferred release. If the queue is
    /// bounded and full, or the reaper is stopping, the reference is
    /// dropped inline instead; the socket is already out of the
    /// reactor at this point, so the only cost is closing the handle
    /// on the caller's thread.
    pub(crate) fn queue(&self, sock: Arc<Socket>) {
        if let Err(sock) = self.queue.put(sock, false, None) {
            debug!("reaper queue unavailable, dropping {:?} inline", sock);
            drop(sock);
        }
    }

    /// Stop the reaper thread after draining the queue. Idempotent.
    pub(crate) fn stop(&self) {
        let pair = self.ctx.lock().unwrap().take();
        if let Some((ctx, handle)) = pair {
            self.queue.abort();
            ctx.terminate();
            let _ = handle.join();
        }
    }
}
