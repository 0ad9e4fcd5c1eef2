//! Engine configuration
//!
//! Compile-time defaults with runtime environment overrides, builder
//! style. Parsing of configuration files is the embedder's concern.

use burstio_core::env::env_get;
use std::time::Duration;

/// Default send/recv timeout applied to every stream socket, seconds.
pub const SOCKET_SEND_RECV_TIMEOUT: u64 = 15;

/// Configuration for a [`crate::SocketManager`].
///
/// Environment variables (all optional):
/// - `BURST_NUM_WORKERS` - worker threads (default: CPU count)
/// - `BURST_READ_BUFFER` - per-socket read ring bytes
/// - `BURST_WRITE_BUFFER` - per-socket write ring bytes
/// - `BURST_WAIT_TIMEOUT_MS` - demultiplexer wait timeout
/// - `BURST_CONNECT_TIMEOUT_S` - default outbound connect timeout
/// - `BURST_REAPER_CAPACITY` - reaper queue bound (0 = unbounded)
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Number of worker threads blocking in the demultiplexer wait
    pub num_workers: usize,
    /// Per-socket inbound ring buffer capacity
    pub read_buffer_size: usize,
    /// Per-socket outbound ring buffer capacity; sized for the
    /// worst-case burst, there is no growth
    pub write_buffer_size: usize,
    /// Timeout for one demultiplexer wait call
    pub wait_timeout: Duration,
    /// Default timeout for `connect_tcp`
    pub connect_timeout: Duration,
    /// Reaper queue bound, 0 for unbounded
    pub reaper_capacity: usize,
}

impl NetConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let num_cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);

        Self {
            num_workers: env_get("BURST_NUM_WORKERS", num_cpus),
            read_buffer_size: env_get("BURST_READ_BUFFER", 64 * 1024),
            write_buffer_size: env_get("BURST_WRITE_BUFFER", 256 * 1024),
            wait_timeout: Duration::from_millis(env_get("BURST_WAIT_TIMEOUT_MS", 50)),
            connect_timeout: Duration::from_secs(env_get("BURST_CONNECT_TIMEOUT_S", 3)),
            reaper_capacity: env_get("BURST_REAPER_CAPACITY", 0),
        }
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n.max(1);
        self
    }

    pub fn read_buffer_size(mut self, bytes: usize) -> Self {
        self.read_buffer_size = bytes;
        self
    }

    pub fn write_buffer_size(mut self, bytes: usize) -> Self {
        self.write_buffer_size = bytes;
        self
    }

    pub fn wait_timeout(mut self, d: Duration) -> Self {
        self.wait_timeout = d;
        self
    }

    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    pub fn reaper_capacity(mut self, n: usize) -> Self {
        self.reaper_capacity = n;
        self
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
