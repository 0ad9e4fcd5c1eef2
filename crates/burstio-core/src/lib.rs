//! # burstio-core
//!
//! Core primitives for the burstio socket engine.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! The demultiplexer backends and socket machinery live in `burstio-net`.
//!
//! ## Modules
//!
//! - `ring` - Fixed-capacity ring buffer with independent read/write cursors
//! - `queue` - Blocking MPMC queue with bounded and unbounded modes
//! - `thread` - Cooperative-cancel worker thread context
//! - `error` - Error types
//! - `env` - Environment variable utilities

pub mod env;
pub mod error;
pub mod queue;
pub mod ring;
pub mod thread;

// Re-exports for convenience
pub use error::{NetError, NetResult};
pub use queue::ConcurrentQueue;
pub use ring::RingBuffer;
pub use thread::ThreadContext;
