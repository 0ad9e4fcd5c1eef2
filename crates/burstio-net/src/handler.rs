//! Protocol hooks implemented by the embedding layer
//!
//! All hooks run synchronously on the dispatching worker thread: they
//! must not block unboundedly, and must not call `delete` for the same
//! socket outside the idempotent guard (calling `disconnect`/`delete`
//! is safe, they are exactly-once).

use crate::socket::Socket;

/// Per-connection callbacks.
///
/// `on_read` fires after bytes were appended to the socket's read
/// ring; drain it via [`Socket::recv_buffer`]. Leftover bytes stay in
/// the ring for the next callback, so partial protocol frames can
/// simply be left in place.
pub trait SocketHandler: Send + Sync {
    fn on_connect(&self, _sock: &Socket) {}

    fn on_read(&self, sock: &Socket);

    fn on_disconnect(&self, _sock: &Socket) {}

    /// Transport error on the connection. The engine disconnects the
    /// socket right after this returns.
    fn on_error(&self, _sock: &Socket, _code: i32) {}
}

/// Creates a handler for each accepted connection.
pub type HandlerFactory = Box<dyn Fn() -> Box<dyn SocketHandler> + Send + Sync>;
