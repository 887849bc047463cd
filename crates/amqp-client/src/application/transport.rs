//! The byte-sink seam between the protocol core and the network.
//!
//! The connection never touches a socket.  Outbound frames go through a
//! [`Transport`]; inbound bytes arrive through
//! [`crate::Connection::handle_data`].  Infrastructure implementations
//! forward to a TCP or WebSocket writer task; tests record the writes.

use crate::application::error::ClientError;

/// Something that can carry outbound bytes to the broker.
///
/// `send` is called while the connection's state lock is held, so it must
/// not block and must not call back into the connection.  Implementations
/// typically push onto an unbounded queue drained by a writer task.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Queues `bytes` for transmission, in order.
    fn send(&self, bytes: &[u8]) -> Result<(), ClientError>;

    /// Releases the underlying stream.  Further sends may fail.
    fn close(&self);
}
