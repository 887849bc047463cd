//! Queue-backed [`Transport`] shared by the TCP and WebSocket adapters.
//!
//! The protocol core writes while holding its state lock, so it must never
//! wait on a socket.  [`ChannelTransport`] turns each write into a message
//! on an unbounded `mpsc` queue; a writer task owned by the adapter drains
//! the queue onto the socket in order.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::connection::Connection;
use crate::application::error::ClientError;
use crate::application::transport::Transport;
use crate::domain::config::ConnectionConfig;

/// Work item for a writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterCommand {
    Data(Vec<u8>),
    /// Flush what is queued, then shut the stream down.
    Close,
}

/// A [`Transport`] that forwards to a writer task.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<WriterCommand>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<WriterCommand>) -> Self {
        Self { tx }
    }
}

impl Transport for ChannelTransport {
    fn send(&self, bytes: &[u8]) -> Result<(), ClientError> {
        self.tx
            .send(WriterCommand::Data(bytes.to_vec()))
            .map_err(|_| ClientError::Transport("writer task has stopped".to_string()))
    }

    fn close(&self) {
        // The writer may already be gone; nothing left to release then.
        let _ = self.tx.send(WriterCommand::Close);
    }
}

/// Opens a byte stream to the broker and runs the handshake over it.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects, spawns the reader and writer tasks and resolves once the
    /// connection is open.
    async fn connect(&self, config: &ConnectionConfig) -> Result<Connection, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_queues_a_copy_of_the_bytes() {
        // Arrange
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = ChannelTransport::new(tx);

        // Act
        transport.send(&[1, 2, 3]).unwrap();
        transport.close();

        // Assert
        assert_eq!(rx.try_recv().unwrap(), WriterCommand::Data(vec![1, 2, 3]));
        assert_eq!(rx.try_recv().unwrap(), WriterCommand::Close);
    }

    #[test]
    fn test_send_after_writer_stopped_is_transport_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let transport = ChannelTransport::new(tx);
        assert!(matches!(transport.send(b"x"), Err(ClientError::Transport(_))));
        // close on a stopped writer is a no-op
        transport.close();
    }
}
