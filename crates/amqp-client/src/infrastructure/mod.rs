//! Infrastructure layer: the byte transports the protocol core runs over.
//!
//! # Modules
//!
//! - **`transport`** – [`ChannelTransport`] (a [`crate::Transport`] backed by
//!   a writer task) and the [`Connector`] trait.
//! - **`tcp`** – [`TcpConnector`], plain TCP via `tokio::net`.
//! - **`websocket`** – [`WebSocketConnector`], binary WebSocket messages via
//!   `tokio-tungstenite`.
//! - **`mock`** – [`mock::RecordingTransport`], an in-memory transport for
//!   tests that play the broker side.

pub mod mock;
pub mod tcp;
pub mod transport;
pub mod websocket;

pub use tcp::TcpConnector;
pub use transport::{ChannelTransport, Connector, WriterCommand};
pub use websocket::WebSocketConnector;

use crate::application::connection::Connection;
use crate::application::error::ClientError;
use crate::domain::config::{ConnectionConfig, TransportKind};

/// Opens a connection with the transport named in `config` and completes
/// the handshake.
///
/// # Errors
///
/// [`ClientError::Transport`] if the socket cannot be opened, or whatever
/// error closed the connection during the handshake.
pub async fn connect(config: &ConnectionConfig) -> Result<Connection, ClientError> {
    match config.transport {
        TransportKind::Tcp => TcpConnector.connect(config).await,
        TransportKind::WebSocket => WebSocketConnector.connect(config).await,
    }
}
