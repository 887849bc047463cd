//! amqp-client library crate.
//!
//! An AMQP 0-9-1 client: connection handshake and tuning, channels,
//! publishing with optional publisher confirms, consumers, `basic.get`,
//! returned messages, and TCP or WebSocket transports.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Broker (AMQP frames over TCP or WebSocket)
//!         ↕
//! [amqp-client]
//!   ├── domain/           Configuration and plain option/state types
//!   ├── application/      Connection + Channel state machines (amqp-wire codec)
//!   └── infrastructure/
//!         ├── tcp/        tokio TcpStream adapter
//!         ├── websocket/  tokio-tungstenite adapter
//!         └── mock/       RecordingTransport for tests
//! ```
//!
//! # Layer rules
//!
//! - `domain` performs no I/O.
//! - `application` depends on `domain` and `amqp-wire`; it never opens a
//!   socket, it only writes through the `Transport` trait.
//! - `infrastructure` owns sockets and tasks and feeds received bytes to
//!   `Connection::handle_data`.
//!
//! # Example
//!
//! ```no_run
//! use amqp_client::{connect, BasicProperties, ClientConfig, PublishOptions};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ClientConfig::default();
//! let conn = connect(&config.connection).await?;
//! let channel = conn.channel(None).await?;
//! channel
//!     .basic_publish("", "jobs", b"hello", &BasicProperties::default(), PublishOptions::default())
//!     .await?;
//! conn.close(200, "done").await?;
//! # Ok(())
//! # }
//! ```

/// Domain layer: configuration and value types (no I/O).
pub mod domain;

/// Application layer: connection, channel, consumer and message logic.
pub mod application;

/// Infrastructure layer: TCP and WebSocket transports, test transport.
pub mod infrastructure;

pub use amqp_wire::{BasicProperties, FieldTable, FieldValue};
pub use application::channel::Channel;
pub use application::connection::Connection;
pub use application::consumer::{Consumer, ConsumerStatus};
pub use application::error::ClientError;
pub use application::message::Message;
pub use application::queue::Queue;
pub use application::transport::Transport;
pub use domain::config::{ClientConfig, ConnectionConfig, TransportKind};
pub use domain::types::{
    ChannelState, ConnectionState, ConsumeOptions, ExchangeDeclareOptions, PublishOptions,
    QueueDeclareOptions, QueueInfo,
};
pub use infrastructure::connect;
