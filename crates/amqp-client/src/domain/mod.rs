//! Domain layer: configuration and the plain value types of the client API.
//!
//! Nothing here performs I/O or holds connection state.

pub mod config;
pub mod types;

pub use config::{ClientConfig, ConfigError, ConnectionConfig, LoggingConfig, TransportKind};
pub use types::{
    ChannelState, ConnectionState, ConsumeOptions, ExchangeDeclareOptions, PublishOptions,
    QueueDeclareOptions, QueueInfo,
};
