//! Value types shared by the connection and channel APIs.
//!
//! These are plain data: option bundles for declare/consume/publish calls,
//! the lifecycle states reported by [`crate::Connection::state`] and
//! [`crate::Channel::state`], and the reply of `queue.declare`.

use amqp_wire::FieldTable;
use serde::Serialize;

/// Connection lifecycle.
///
/// ```text
/// Disconnected → Negotiating → Authenticating → Tuning → Open → Closing → Closed
/// ```
///
/// Any state can jump straight to `Closed` when the broker closes the
/// connection or the transport drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// Created, protocol header not yet sent.
    Disconnected,
    /// Protocol header sent, waiting for `connection.start`.
    Negotiating,
    /// `start-ok` sent, waiting for `connection.tune`.
    Authenticating,
    /// `tune-ok` and `connection.open` sent, waiting for `open-ok`.
    Tuning,
    Open,
    /// `connection.close` sent, waiting for `close-ok`.
    Closing,
    Closed,
}

/// Channel lifecycle.  A released channel has no state; its slot is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    Opening,
    Open,
    Closing,
    Closed,
}

/// Reply of `queue.declare`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueInfo {
    /// The queue name; server-generated when an empty name was declared.
    pub queue: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Flags for `queue.declare`.
///
/// Unset flags follow the name: a named queue defaults to durable, an
/// unnamed (server-named) queue defaults to exclusive and auto-delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDeclareOptions {
    pub passive: bool,
    pub durable: Option<bool>,
    pub exclusive: Option<bool>,
    pub auto_delete: Option<bool>,
    pub arguments: FieldTable,
}

/// `QueueDeclareOptions` with every default applied for one queue name.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedQueueOptions {
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub arguments: FieldTable,
}

impl QueueDeclareOptions {
    pub(crate) fn resolve(self, name: &str) -> ResolvedQueueOptions {
        let named = !name.is_empty();
        ResolvedQueueOptions {
            passive: self.passive,
            durable: self.durable.unwrap_or(named),
            exclusive: self.exclusive.unwrap_or(!named),
            auto_delete: self.auto_delete.unwrap_or(!named),
            arguments: self.arguments,
        }
    }
}

/// Flags for `exchange.declare`.  Exchanges are durable by default.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeDeclareOptions {
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub arguments: FieldTable,
}

impl Default for ExchangeDeclareOptions {
    fn default() -> Self {
        Self {
            passive: false,
            durable: true,
            auto_delete: false,
            internal: false,
            arguments: FieldTable::new(),
        }
    }
}

/// Options for `basic.consume`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumeOptions {
    /// Consumer tag; empty lets the broker assign one.
    pub tag: String,
    pub no_local: bool,
    /// Deliveries count as acknowledged as soon as they are sent.
    pub no_ack: bool,
    pub exclusive: bool,
    pub arguments: FieldTable,
}

/// Routing flags for `basic.publish`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Return the message if no queue is bound to the routing key.
    pub mandatory: bool,
    /// Return the message if no consumer can take it right away.
    pub immediate: bool,
}
