//! Application layer: the protocol state machines.
//!
//! - **`connection`** – handshake, channel slot table, heartbeat echo,
//!   connection-level close and blocked notifications, and the frame
//!   dispatch loop fed by [`connection::Connection::handle_data`].
//! - **`channel`** – per-channel RPC queue, consumers, publisher confirms,
//!   publish framing and message assembly.
//! - **`consumer`**, **`message`**, **`queue`** – handles and values
//!   returned to callers.
//! - **`transport`** – the [`transport::Transport`] seam the
//!   infrastructure layer implements.
//! - **`error`** – [`error::ClientError`].

pub mod channel;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod message;
pub mod queue;
pub mod transport;
