//! # amqp-wire
//!
//! Binary codec for the AMQP 0-9-1 wire protocol: primitive values, field
//! tables, basic properties, method frames, content frames and the frame
//! reassembler that turns an arbitrarily fragmented byte stream back into
//! whole frames.
//!
//! This crate performs no I/O and has no async runtime.  It is shared by the
//! client crate and by tests that need to play the broker side of a
//! conversation.
//!
//! # Architecture overview (for beginners)
//!
//! Every AMQP conversation is a sequence of *frames*:
//!
//! ```text
//! [type:1][channel:2][size:4][payload:size][0xCE]
//! ```
//!
//! - **Method frames** (type 1) carry a command such as `queue.declare`,
//!   identified by a class id and a method id.
//! - **Content header frames** (type 2) carry the size and properties of a
//!   message body that follows.
//! - **Body frames** (type 3) carry slices of the message body.
//! - **Heartbeat frames** (type 8) have an empty payload and only prove that
//!   the peer is alive.
//!
//! The modules are:
//!
//! - **`protocol::codec`** – primitive readers/writers, short and long
//!   strings, type-tagged field values, tables and arrays.
//! - **`protocol::field`** – the [`FieldValue`] variant type.
//! - **`protocol::properties`** – [`BasicProperties`] and its flag word.
//! - **`protocol::methods`** – the [`Method`] enum with one variant per
//!   class/method pair this client sends or receives.
//! - **`protocol::frame`** – frame constants and frame writers.
//! - **`protocol::reassembler`** – [`FrameReassembler`], which buffers
//!   partial frames across transport chunks.

pub mod protocol;

pub use protocol::codec::ProtocolError;
pub use protocol::field::{FieldTable, FieldValue};
pub use protocol::frame::{ContentHeader, Frame, FrameType, FrameView};
pub use protocol::methods::{decode_method, encode_method, Method};
pub use protocol::properties::BasicProperties;
pub use protocol::reassembler::FrameReassembler;
