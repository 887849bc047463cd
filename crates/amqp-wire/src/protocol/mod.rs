//! Protocol module containing the value codec, method and frame types, and
//! the frame reassembler.

pub mod codec;
pub mod field;
pub mod frame;
pub mod methods;
pub mod properties;
pub mod reassembler;

pub use codec::ProtocolError;
pub use field::{FieldTable, FieldValue};
pub use frame::*;
pub use methods::{decode_method, encode_method, Method};
pub use properties::BasicProperties;
pub use reassembler::FrameReassembler;
