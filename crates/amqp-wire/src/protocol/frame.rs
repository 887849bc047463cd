//! Frame layout, constants and frame writers.
//!
//! ```text
//! [type:1][channel:2 BE][size:4 BE][payload:size][0xCE]
//! ```
//!
//! Writers append one complete frame to a caller-owned buffer so that a
//! method frame, its content header and the first body frame can be
//! coalesced into a single transport write.

use crate::protocol::codec::{read_u16, read_u32, read_u64, read_u8, ProtocolError};
use crate::protocol::methods::{encode_method, Method};
use crate::protocol::properties::BasicProperties;

/// The end-of-frame marker byte.
pub const FRAME_END: u8 = 206;

/// Bytes before the payload: type (1) + channel (2) + size (4).
pub const FRAME_HEADER_SIZE: usize = 7;

/// Header plus end marker: the bytes of a frame that are not payload.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + 1;

/// The 8-byte preamble sent before any frame: `AMQP` 0 0 9 1.
pub const PROTOCOL_HEADER: [u8; 8] = [b'A', b'M', b'Q', b'P', 0, 0, 9, 1];

/// A complete heartbeat frame (type 8, channel 0, empty payload).
pub const HEARTBEAT_FRAME: [u8; 8] = [8, 0, 0, 0, 0, 0, 0, FRAME_END];

/// Smallest frame size a peer may negotiate.
pub const MIN_FRAME_MAX: u32 = 4096;

/// Frame size assumed when neither side limits it.
pub const DEFAULT_FRAME_MAX: u32 = 131_072;

/// Class id carried by every content header this client produces.
const BASIC_CLASS_ID: u16 = 60;

/// Discriminant of the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Method = 1,
    Header = 2,
    Body = 3,
    Heartbeat = 8,
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FrameType::Method),
            2 => Ok(FrameType::Header),
            3 => Ok(FrameType::Body),
            8 => Ok(FrameType::Heartbeat),
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }
}

/// A borrowed, validated frame.  The payload points into the buffer the
/// frame was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameView<'a> {
    pub frame_type: u8,
    pub channel: u16,
    pub payload: &'a [u8],
}

impl<'a> FrameView<'a> {
    /// Typed frame kind, or `UnknownFrameType`.
    pub fn kind(&self) -> Result<FrameType, ProtocolError> {
        FrameType::try_from(self.frame_type)
    }

    pub fn to_frame(&self) -> Frame {
        Frame {
            frame_type: self.frame_type,
            channel: self.channel,
            payload: self.payload.to_vec(),
        }
    }
}

/// An owned frame, used where a frame must outlive the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: u8,
    pub channel: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            frame_type: self.frame_type,
            channel: self.channel,
            payload: &self.payload,
        }
    }

    /// Appends the wire form of this frame to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> usize {
        let start = begin_frame(buf, self.frame_type, self.channel);
        buf.extend_from_slice(&self.payload);
        finish_frame(buf, start)
    }
}

/// Reads the 7-byte header at `offset`: `(type, channel, payload_size)`.
pub fn read_frame_header(buf: &[u8], offset: usize) -> Result<(u8, u16, u32), ProtocolError> {
    Ok((
        read_u8(buf, offset)?,
        read_u16(buf, offset + 1)?,
        read_u32(buf, offset + 3)?,
    ))
}

/// Parses one complete frame at the start of `buf`.
///
/// Returns the frame and its total length on the wire.
///
/// # Errors
///
/// - [`ProtocolError::InsufficientData`] if `buf` holds less than a frame.
/// - [`ProtocolError::InvalidFrameEnd`] if the end marker is wrong.
pub fn parse_frame(buf: &[u8]) -> Result<(FrameView<'_>, usize), ProtocolError> {
    let (frame_type, channel, size) = read_frame_header(buf, 0)?;
    let size = size as usize;
    let total = size + FRAME_OVERHEAD;
    if buf.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: buf.len(),
        });
    }
    let end = buf[total - 1];
    if end != FRAME_END {
        return Err(ProtocolError::InvalidFrameEnd {
            found: end,
            size,
            position: total - 1,
        });
    }
    let view = FrameView {
        frame_type,
        channel,
        payload: &buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + size],
    };
    Ok((view, total))
}

// ── Writers ───────────────────────────────────────────────────────────────────

/// Writes type and channel plus a placeholder size; returns the frame start.
fn begin_frame(buf: &mut Vec<u8>, frame_type: u8, channel: u16) -> usize {
    let start = buf.len();
    buf.push(frame_type);
    buf.extend_from_slice(&channel.to_be_bytes());
    buf.extend_from_slice(&[0u8; 4]);
    start
}

/// Patches the payload size into the header and appends the end marker.
/// Returns the total frame length.
fn finish_frame(buf: &mut Vec<u8>, start: usize) -> usize {
    let size = (buf.len() - start - FRAME_HEADER_SIZE) as u32;
    buf[start + 3..start + 7].copy_from_slice(&size.to_be_bytes());
    buf.push(FRAME_END);
    buf.len() - start
}

/// Appends a method frame (class id, method id, arguments).
///
/// On error `buf` is restored to its original length.
pub fn write_method_frame(
    buf: &mut Vec<u8>,
    channel: u16,
    method: &Method,
) -> Result<usize, ProtocolError> {
    let start = begin_frame(buf, FrameType::Method as u8, channel);
    if let Err(e) = encode_method(buf, method) {
        buf.truncate(start);
        return Err(e);
    }
    Ok(finish_frame(buf, start))
}

/// Appends a content header frame: class id, weight 0, body size, properties.
pub fn write_content_header_frame(
    buf: &mut Vec<u8>,
    channel: u16,
    body_size: u64,
    properties: &BasicProperties,
) -> Result<usize, ProtocolError> {
    let start = begin_frame(buf, FrameType::Header as u8, channel);
    buf.extend_from_slice(&BASIC_CLASS_ID.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes());
    buf.extend_from_slice(&body_size.to_be_bytes());
    if let Err(e) = properties.encode(buf) {
        buf.truncate(start);
        return Err(e);
    }
    Ok(finish_frame(buf, start))
}

/// Appends one body frame carrying `chunk`.
pub fn write_body_frame(buf: &mut Vec<u8>, channel: u16, chunk: &[u8]) -> usize {
    let start = begin_frame(buf, FrameType::Body as u8, channel);
    buf.extend_from_slice(chunk);
    finish_frame(buf, start)
}

// ── Content header ────────────────────────────────────────────────────────────

/// The decoded payload of a content header frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentHeader {
    pub class_id: u16,
    pub body_size: u64,
    pub properties: BasicProperties,
}

/// Decodes a content header payload (class id, weight, body size, properties).
pub fn decode_content_header(payload: &[u8]) -> Result<ContentHeader, ProtocolError> {
    let class_id = read_u16(payload, 0)?;
    // weight at offset 2 is unused
    let body_size = read_u64(payload, 4)?;
    let (properties, _) = BasicProperties::decode(payload, 12)?;
    Ok(ContentHeader {
        class_id,
        body_size,
        properties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_constant_parses_as_heartbeat() {
        let (frame, len) = parse_frame(&HEARTBEAT_FRAME).unwrap();
        assert_eq!(len, 8);
        assert_eq!(frame.kind(), Ok(FrameType::Heartbeat));
        assert_eq!(frame.channel, 0);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_body_frame_layout() {
        // Arrange / Act
        let mut buf = Vec::new();
        let written = write_body_frame(&mut buf, 3, b"hi");

        // Assert
        assert_eq!(written, 10);
        assert_eq!(buf, vec![3, 0, 3, 0, 0, 0, 2, b'h', b'i', FRAME_END]);
    }

    #[test]
    fn test_parse_rejects_wrong_end_marker() {
        // Arrange
        let mut buf = Vec::new();
        write_body_frame(&mut buf, 1, b"abc");
        let last = buf.len() - 1;
        buf[last] = 0;

        // Act
        let result = parse_frame(&buf);

        // Assert
        assert_eq!(
            result,
            Err(ProtocolError::InvalidFrameEnd {
                found: 0,
                size: 3,
                position: 10
            })
        );
    }

    #[test]
    fn test_parse_incomplete_frame_is_insufficient_data() {
        let mut buf = Vec::new();
        write_body_frame(&mut buf, 1, b"abc");
        buf.pop();
        assert!(matches!(
            parse_frame(&buf),
            Err(ProtocolError::InsufficientData { needed: 11, .. })
        ));
    }

    #[test]
    fn test_content_header_round_trip() {
        // Arrange
        let props = BasicProperties {
            content_type: Some("text/plain".into()),
            delivery_mode: Some(2),
            ..Default::default()
        };

        // Act
        let mut buf = Vec::new();
        write_content_header_frame(&mut buf, 5, 1_000_000, &props).unwrap();
        let (frame, _) = parse_frame(&buf).unwrap();
        let header = decode_content_header(frame.payload).unwrap();

        // Assert
        assert_eq!(frame.kind(), Ok(FrameType::Header));
        assert_eq!(frame.channel, 5);
        assert_eq!(header.class_id, 60);
        assert_eq!(header.body_size, 1_000_000);
        assert_eq!(header.properties, props);
    }

    #[test]
    fn test_method_frame_starts_with_class_and_method_ids() {
        let mut buf = Vec::new();
        write_method_frame(&mut buf, 0, &Method::ConnectionCloseOk).unwrap();
        let (frame, _) = parse_frame(&buf).unwrap();
        assert_eq!(frame.payload, &[0, 10, 0, 51]);
    }

    #[test]
    fn test_failed_method_encode_leaves_buffer_untouched() {
        // Arrange
        let mut buf = vec![1, 2, 3];
        let method = Method::QueueDelete {
            queue: "q".repeat(300),
            if_unused: false,
            if_empty: false,
            no_wait: false,
        };

        // Act
        let result = write_method_frame(&mut buf, 1, &method);

        // Assert
        assert_eq!(result, Err(ProtocolError::ShortStringTooLong(300)));
        assert_eq!(buf, vec![1, 2, 3]);
    }

    #[test]
    fn test_frame_type_rejects_unknown_byte() {
        assert_eq!(FrameType::try_from(4), Err(ProtocolError::UnknownFrameType(4)));
    }
}
