//! Binary codec for AMQP primitive values, strings and field tables.
//!
//! All multi-byte integers are big-endian.  Readers take a byte slice plus
//! an offset and return either the value (fixed widths) or
//! `(value, bytes_consumed)` (variable widths).  Writers append to a
//! `Vec<u8>` and return the number of bytes written.
//!
//! ```text
//! short string : [len:1][utf8:len]
//! long string  : [len:4][utf8:len]
//! field table  : [byte_len:4]([short string key][tag:1][value])*
//! field array  : [byte_len:4]([tag:1][value])*
//! ```

use thiserror::Error;
use tracing::debug;

use crate::protocol::field::{FieldTable, FieldValue};

/// Largest integer an IEEE-754 double represents exactly (2^53 - 1).
///
/// 64-bit values above this cannot round-trip through peers that store
/// numbers as doubles, so decoding one is worth a diagnostic.
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Deepest nesting of tables and arrays the decoder will follow.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Errors that can occur while encoding or decoding protocol data.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the value being read.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// A short string longer than 255 bytes cannot be encoded.
    #[error("short string too long, {0} bytes")]
    ShortStringTooLong(usize),

    /// The type tag of a field value is not a known tag.
    #[error("field type 0x{0:02X} not supported")]
    UnknownFieldType(u8),

    /// A method frame names a class/method pair this codec does not know.
    #[error("unsupported class/method id {class_id}/{method_id}")]
    UnknownMethod { class_id: u16, method_id: u16 },

    /// The frame type byte is not method, header, body or heartbeat.
    #[error("invalid frame type: {0}")]
    UnknownFrameType(u8),

    /// The frame end marker did not match the protocol constant.
    #[error("invalid frame end {found}, expected 206 (frame size {size}, position {position})")]
    InvalidFrameEnd {
        found: u8,
        size: usize,
        position: usize,
    },

    /// A frame exceeds the negotiated maximum frame size.
    #[error("frame of {size} bytes exceeds the maximum frame size of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// The payload could not be parsed (bad UTF-8, overrun table, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The value exists on the wire but this codec never produces it.
    #[error("encoding {0} values is not supported")]
    UnsupportedEncoding(&'static str),
}

// ── Fixed-width readers ───────────────────────────────────────────────────────

/// Returns `len` bytes starting at `offset`, or `InsufficientData`.
fn take(buf: &[u8], offset: usize, len: usize) -> Result<&[u8], ProtocolError> {
    let end = offset.checked_add(len).ok_or(ProtocolError::InsufficientData {
        needed: usize::MAX,
        available: buf.len(),
    })?;
    buf.get(offset..end).ok_or(ProtocolError::InsufficientData {
        needed: end,
        available: buf.len(),
    })
}

fn take_array<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], ProtocolError> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(buf, offset, N)?);
    Ok(out)
}

pub fn read_u8(buf: &[u8], offset: usize) -> Result<u8, ProtocolError> {
    Ok(take_array::<1>(buf, offset)?[0])
}

pub fn read_i8(buf: &[u8], offset: usize) -> Result<i8, ProtocolError> {
    Ok(i8::from_be_bytes(take_array(buf, offset)?))
}

pub fn read_u16(buf: &[u8], offset: usize) -> Result<u16, ProtocolError> {
    Ok(u16::from_be_bytes(take_array(buf, offset)?))
}

pub fn read_i16(buf: &[u8], offset: usize) -> Result<i16, ProtocolError> {
    Ok(i16::from_be_bytes(take_array(buf, offset)?))
}

pub fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    Ok(u32::from_be_bytes(take_array(buf, offset)?))
}

pub fn read_i32(buf: &[u8], offset: usize) -> Result<i32, ProtocolError> {
    Ok(i32::from_be_bytes(take_array(buf, offset)?))
}

/// Reads an unsigned 64-bit integer as two 32-bit halves.
///
/// Logs a diagnostic when the value is beyond [`MAX_SAFE_INTEGER`].
pub fn read_u64(buf: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    let high = u64::from(read_u32(buf, offset)?);
    let low = u64::from(read_u32(buf, offset + 4)?);
    let combined = (high << 32) | low;
    if combined > MAX_SAFE_INTEGER {
        debug!(value = combined, "64-bit value exceeds 2^53-1; double-based peers lose precision");
    }
    Ok(combined)
}

pub fn read_i64(buf: &[u8], offset: usize) -> Result<i64, ProtocolError> {
    Ok(i64::from_be_bytes(take_array(buf, offset)?))
}

pub fn read_f32(buf: &[u8], offset: usize) -> Result<f32, ProtocolError> {
    Ok(f32::from_be_bytes(take_array(buf, offset)?))
}

pub fn read_f64(buf: &[u8], offset: usize) -> Result<f64, ProtocolError> {
    Ok(f64::from_be_bytes(take_array(buf, offset)?))
}

// ── Strings and byte arrays ───────────────────────────────────────────────────

fn utf8(bytes: &[u8]) -> Result<String, ProtocolError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))
}

/// Reads a 1-byte length prefix and that many UTF-8 bytes.
///
/// Returns the string and the number of bytes consumed (`len + 1`).
pub fn read_short_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    let len = usize::from(read_u8(buf, offset)?);
    let s = utf8(take(buf, offset + 1, len)?)?;
    Ok((s, len + 1))
}

/// Reads a 4-byte length prefix and that many UTF-8 bytes.
///
/// Returns the string and the number of bytes consumed (`len + 4`).
pub fn read_long_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    let len = read_u32(buf, offset)? as usize;
    let s = utf8(take(buf, offset + 4, len)?)?;
    Ok((s, len + 4))
}

/// Reads a 4-byte length prefix and that many raw bytes.
pub fn read_byte_array(buf: &[u8], offset: usize) -> Result<(Vec<u8>, usize), ProtocolError> {
    let len = read_u32(buf, offset)? as usize;
    let bytes = take(buf, offset + 4, len)?.to_vec();
    Ok((bytes, len + 4))
}

/// Writes a 1-byte length prefix followed by the UTF-8 bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::ShortStringTooLong`] when the encoded string is
/// longer than 255 bytes; nothing is written in that case.
pub fn write_short_string(buf: &mut Vec<u8>, s: &str) -> Result<usize, ProtocolError> {
    let bytes = s.as_bytes();
    let len = u8::try_from(bytes.len()).map_err(|_| ProtocolError::ShortStringTooLong(bytes.len()))?;
    buf.push(len);
    buf.extend_from_slice(bytes);
    Ok(bytes.len() + 1)
}

/// Writes a 4-byte length prefix followed by the UTF-8 bytes.
pub fn write_long_string(buf: &mut Vec<u8>, s: &str) -> usize {
    write_byte_array(buf, s.as_bytes())
}

/// Writes a 4-byte length prefix followed by the raw bytes.
pub fn write_byte_array(buf: &mut Vec<u8>, bytes: &[u8]) -> usize {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
    bytes.len() + 4
}

// ── Field values ──────────────────────────────────────────────────────────────

/// Reads one type-tagged value: a tag byte followed by its representation.
///
/// Tables and arrays nested more than [`MAX_NESTING_DEPTH`] levels deep are
/// rejected with [`ProtocolError::MalformedPayload`].
pub fn read_field_value(buf: &[u8], offset: usize) -> Result<(FieldValue, usize), ProtocolError> {
    read_field_value_at(buf, offset, 0)
}

/// Returns the depth one level further in, or an error past the limit.
fn deeper(depth: usize) -> Result<usize, ProtocolError> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(ProtocolError::MalformedPayload(format!(
            "field values nested deeper than {MAX_NESTING_DEPTH} levels"
        )));
    }
    Ok(depth + 1)
}

fn read_field_value_at(
    buf: &[u8],
    offset: usize,
    depth: usize,
) -> Result<(FieldValue, usize), ProtocolError> {
    let tag = read_u8(buf, offset)?;
    let i = offset + 1;
    let (value, len) = match tag {
        b't' => (FieldValue::Bool(read_u8(buf, i)? == 1), 1),
        b'b' => (FieldValue::I8(read_i8(buf, i)?), 1),
        b'B' => (FieldValue::U8(read_u8(buf, i)?), 1),
        b's' => (FieldValue::I16(read_i16(buf, i)?), 2),
        b'u' => (FieldValue::U16(read_u16(buf, i)?), 2),
        b'I' => (FieldValue::I32(read_i32(buf, i)?), 4),
        b'i' => (FieldValue::U32(read_u32(buf, i)?), 4),
        b'l' => (FieldValue::I64(read_i64(buf, i)?), 8),
        b'f' => (FieldValue::F32(read_f32(buf, i)?), 4),
        b'd' => (FieldValue::F64(read_f64(buf, i)?), 8),
        b'S' => {
            let (s, len) = read_long_string(buf, i)?;
            (FieldValue::Str(s), len)
        }
        b'F' => {
            let (t, len) = read_table_at(buf, i, deeper(depth)?)?;
            (FieldValue::Table(t), len)
        }
        b'A' => {
            let (a, len) = read_array_at(buf, i, deeper(depth)?)?;
            (FieldValue::Array(a), len)
        }
        b'x' => {
            let (x, len) = read_byte_array(buf, i)?;
            (FieldValue::Bytes(x), len)
        }
        b'T' => (FieldValue::Timestamp(read_i64(buf, i)?), 8),
        b'V' => (FieldValue::Null, 0),
        b'D' => {
            let scale = read_u8(buf, i)?;
            let value = read_u32(buf, i + 1)?;
            (FieldValue::Decimal { scale, value }, 5)
        }
        other => return Err(ProtocolError::UnknownFieldType(other)),
    };
    Ok((value, len + 1))
}

/// Writes one type-tagged value and returns the number of bytes written.
///
/// # Errors
///
/// - [`ProtocolError::UnsupportedEncoding`] for [`FieldValue::Decimal`].
/// - [`ProtocolError::ShortStringTooLong`] for an over-long key in a nested
///   table.
pub fn write_field_value(buf: &mut Vec<u8>, value: &FieldValue) -> Result<usize, ProtocolError> {
    let start = buf.len();
    buf.push(value.tag());
    let len = match value {
        FieldValue::Null => 0,
        FieldValue::Bool(v) => {
            buf.push(u8::from(*v));
            1
        }
        FieldValue::I8(v) => {
            buf.extend_from_slice(&v.to_be_bytes());
            1
        }
        FieldValue::U8(v) => {
            buf.push(*v);
            1
        }
        FieldValue::I16(v) => {
            buf.extend_from_slice(&v.to_be_bytes());
            2
        }
        FieldValue::U16(v) => {
            buf.extend_from_slice(&v.to_be_bytes());
            2
        }
        FieldValue::I32(v) => {
            buf.extend_from_slice(&v.to_be_bytes());
            4
        }
        FieldValue::U32(v) => {
            buf.extend_from_slice(&v.to_be_bytes());
            4
        }
        FieldValue::I64(v) => {
            buf.extend_from_slice(&v.to_be_bytes());
            8
        }
        FieldValue::F32(v) => {
            buf.extend_from_slice(&v.to_be_bytes());
            4
        }
        FieldValue::F64(v) => {
            buf.extend_from_slice(&v.to_be_bytes());
            8
        }
        FieldValue::Str(s) => write_long_string(buf, s),
        FieldValue::Table(t) => match write_table(buf, t) {
            Ok(len) => len,
            Err(e) => {
                buf.truncate(start);
                return Err(e);
            }
        },
        FieldValue::Array(a) => match write_array(buf, a) {
            Ok(len) => len,
            Err(e) => {
                buf.truncate(start);
                return Err(e);
            }
        },
        FieldValue::Bytes(x) => write_byte_array(buf, x),
        FieldValue::Timestamp(v) => {
            buf.extend_from_slice(&v.to_be_bytes());
            8
        }
        FieldValue::Decimal { .. } => {
            buf.truncate(start);
            return Err(ProtocolError::UnsupportedEncoding("decimal"));
        }
    };
    Ok(len + 1)
}

// ── Tables and arrays ─────────────────────────────────────────────────────────

/// Reads a field table.  Returns the table and `byte_len + 4`.
pub fn read_table(buf: &[u8], offset: usize) -> Result<(FieldTable, usize), ProtocolError> {
    read_table_at(buf, offset, 0)
}

fn read_table_at(
    buf: &[u8],
    offset: usize,
    depth: usize,
) -> Result<(FieldTable, usize), ProtocolError> {
    let len = read_u32(buf, offset)? as usize;
    let start = offset + 4;
    let end = start + len;
    take(buf, start, len)?;

    let mut table = FieldTable::new();
    let mut i = start;
    while i < end {
        let (key, key_len) = read_short_string(buf, i)?;
        i += key_len;
        let (value, value_len) = read_field_value_at(buf, i, depth)?;
        i += value_len;
        table.insert(key, value);
    }
    if i != end {
        return Err(ProtocolError::MalformedPayload(format!(
            "field table overran its declared length of {len} bytes"
        )));
    }
    Ok((table, len + 4))
}

/// Writes a field table, back-filling the 4-byte length prefix once all
/// entries are serialized.
///
/// On error nothing is left behind in `buf`.
pub fn write_table(buf: &mut Vec<u8>, table: &FieldTable) -> Result<usize, ProtocolError> {
    let start = buf.len();
    buf.extend_from_slice(&[0u8; 4]);
    for (key, value) in table {
        let entry = write_short_string(buf, key).and_then(|_| write_field_value(buf, value));
        if let Err(e) = entry {
            buf.truncate(start);
            return Err(e);
        }
    }
    let len = (buf.len() - start - 4) as u32;
    buf[start..start + 4].copy_from_slice(&len.to_be_bytes());
    Ok(buf.len() - start)
}

/// Reads a field array.  Returns the values and `byte_len + 4`.
pub fn read_array(buf: &[u8], offset: usize) -> Result<(Vec<FieldValue>, usize), ProtocolError> {
    read_array_at(buf, offset, 0)
}

fn read_array_at(
    buf: &[u8],
    offset: usize,
    depth: usize,
) -> Result<(Vec<FieldValue>, usize), ProtocolError> {
    let len = read_u32(buf, offset)? as usize;
    let start = offset + 4;
    let end = start + len;
    take(buf, start, len)?;

    let mut values = Vec::new();
    let mut i = start;
    while i < end {
        let (value, value_len) = read_field_value_at(buf, i, depth)?;
        i += value_len;
        values.push(value);
    }
    if i != end {
        return Err(ProtocolError::MalformedPayload(format!(
            "field array overran its declared length of {len} bytes"
        )));
    }
    Ok((values, len + 4))
}

/// Writes a field array, back-filling the 4-byte length prefix.
pub fn write_array(buf: &mut Vec<u8>, values: &[FieldValue]) -> Result<usize, ProtocolError> {
    let start = buf.len();
    buf.extend_from_slice(&[0u8; 4]);
    for value in values {
        if let Err(e) = write_field_value(buf, value) {
            buf.truncate(start);
            return Err(e);
        }
    }
    let len = (buf.len() - start - 4) as u32;
    buf[start..start + 4].copy_from_slice(&len.to_be_bytes());
    Ok(buf.len() - start)
}

// ── Sequential reader ─────────────────────────────────────────────────────────

/// A cursor over a payload, used to decode method arguments in order.
///
/// Each call reads one value at the current position and advances past it.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the payload.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the current position.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        let v = read_u8(self.buf, self.pos)?;
        self.pos += 1;
        Ok(v)
    }

    pub fn bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        let v = read_u16(self.buf, self.pos)?;
        self.pos += 2;
        Ok(v)
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        let v = read_u32(self.buf, self.pos)?;
        self.pos += 4;
        Ok(v)
    }

    pub fn u64(&mut self) -> Result<u64, ProtocolError> {
        let v = read_u64(self.buf, self.pos)?;
        self.pos += 8;
        Ok(v)
    }

    pub fn short_string(&mut self) -> Result<String, ProtocolError> {
        let (s, len) = read_short_string(self.buf, self.pos)?;
        self.pos += len;
        Ok(s)
    }

    pub fn long_string(&mut self) -> Result<String, ProtocolError> {
        let (s, len) = read_long_string(self.buf, self.pos)?;
        self.pos += len;
        Ok(s)
    }

    /// Reads a long string as raw bytes (used where the content is opaque,
    /// such as the SASL response).
    pub fn long_bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let (b, len) = read_byte_array(self.buf, self.pos)?;
        self.pos += len;
        Ok(b)
    }

    pub fn table(&mut self) -> Result<FieldTable, ProtocolError> {
        let (t, len) = read_table(self.buf, self.pos)?;
        self.pos += len;
        Ok(t)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_value(value: &FieldValue) -> FieldValue {
        let mut buf = Vec::new();
        let written = write_field_value(&mut buf, value).expect("encode failed");
        assert_eq!(written, buf.len(), "written length must match buffer length");
        let (decoded, consumed) = read_field_value(&buf, 0).expect("decode failed");
        assert_eq!(consumed, buf.len(), "consumed bytes should equal encoded size");
        decoded
    }

    // ── Primitives ────────────────────────────────────────────────────────────

    #[test]
    fn test_read_u16_is_big_endian() {
        assert_eq!(read_u16(&[0x12, 0x34], 0), Ok(0x1234));
    }

    #[test]
    fn test_read_u64_combines_two_halves() {
        // Arrange
        let bytes = 0x0000_0001_0000_0002u64.to_be_bytes();

        // Act
        let value = read_u64(&bytes, 0).unwrap();

        // Assert
        assert_eq!(value, (1u64 << 32) | 2);
    }

    #[test]
    fn test_read_u64_above_safe_range_still_exact() {
        let bytes = u64::MAX.to_be_bytes();
        assert_eq!(read_u64(&bytes, 0), Ok(u64::MAX));
    }

    #[test]
    fn test_read_past_end_returns_insufficient_data() {
        let result = read_u32(&[0, 1, 2], 0);
        assert_eq!(
            result,
            Err(ProtocolError::InsufficientData { needed: 4, available: 3 })
        );
    }

    // ── Strings ───────────────────────────────────────────────────────────────

    #[test]
    fn test_short_string_round_trip_reports_consumed_length() {
        let mut buf = Vec::new();
        let written = write_short_string(&mut buf, "amq.direct").unwrap();
        assert_eq!(written, 11);
        assert_eq!(read_short_string(&buf, 0), Ok(("amq.direct".to_string(), 11)));
    }

    #[test]
    fn test_short_string_255_bytes_is_accepted() {
        let s = "a".repeat(255);
        let mut buf = Vec::new();
        assert_eq!(write_short_string(&mut buf, &s), Ok(256));
    }

    #[test]
    fn test_short_string_256_bytes_is_rejected_without_writing() {
        // Arrange
        let s = "a".repeat(256);
        let mut buf = Vec::new();

        // Act
        let result = write_short_string(&mut buf, &s);

        // Assert
        assert_eq!(result, Err(ProtocolError::ShortStringTooLong(256)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_short_string_length_counts_utf8_bytes() {
        // 128 two-byte characters = 256 bytes, over the limit
        let s = "é".repeat(128);
        let mut buf = Vec::new();
        assert_eq!(
            write_short_string(&mut buf, &s),
            Err(ProtocolError::ShortStringTooLong(256))
        );
    }

    #[test]
    fn test_long_string_round_trip() {
        let s = "x".repeat(70_000);
        let mut buf = Vec::new();
        assert_eq!(write_long_string(&mut buf, &s), 70_004);
        assert_eq!(read_long_string(&buf, 0), Ok((s, 70_004)));
    }

    #[test]
    fn test_invalid_utf8_is_malformed_payload() {
        let buf = [2u8, 0xC3, 0x28];
        assert!(matches!(
            read_short_string(&buf, 0),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    // ── Field values ──────────────────────────────────────────────────────────

    #[test]
    fn test_every_encodable_variant_round_trips_with_same_type() {
        let mut nested = FieldTable::new();
        nested.insert("inner".to_string(), FieldValue::U8(7));

        let values = vec![
            FieldValue::Null,
            FieldValue::Bool(true),
            FieldValue::Bool(false),
            FieldValue::I8(-8),
            FieldValue::U8(200),
            FieldValue::I16(-1234),
            FieldValue::U16(65_000),
            FieldValue::I32(-70_000),
            FieldValue::U32(4_000_000_000),
            FieldValue::I64(-9_000_000_000),
            FieldValue::F32(1.5),
            FieldValue::F64(-2.25e100),
            FieldValue::Str("héllo".to_string()),
            FieldValue::Table(nested),
            FieldValue::Array(vec![FieldValue::I32(1), FieldValue::Str("two".into())]),
            FieldValue::Bytes(vec![0, 1, 2, 255]),
            FieldValue::Timestamp(1_700_000_000),
            FieldValue::Timestamp(-86_400),
        ];

        for value in values {
            assert_eq!(round_trip_value(&value), value);
        }
    }

    #[test]
    fn test_decimal_decodes_scale_and_mantissa() {
        // Arrange: 'D', scale 3, mantissa 1500
        let mut buf = vec![b'D', 3];
        buf.extend_from_slice(&1500u32.to_be_bytes());

        // Act
        let (value, consumed) = read_field_value(&buf, 0).unwrap();

        // Assert
        assert_eq!(consumed, 6);
        assert_eq!(value, FieldValue::Decimal { scale: 3, value: 1500 });
        assert_eq!(value.decimal_as_f64(), Some(1.5));
    }

    #[test]
    fn test_decimal_encoding_is_rejected() {
        let mut buf = Vec::new();
        let result = write_field_value(&mut buf, &FieldValue::Decimal { scale: 1, value: 1 });
        assert_eq!(result, Err(ProtocolError::UnsupportedEncoding("decimal")));
    }

    #[test]
    fn test_unknown_field_tag_is_rejected() {
        assert_eq!(
            read_field_value(&[b'Z', 0], 0),
            Err(ProtocolError::UnknownFieldType(b'Z'))
        );
    }

    // ── Tables ────────────────────────────────────────────────────────────────

    #[test]
    fn test_table_length_prefix_covers_all_entries() {
        // Arrange
        let mut table = FieldTable::new();
        table.insert("a".to_string(), FieldValue::Bool(true));

        // Act
        let mut buf = Vec::new();
        let written = write_table(&mut buf, &table).unwrap();

        // Assert: key (1+1) + tag (1) + bool (1) = 4 bytes of entries
        assert_eq!(written, 8);
        assert_eq!(&buf[0..4], &4u32.to_be_bytes());
    }

    #[test]
    fn test_empty_table_round_trip() {
        let mut buf = Vec::new();
        write_table(&mut buf, &FieldTable::new()).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0]);
        assert_eq!(read_table(&buf, 0), Ok((FieldTable::new(), 4)));
    }

    #[test]
    fn test_table_written_at_offset_backfills_its_own_prefix() {
        // Arrange: some unrelated bytes already in the buffer
        let mut buf = vec![0xAA, 0xBB, 0xCC];
        let mut table = FieldTable::new();
        table.insert("k".to_string(), FieldValue::Str("v".into()));

        // Act
        write_table(&mut buf, &table).unwrap();

        // Assert
        assert_eq!(&buf[0..3], &[0xAA, 0xBB, 0xCC]);
        let (decoded, _) = read_table(&buf, 3).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn test_table_with_truncated_body_is_insufficient_data() {
        // Declares 10 bytes of entries but provides 2
        let buf = [0, 0, 0, 10, 1, b'a'];
        assert!(matches!(
            read_table(&buf, 0),
            Err(ProtocolError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_array_round_trip_with_nested_array() {
        let values = vec![
            FieldValue::Array(vec![FieldValue::Null, FieldValue::Bool(false)]),
            FieldValue::I64(1 << 40),
        ];
        let mut buf = Vec::new();
        let written = write_array(&mut buf, &values).unwrap();
        assert_eq!(read_array(&buf, 0), Ok((values, written)));
    }

    #[test]
    fn test_negative_timestamp_keeps_its_sign() {
        // Arrange: one day before the epoch
        let mut buf = vec![b'T'];
        buf.extend_from_slice(&(-86_400i64).to_be_bytes());

        // Act
        let (value, consumed) = read_field_value(&buf, 0).unwrap();

        // Assert
        assert_eq!(consumed, 9);
        assert_eq!(value, FieldValue::Timestamp(-86_400));
    }

    #[test]
    fn test_table_with_unencodable_value_leaves_buffer_untouched() {
        // Arrange
        let mut buf = vec![0xAA];
        let mut table = FieldTable::new();
        table.insert("a".to_string(), FieldValue::Str("ok".into()));
        table.insert("b".to_string(), FieldValue::Decimal { scale: 2, value: 5 });

        // Act
        let result = write_table(&mut buf, &table);

        // Assert
        assert_eq!(result, Err(ProtocolError::UnsupportedEncoding("decimal")));
        assert_eq!(buf, vec![0xAA]);
    }

    #[test]
    fn test_table_with_over_long_key_leaves_buffer_untouched() {
        let mut buf = Vec::new();
        let mut table = FieldTable::new();
        table.insert("k".repeat(300), FieldValue::Null);
        assert_eq!(
            write_table(&mut buf, &table),
            Err(ProtocolError::ShortStringTooLong(300))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_array_with_unencodable_value_leaves_buffer_untouched() {
        // Arrange: the failure is two levels down
        let mut buf = vec![1, 2, 3];
        let values = vec![
            FieldValue::I32(1),
            FieldValue::Array(vec![FieldValue::Decimal { scale: 0, value: 9 }]),
        ];

        // Act
        let result = write_array(&mut buf, &values);

        // Assert
        assert!(result.is_err());
        assert_eq!(buf, vec![1, 2, 3]);
    }

    #[test]
    fn test_nested_table_failure_removes_its_tag_byte() {
        // Arrange
        let mut inner = FieldTable::new();
        inner.insert("d".to_string(), FieldValue::Decimal { scale: 1, value: 1 });
        let mut buf = Vec::new();

        // Act
        let result = write_field_value(&mut buf, &FieldValue::Table(inner));

        // Assert
        assert!(result.is_err());
        assert!(buf.is_empty());
    }

    // ── Nesting ───────────────────────────────────────────────────────────────

    /// Encodes `levels` arrays, each holding the next, around a single null.
    fn nested_arrays(levels: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(levels * 5 + 1);
        for remaining in (0..levels).rev() {
            // an array holding `remaining` more arrays around the null
            buf.push(b'A');
            buf.extend_from_slice(&((remaining * 5 + 1) as u32).to_be_bytes());
        }
        buf.push(b'V');
        buf
    }

    #[test]
    fn test_nesting_at_the_limit_is_accepted() {
        // Arrange
        let buf = nested_arrays(MAX_NESTING_DEPTH);

        // Act
        let (mut value, consumed) = read_field_value(&buf, 0).unwrap();

        // Assert
        assert_eq!(consumed, buf.len());
        let mut levels = 0;
        while let FieldValue::Array(mut items) = value {
            levels += 1;
            value = items.pop().unwrap();
        }
        assert_eq!(levels, MAX_NESTING_DEPTH);
        assert_eq!(value, FieldValue::Null);
    }

    #[test]
    fn test_nesting_past_the_limit_is_malformed_payload() {
        let buf = nested_arrays(MAX_NESTING_DEPTH + 1);
        assert!(matches!(
            read_field_value(&buf, 0),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_deeply_nested_input_is_rejected_without_overflowing_the_stack() {
        // Arrange: far deeper than any recursion could survive, wrapped in a table
        let array = nested_arrays(20_000);
        let mut entries = Vec::new();
        write_short_string(&mut entries, "deep").unwrap();
        entries.extend_from_slice(&array);
        let mut buf = (entries.len() as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(&entries);

        // Act
        let result = read_table(&buf, 0);

        // Assert
        assert!(matches!(result, Err(ProtocolError::MalformedPayload(_))));
    }

    // ── Reader ────────────────────────────────────────────────────────────────

    #[test]
    fn test_reader_advances_through_mixed_values() {
        // Arrange
        let mut buf = Vec::new();
        buf.extend_from_slice(&7u16.to_be_bytes());
        write_short_string(&mut buf, "q1").unwrap();
        buf.push(1);

        // Act
        let mut r = Reader::new(&buf);
        let a = r.u16().unwrap();
        let b = r.short_string().unwrap();
        let c = r.bool().unwrap();

        // Assert
        assert_eq!((a, b.as_str(), c), (7, "q1", true));
        assert_eq!(r.remaining(), 0);
        assert_eq!(r.position(), buf.len());
    }
}
