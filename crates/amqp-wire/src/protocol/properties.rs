//! Basic content properties and their 16-bit presence flag word.
//!
//! A content header carries a flag word followed by only the properties whose
//! flag bit is set, in descending bit order:
//!
//! ```text
//! 0x8000 content_type      short string
//! 0x4000 content_encoding  short string
//! 0x2000 headers           field table
//! 0x1000 delivery_mode     octet
//! 0x0800 priority          octet
//! 0x0400 correlation_id    short string
//! 0x0200 reply_to          short string
//! 0x0100 expiration        short string
//! 0x0080 message_id        short string
//! 0x0040 timestamp         64-bit
//! 0x0020 type              short string
//! 0x0010 user_id           short string
//! 0x0008 app_id            short string
//! ```

use serde::Serialize;

use crate::protocol::codec::{
    read_short_string, read_table, read_u16, read_u64, read_u8, write_short_string, write_table,
    ProtocolError,
};
use crate::protocol::field::FieldTable;

const CONTENT_TYPE: u16 = 0x8000;
const CONTENT_ENCODING: u16 = 0x4000;
const HEADERS: u16 = 0x2000;
const DELIVERY_MODE: u16 = 0x1000;
const PRIORITY: u16 = 0x0800;
const CORRELATION_ID: u16 = 0x0400;
const REPLY_TO: u16 = 0x0200;
const EXPIRATION: u16 = 0x0100;
const MESSAGE_ID: u16 = 0x0080;
const TIMESTAMP: u16 = 0x0040;
const TYPE: u16 = 0x0020;
const USER_ID: u16 = 0x0010;
const APP_ID: u16 = 0x0008;

/// Optional metadata attached to a published or delivered message.
///
/// An absent property is `None` and is omitted from the wire entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BasicProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: Option<FieldTable>,
    /// 1 = transient, 2 = persistent.
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: Option<u64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
}

impl BasicProperties {
    /// Computes the presence flag word for the properties that are set.
    pub fn flags(&self) -> u16 {
        let mut flags = 0u16;
        let mut set = |present: bool, bit: u16| {
            if present {
                flags |= bit;
            }
        };
        set(self.content_type.is_some(), CONTENT_TYPE);
        set(self.content_encoding.is_some(), CONTENT_ENCODING);
        set(self.headers.is_some(), HEADERS);
        set(self.delivery_mode.is_some(), DELIVERY_MODE);
        set(self.priority.is_some(), PRIORITY);
        set(self.correlation_id.is_some(), CORRELATION_ID);
        set(self.reply_to.is_some(), REPLY_TO);
        set(self.expiration.is_some(), EXPIRATION);
        set(self.message_id.is_some(), MESSAGE_ID);
        set(self.timestamp.is_some(), TIMESTAMP);
        set(self.kind.is_some(), TYPE);
        set(self.user_id.is_some(), USER_ID);
        set(self.app_id.is_some(), APP_ID);
        flags
    }

    /// Writes the flag word followed by every present property.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, ProtocolError> {
        let start = buf.len();
        buf.extend_from_slice(&self.flags().to_be_bytes());

        let short = |buf: &mut Vec<u8>, v: &Option<String>| -> Result<(), ProtocolError> {
            if let Some(s) = v {
                write_short_string(buf, s)?;
            }
            Ok(())
        };

        short(buf, &self.content_type)?;
        short(buf, &self.content_encoding)?;
        if let Some(headers) = &self.headers {
            write_table(buf, headers)?;
        }
        if let Some(mode) = self.delivery_mode {
            buf.push(mode);
        }
        if let Some(priority) = self.priority {
            buf.push(priority);
        }
        short(buf, &self.correlation_id)?;
        short(buf, &self.reply_to)?;
        short(buf, &self.expiration)?;
        short(buf, &self.message_id)?;
        if let Some(ts) = self.timestamp {
            buf.extend_from_slice(&ts.to_be_bytes());
        }
        short(buf, &self.kind)?;
        short(buf, &self.user_id)?;
        short(buf, &self.app_id)?;
        Ok(buf.len() - start)
    }

    /// Reads a flag word and the properties it announces.
    ///
    /// Returns the properties and the number of bytes consumed.
    pub fn decode(buf: &[u8], offset: usize) -> Result<(Self, usize), ProtocolError> {
        let flags = read_u16(buf, offset)?;
        let mut i = offset + 2;
        let mut props = BasicProperties::default();

        let short = |i: &mut usize, bit: u16| -> Result<Option<String>, ProtocolError> {
            if flags & bit == 0 {
                return Ok(None);
            }
            let (s, len) = read_short_string(buf, *i)?;
            *i += len;
            Ok(Some(s))
        };

        props.content_type = short(&mut i, CONTENT_TYPE)?;
        props.content_encoding = short(&mut i, CONTENT_ENCODING)?;
        if flags & HEADERS != 0 {
            let (t, len) = read_table(buf, i)?;
            i += len;
            props.headers = Some(t);
        }
        if flags & DELIVERY_MODE != 0 {
            props.delivery_mode = Some(read_u8(buf, i)?);
            i += 1;
        }
        if flags & PRIORITY != 0 {
            props.priority = Some(read_u8(buf, i)?);
            i += 1;
        }
        props.correlation_id = short(&mut i, CORRELATION_ID)?;
        props.reply_to = short(&mut i, REPLY_TO)?;
        props.expiration = short(&mut i, EXPIRATION)?;
        props.message_id = short(&mut i, MESSAGE_ID)?;
        if flags & TIMESTAMP != 0 {
            props.timestamp = Some(read_u64(buf, i)?);
            i += 8;
        }
        props.kind = short(&mut i, TYPE)?;
        props.user_id = short(&mut i, USER_ID)?;
        props.app_id = short(&mut i, APP_ID)?;

        Ok((props, i - offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::field::FieldValue;

    #[test]
    fn test_empty_properties_encode_as_zero_flags_only() {
        let mut buf = Vec::new();
        let written = BasicProperties::default().encode(&mut buf).unwrap();
        assert_eq!(written, 2);
        assert_eq!(buf, vec![0, 0]);
    }

    #[test]
    fn test_delivery_mode_and_priority_set_their_bits() {
        // Arrange
        let props = BasicProperties {
            delivery_mode: Some(2),
            priority: Some(5),
            ..Default::default()
        };

        // Act
        let mut buf = Vec::new();
        props.encode(&mut buf).unwrap();

        // Assert
        assert_eq!(props.flags(), 0x1800);
        assert_eq!(buf, vec![0x18, 0x00, 2, 5]);
    }

    #[test]
    fn test_full_properties_round_trip() {
        // Arrange
        let mut headers = FieldTable::new();
        headers.insert("x-retry".to_string(), FieldValue::I32(3));
        let props = BasicProperties {
            content_type: Some("application/json".into()),
            content_encoding: Some("utf-8".into()),
            headers: Some(headers),
            delivery_mode: Some(2),
            priority: Some(9),
            correlation_id: Some("c-1".into()),
            reply_to: Some("amq.rabbitmq.reply-to".into()),
            expiration: Some("60000".into()),
            message_id: Some("m-1".into()),
            timestamp: Some(1_700_000_000),
            kind: Some("order.created".into()),
            user_id: Some("guest".into()),
            app_id: Some("billing".into()),
        };

        // Act
        let mut buf = Vec::new();
        let written = props.encode(&mut buf).unwrap();
        let (decoded, consumed) = BasicProperties::decode(&buf, 0).unwrap();

        // Assert
        assert_eq!(props.flags(), 0xFFF8);
        assert_eq!(consumed, written);
        assert_eq!(decoded, props);
    }

    #[test]
    fn test_decode_reads_only_flagged_fields_in_order() {
        // Arrange: content_type and app_id only
        let mut buf = vec![0x80, 0x08];
        write_short_string(&mut buf, "text/plain").unwrap();
        write_short_string(&mut buf, "svc").unwrap();

        // Act
        let (props, consumed) = BasicProperties::decode(&buf, 0).unwrap();

        // Assert
        assert_eq!(consumed, buf.len());
        assert_eq!(props.content_type.as_deref(), Some("text/plain"));
        assert_eq!(props.app_id.as_deref(), Some("svc"));
        assert!(props.headers.is_none());
    }

    #[test]
    fn test_over_long_property_is_rejected() {
        let props = BasicProperties {
            message_id: Some("m".repeat(300)),
            ..Default::default()
        };
        let mut buf = Vec::new();
        assert_eq!(
            props.encode(&mut buf),
            Err(ProtocolError::ShortStringTooLong(300))
        );
    }
}
