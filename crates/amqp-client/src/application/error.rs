//! Client error type.
//!
//! A single `ClientError` value is often delivered to many waiters at once
//! (every pending call on every channel when the connection closes), so the
//! type is `Clone`.

use amqp_wire::ProtocolError;
use thiserror::Error;

/// Everything a connection, channel or consumer operation can fail with.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClientError {
    /// The broker (or the client itself) closed the connection.
    #[error("connection closed: {reason} ({code})")]
    ConnectionClosed { code: u16, reason: String },

    /// The channel was closed by the broker or by the client.
    #[error("channel {channel} closed: {reason} ({code})")]
    ChannelClosed {
        channel: u16,
        code: u16,
        reason: String,
    },

    /// The connection has not finished its handshake, or is shutting down.
    #[error("connection is not open")]
    ConnectionNotOpen,

    /// The channel is not open (still opening, closing or released).
    #[error("channel {0} is not open")]
    ChannelNotOpen(u16),

    /// The broker has blocked publishing on this connection.
    #[error("connection blocked by broker: {0}")]
    Blocked(String),

    /// A bounded wait expired.
    #[error("timed out")]
    Timeout,

    /// The consumer was cancelled by the broker.
    #[error("consumer {0} cancelled by the server")]
    ConsumerCancelled(String),

    /// The broker negatively acknowledged a confirmed publish.
    #[error("message {0} rejected by the broker")]
    PublishNacked(u64),

    /// Every channel id up to the negotiated maximum is in use.
    #[error("channel limit of {0} reached")]
    ChannelLimit(u16),

    /// An outgoing frame would exceed the negotiated frame size.
    #[error("frame of {size} bytes exceeds the negotiated frame_max of {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// The broker answered a synchronous call with a different method.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(&'static str),

    /// The underlying byte stream failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Connection parameters were rejected before connecting.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Encoding or decoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ClientError {
    /// True for errors that mean the connection can no longer be used.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionClosed { .. }
                | ClientError::ConnectionNotOpen
                | ClientError::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_closed_message_carries_code_and_reason() {
        let err = ClientError::ConnectionClosed {
            code: 320,
            reason: "CONNECTION_FORCED".into(),
        };
        assert_eq!(err.to_string(), "connection closed: CONNECTION_FORCED (320)");
    }

    #[test]
    fn test_protocol_error_converts_transparently() {
        // Arrange
        let inner = ProtocolError::ShortStringTooLong(300);

        // Act
        let err: ClientError = inner.clone().into();

        // Assert
        assert_eq!(err.to_string(), inner.to_string());
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_clone_is_equal() {
        let err = ClientError::ChannelClosed {
            channel: 3,
            code: 404,
            reason: "NOT_FOUND".into(),
        };
        assert_eq!(err.clone(), err);
    }
}
