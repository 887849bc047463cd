//! In-memory transport for tests.
//!
//! [`RecordingTransport`] keeps every write so a test can play the broker:
//! read what the client sent, then feed replies through
//! [`crate::Connection::handle_data`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use amqp_wire::protocol::frame::PROTOCOL_HEADER;
use amqp_wire::{decode_method, Frame, FrameReassembler, FrameType, Method};

use crate::application::error::ClientError;
use crate::application::transport::Transport;

/// A [`Transport`] that records writes instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    writes: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
    should_fail: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `send` fail with [`ClientError::Transport`].
    pub fn set_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of `send` calls recorded so far.
    pub fn write_count(&self) -> usize {
        self.writes.lock().expect("lock poisoned").len()
    }

    /// A copy of every recorded write, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().expect("lock poisoned").clone()
    }

    /// Removes and returns every recorded write.
    pub fn take_writes(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.writes.lock().expect("lock poisoned"))
    }

    /// Removes every recorded write and parses it back into frames.
    ///
    /// A write equal to the protocol header is skipped.  Panics on a
    /// malformed stream, which is a test failure anyway.
    pub fn take_frames(&self) -> Vec<Frame> {
        let mut reassembler = FrameReassembler::new(0);
        let mut frames = Vec::new();
        for write in self.take_writes() {
            if write.as_slice() == PROTOCOL_HEADER {
                continue;
            }
            reassembler
                .push(&write, |f| frames.push(f.to_frame()))
                .expect("client wrote a malformed frame");
        }
        assert!(reassembler.is_idle(), "client wrote a partial frame");
        frames
    }

    /// Like [`RecordingTransport::take_frames`] but keeps only method
    /// frames, decoded, with their channel id.
    pub fn take_methods(&self) -> Vec<(u16, Method)> {
        self.take_frames()
            .into_iter()
            .filter(|f| f.frame_type == FrameType::Method as u8)
            .map(|f| {
                let method = decode_method(&f.payload).expect("client wrote an undecodable method");
                (f.channel, method)
            })
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, bytes: &[u8]) -> Result<(), ClientError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("injected failure".to_string()));
        }
        self.writes
            .lock()
            .expect("lock poisoned")
            .push(bytes.to_vec());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amqp_wire::protocol::frame::{write_body_frame, write_method_frame};

    #[test]
    fn test_recording_transport_keeps_writes_in_order() {
        // Arrange
        let transport = RecordingTransport::new();

        // Act
        transport.send(b"one").unwrap();
        transport.send(b"two").unwrap();

        // Assert
        assert_eq!(transport.writes(), vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(transport.write_count(), 2);
    }

    #[test]
    fn test_failing_transport_records_nothing() {
        let transport = RecordingTransport::new();
        transport.set_fail(true);
        assert!(matches!(transport.send(b"x"), Err(ClientError::Transport(_))));
        assert_eq!(transport.write_count(), 0);
    }

    #[test]
    fn test_take_frames_skips_protocol_header_and_splits_batches() {
        // Arrange: one write carrying two frames
        let transport = RecordingTransport::new();
        transport.send(&PROTOCOL_HEADER).unwrap();
        let mut batch = Vec::new();
        write_method_frame(&mut batch, 1, &Method::ChannelOpen).unwrap();
        write_body_frame(&mut batch, 1, b"abc");
        transport.send(&batch).unwrap();

        // Act
        let frames = transport.take_frames();

        // Assert
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].payload, b"abc");
        assert_eq!(transport.write_count(), 0);
    }

    #[test]
    fn test_close_is_recorded() {
        let transport = RecordingTransport::new();
        assert!(!transport.is_closed());
        transport.close();
        assert!(transport.is_closed());
    }
}
