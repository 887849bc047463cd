//! Rebuilds whole frames from arbitrarily fragmented transport chunks.
//!
//! # How it works (for beginners)
//!
//! A stream transport gives no guarantee that one read returns one frame.
//! A read may end in the middle of a 7-byte header, in the middle of a
//! payload, just before the end marker, or contain several frames back to
//! back.  The reassembler keeps at most one partial frame:
//!
//! - `frame_size == 0` and the buffer is empty: between frames.  If the
//!   chunk holds a whole header, the header is read straight from the chunk;
//!   if it also holds the whole frame, the frame is handed to the caller
//!   without being copied.
//! - `frame_size == 0` and the buffer is non-empty: a partial header is
//!   buffered; bytes are appended until the 7 header bytes are present.
//! - `frame_size != 0`: a frame of `frame_size` bytes (header + payload +
//!   end marker) is being assembled in the buffer.  Once the buffer holds
//!   exactly that many bytes the frame is parsed and emitted, and the state
//!   returns to "between frames".

use tracing::{error, trace};

use crate::protocol::codec::ProtocolError;
use crate::protocol::frame::{
    parse_frame, read_frame_header, FrameView, DEFAULT_FRAME_MAX, FRAME_HEADER_SIZE,
    FRAME_OVERHEAD,
};

/// Incremental frame parser.  Feed it chunks with [`FrameReassembler::push`].
#[derive(Debug)]
pub struct FrameReassembler {
    /// Partial frame bytes; `buffer.len()` is the write cursor.
    buffer: Vec<u8>,
    /// Total bytes of the frame in progress, 0 between frames.
    frame_size: usize,
    /// Largest accepted frame (header + payload + end marker), 0 = unlimited.
    max_frame_size: usize,
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_MAX as usize)
    }
}

impl FrameReassembler {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            frame_size: 0,
            max_frame_size,
        }
    }

    /// Applies a newly negotiated frame limit.  0 removes the limit.
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
        if max_frame_size > self.buffer.capacity() {
            self.buffer.reserve(max_frame_size - self.buffer.len());
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Number of bytes of an incomplete frame currently held.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty() && self.frame_size == 0
    }

    /// Drops any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.frame_size = 0;
    }

    /// Consumes one chunk, calling `on_frame` for every frame it completes.
    ///
    /// A frame whose end marker is wrong is logged and skipped; parsing
    /// continues with the next frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] when a header announces a
    /// frame above the limit.  The stream cannot be resynchronised after
    /// that, so the partial state is dropped and the caller should close the
    /// connection.
    pub fn push<F>(&mut self, chunk: &[u8], mut on_frame: F) -> Result<(), ProtocolError>
    where
        F: FnMut(FrameView<'_>),
    {
        self.push_with_limits(chunk, |frame| {
            on_frame(frame);
            None
        })
    }

    /// Like [`FrameReassembler::push`], but the callback may return a new
    /// frame limit.  The limit applies from the very next frame, including
    /// frames later in the same chunk.
    ///
    /// # Errors
    ///
    /// Same as [`FrameReassembler::push`].
    pub fn push_with_limits<F>(&mut self, chunk: &[u8], mut on_frame: F) -> Result<(), ProtocolError>
    where
        F: FnMut(FrameView<'_>) -> Option<usize>,
    {
        let mut pos = 0;
        while pos < chunk.len() {
            if !self.is_idle() {
                if self.frame_size == 0 {
                    let want = FRAME_HEADER_SIZE - self.buffer.len();
                    let n = want.min(chunk.len() - pos);
                    self.buffer.extend_from_slice(&chunk[pos..pos + n]);
                    pos += n;
                    if self.buffer.len() < FRAME_HEADER_SIZE {
                        return Ok(());
                    }
                    let (_, _, size) = read_frame_header(&self.buffer, 0)?;
                    self.frame_size = self.checked_total(size)?;
                }

                let want = self.frame_size - self.buffer.len();
                let n = want.min(chunk.len() - pos);
                self.buffer.extend_from_slice(&chunk[pos..pos + n]);
                pos += n;
                if self.buffer.len() == self.frame_size {
                    let limit = dispatch(&self.buffer, &mut on_frame);
                    self.buffer.clear();
                    self.frame_size = 0;
                    if let Some(max) = limit {
                        self.set_max_frame_size(max);
                    }
                }
                continue;
            }

            let rest = &chunk[pos..];
            if rest.len() < FRAME_HEADER_SIZE {
                trace!(bytes = rest.len(), "buffering partial frame header");
                self.buffer.extend_from_slice(rest);
                return Ok(());
            }

            let (_, _, size) = read_frame_header(rest, 0)?;
            let total = self.checked_total(size)?;
            if rest.len() >= total {
                if let Some(max) = dispatch(&rest[..total], &mut on_frame) {
                    self.set_max_frame_size(max);
                }
                pos += total;
            } else {
                trace!(have = rest.len(), need = total, "buffering partial frame");
                self.frame_size = total;
                self.buffer.extend_from_slice(rest);
                return Ok(());
            }
        }
        Ok(())
    }

    fn checked_total(&mut self, payload_size: u32) -> Result<usize, ProtocolError> {
        let total = payload_size as usize + FRAME_OVERHEAD;
        if self.max_frame_size != 0 && total > self.max_frame_size {
            self.reset();
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max: self.max_frame_size,
            });
        }
        Ok(total)
    }
}

/// Parses one whole frame and hands it to the callback, or logs and skips it.
/// Returns the new frame limit the callback asked for, if any.
fn dispatch<F>(bytes: &[u8], on_frame: &mut F) -> Option<usize>
where
    F: FnMut(FrameView<'_>) -> Option<usize>,
{
    match parse_frame(bytes) {
        Ok((frame, _)) => return on_frame(frame),
        Err(ProtocolError::InvalidFrameEnd {
            found,
            size,
            position,
        }) => {
            error!(found, size, position, "invalid frame end marker, frame skipped");
        }
        Err(e) => {
            error!(error = %e, "frame could not be parsed, skipped");
        }
    }
    None
}
