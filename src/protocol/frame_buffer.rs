//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForLength`: need the 4-byte total length
//! - `WaitingForFrame`: length validated, need the rest of the frame
//!
//! A total length outside `[MIN_FRAME_SIZE, max_frame_size]` means the
//! stream is out of step with the frame boundaries and cannot recover;
//! `push` reports it as [`WireError::Desync`].
//!
//! # Example
//!
//! ```ignore
//! use sso_wire::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the socket
//! for frame in buffer.push(&chunk)? {
//!     let frame = layout.split(frame)?;
//! }
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{peek_length, DEFAULT_MAX_FRAME_SIZE, MIN_FRAME_SIZE};
use crate::error::{Result, WireError};

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForLength,
    WaitingForFrame { total: usize },
}

/// Buffer for accumulating incoming bytes and cutting them into frames.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_frame_size: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame: 16MB.
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom frame size limit.
    pub fn with_max_frame(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForLength,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Each returned `Bytes` is one whole frame, length prefix included.
    /// Partial data stays buffered for the next push.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        match self.state {
            State::WaitingForLength => {
                let Some(total) = peek_length(&self.buffer) else {
                    return Ok(None);
                };
                let total = total as usize;
                if total < MIN_FRAME_SIZE || total > self.max_frame_size {
                    return Err(WireError::Desync(format!(
                        "frame length {} outside [{}, {}]",
                        total, MIN_FRAME_SIZE, self.max_frame_size
                    )));
                }
                self.state = State::WaitingForFrame { total };
                self.try_extract_one()
            }

            State::WaitingForFrame { total } => {
                if self.buffer.len() < total {
                    return Ok(None);
                }
                let frame = self.buffer.split_to(total).freeze();
                self.state = State::WaitingForLength;
                Ok(Some(frame))
            }
        }
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop buffered bytes and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForFrame { .. } => "WaitingForFrame",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
