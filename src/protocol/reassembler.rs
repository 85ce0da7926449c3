//! Incremental frame reassembly from arbitrarily split byte chunks.
//!
//! The transport may hand over any number of bytes at a time, with chunk
//! boundaries falling anywhere: inside the 2-byte base header, the extended
//! length, the mask key or the payload. [`FrameReassembler`] keeps a single
//! parse position across calls and emits each frame as soon as its last
//! byte arrives. Leftover bytes in the same chunk start the next frame.
//!
//! Parsing happens in two stages:
//!
//! 1. A fixed header buffer of up to [`MAX_HEADER_LEN`] bytes. The target
//!    length starts at 2 and is extended once byte 1 is known.
//! 2. A payload buffer sized exactly `header_len + payload_len`, seeded
//!    with the header bytes and decoded once full.

use bytes::BytesMut;

use crate::error::Result;
use crate::protocol::Frame;
use crate::protocol::frame::{FrameHeader, MAX_HEADER_LEN, header_len};

/// Stateful parser turning byte chunks into [`Frame`]s.
#[derive(Debug, Clone)]
pub struct FrameReassembler {
    header: [u8; MAX_HEADER_LEN],
    header_filled: usize,
    header_target: usize,
    header_known: bool,
    body: Option<BytesMut>,
    body_target: usize,
    max_frame_size: usize,
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl FrameReassembler {
    /// Create a reassembler rejecting frames whose declared payload exceeds
    /// `max_frame_size` bytes.
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            header: [0; MAX_HEADER_LEN],
            header_filled: 0,
            header_target: 2,
            header_known: false,
            body: None,
            body_target: 0,
            max_frame_size,
        }
    }

    /// True when no partial frame is buffered.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.header_filled == 0
    }

    /// Number of bytes of the current partial frame held so far.
    #[must_use]
    pub fn buffered(&self) -> usize {
        match &self.body {
            Some(body) => body.len(),
            None => self.header_filled,
        }
    }

    /// Feed a chunk of bytes, returning every frame it completes.
    ///
    /// An empty result means more bytes are needed; that is ordinary state,
    /// not an error.
    ///
    /// # Errors
    ///
    /// `Error::FrameTooLarge` when a header declares a payload above the
    /// configured maximum. The reassembler must not be reused afterwards.
    pub fn feed(&mut self, mut input: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        while !input.is_empty() {
            if let Some(frame) = self.advance(&mut input)? {
                frames.push(frame);
                *self = Self::new(self.max_frame_size);
            }
        }
        Ok(frames)
    }

    fn advance(&mut self, input: &mut &[u8]) -> Result<Option<Frame>> {
        let Some(body) = self.body.as_mut() else {
            return self.advance_header(input);
        };

        let take = (self.body_target - body.len()).min(input.len());
        body.extend_from_slice(&input[..take]);
        *input = &input[take..];

        if body.len() < self.body_target {
            return Ok(None);
        }
        Frame::decode(body).map(Some)
    }

    fn advance_header(&mut self, input: &mut &[u8]) -> Result<Option<Frame>> {
        let take = (self.header_target - self.header_filled).min(input.len());
        self.header[self.header_filled..self.header_filled + take]
            .copy_from_slice(&input[..take]);
        self.header_filled += take;
        *input = &input[take..];

        if !self.header_known && self.header_filled == 2 {
            self.header_known = true;
            self.header_target = header_len(self.header[1]);
        }
        if self.header_filled < self.header_target {
            return Ok(None);
        }

        let raw_header = &self.header[..self.header_target];
        let header = FrameHeader::parse(raw_header);
        let Some(payload_len) = header.payload_len else {
            return Ok(Some(Frame::undetermined(&header)));
        };
        if payload_len > self.max_frame_size {
            return Err(crate::Error::FrameTooLarge {
                size: payload_len as u64,
                max: self.max_frame_size,
            });
        }
        if payload_len == 0 {
            return Frame::decode(raw_header).map(Some);
        }

        self.body_target = self.header_target + payload_len;
        let mut body = BytesMut::with_capacity(self.body_target);
        body.extend_from_slice(raw_header);
        self.body = Some(body);
        Ok(None)
    }
}

/// Pure-function form of [`FrameReassembler::feed`]: consume `state` and a
/// chunk, return the next state and the completed frames.
///
/// # Errors
///
/// See [`FrameReassembler::feed`].
pub fn reassemble(
    mut state: FrameReassembler,
    bytes: &[u8],
) -> Result<(FrameReassembler, Vec<Frame>)> {
    let frames = state.feed(bytes)?;
    Ok((state, frames))
}
