//! Sequential frame reads from a blocking byte source.
//!
//! A blocking reader can ask for exactly the bytes it needs, so it reads the
//! base header, then the rest of the header, then the payload, one field at
//! a time.

use std::io::Read;

use crate::error::Result;
use crate::protocol::Frame;
use crate::protocol::frame::{FrameHeader, MAX_HEADER_LEN, header_len};

/// Read one frame, blocking until all of its bytes are available.
///
/// # Errors
///
/// - `Error::ConnectionClosed` if the stream ends mid-frame or before a frame
/// - `Error::Io` for other read failures
/// - `Error::FrameTooLarge` if the declared payload exceeds `max_frame_size`
pub fn read_frame<R: Read + ?Sized>(reader: &mut R, max_frame_size: usize) -> Result<Frame> {
    let mut header = [0u8; MAX_HEADER_LEN];
    reader.read_exact(&mut header[..2])?;

    let header_len = header_len(header[1]);
    reader.read_exact(&mut header[2..header_len])?;

    let parsed = FrameHeader::parse(&header[..header_len]);
    let Some(payload_len) = parsed.payload_len else {
        return Ok(Frame::undetermined(&parsed));
    };
    if payload_len > max_frame_size {
        return Err(crate::Error::FrameTooLarge {
            size: payload_len as u64,
            max: max_frame_size,
        });
    }

    let mut buf = Vec::with_capacity(header_len + payload_len);
    buf.extend_from_slice(&header[..header_len]);
    buf.resize(header_len + payload_len, 0);
    reader.read_exact(&mut buf[header_len..])?;
    Frame::decode(&buf)
}
