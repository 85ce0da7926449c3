//! WebSocket frame model and complete-buffer codec (RFC 6455).
//!
//! [`Frame::encode`] and [`Frame::decode`] work on buffers that already hold
//! a whole frame. Partial input is handled by
//! [`FrameReassembler`](crate::protocol::FrameReassembler).

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::{apply_mask_fast, random_mask_key};

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Largest possible header: 2 base bytes, 8 extended length bytes, 4 mask bytes.
pub const MAX_HEADER_LEN: usize = 14;

/// Largest payload length a frame may declare. The most significant bit of
/// the 64-bit length must be zero, and the length must fit in memory.
pub const MAX_PAYLOAD_LEN: u64 = if (usize::MAX as u64) < (i64::MAX as u64) {
    usize::MAX as u64
} else {
    i64::MAX as u64
};

/// Total header length implied by the second header byte.
#[inline]
#[must_use]
pub const fn header_len(byte1: u8) -> usize {
    let extended = match byte1 & 0x7F {
        126 => 2,
        127 => 8,
        _ => 0,
    };
    let mask = if byte1 & 0x80 != 0 { 4 } else { 0 };
    2 + extended + mask
}

/// Decoded header fields. `header` must hold at least `header_len(header[1])` bytes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub fin: bool,
    pub rsv: u8,
    pub opcode: OpCode,
    pub mask_key: Option<[u8; 4]>,
    /// `None` when the declared length cannot be represented.
    pub payload_len: Option<usize>,
    pub header_len: usize,
}

impl FrameHeader {
    pub(crate) fn parse(header: &[u8]) -> Self {
        let byte0 = header[0];
        let byte1 = header[1];
        let masked = byte1 & 0x80 != 0;
        let header_len = header_len(byte1);

        let declared = match byte1 & 0x7F {
            126 => u64::from(u16::from_be_bytes([header[2], header[3]])),
            127 => u64::from_be_bytes([
                header[2], header[3], header[4], header[5], header[6], header[7], header[8],
                header[9],
            ]),
            len => u64::from(len),
        };
        let payload_len = if declared > MAX_PAYLOAD_LEN {
            None
        } else {
            usize::try_from(declared).ok()
        };

        let mask_key = if masked {
            let at = header_len - 4;
            Some([header[at], header[at + 1], header[at + 2], header[at + 3]])
        } else {
            None
        };

        Self {
            fin: byte0 & 0x80 != 0,
            rsv: (byte0 & 0x70) >> 4,
            opcode: OpCode::from_u8(byte0),
            mask_key,
            payload_len,
            header_len,
        }
    }
}

/// A WebSocket frame as defined in RFC 6455.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                    Masking key (if present)                   |
/// +---------------------------------------------------------------+
/// |                          Payload data                         |
/// +---------------------------------------------------------------+
/// ```
///
/// Frames are value objects: builder methods consume the frame and return a
/// new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag. True if this is the last fragment of a message.
    pub fin: bool,
    /// Reserved bits (0..=7). Must be 0 without a negotiated extension.
    pub rsv: u8,
    /// Frame opcode defining the interpretation of payload data.
    pub opcode: OpCode,
    /// Whether the payload is (or will be) masked on the wire.
    pub mask: bool,
    /// Masking key. When encoding a masked frame without a key, a random
    /// key is generated.
    pub mask_key: Option<[u8; 4]>,
    extension_data: Vec<u8>,
    application_data: Vec<u8>,
    payload_len: Option<usize>,
}

impl Frame {
    /// Create an unmasked frame with the given parameters.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, application_data: impl Into<Vec<u8>>) -> Self {
        let application_data = application_data.into();
        Self {
            fin,
            rsv: 0,
            opcode,
            mask: false,
            mask_key: None,
            extension_data: Vec::new(),
            payload_len: Some(application_data.len()),
            application_data,
        }
    }

    /// Create a final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data)
    }

    /// Create a final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data)
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data)
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data)
    }

    /// Mark the frame as masked; a random key is chosen at encode time.
    #[must_use]
    pub fn masked(mut self) -> Self {
        self.mask = true;
        self
    }

    /// Mask the frame with a fixed key.
    #[must_use]
    pub fn with_mask_key(mut self, key: [u8; 4]) -> Self {
        self.mask = true;
        self.mask_key = Some(key);
        self
    }

    /// Set the reserved bits (only the low three bits are kept).
    #[must_use]
    pub fn with_rsv(mut self, rsv: u8) -> Self {
        self.rsv = rsv & 0x07;
        self
    }

    /// Prepend extension data to the payload.
    #[must_use]
    pub fn with_extension_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.extension_data = data.into();
        self.payload_len = Some(self.extension_data.len() + self.application_data.len());
        self
    }

    /// Application data bytes.
    #[inline]
    #[must_use]
    pub fn application_data(&self) -> &[u8] {
        &self.application_data
    }

    /// Extension data bytes. Always empty for decoded frames.
    #[inline]
    #[must_use]
    pub fn extension_data(&self) -> &[u8] {
        &self.extension_data
    }

    /// Payload length, or `None` if it could not be determined while decoding.
    #[inline]
    #[must_use]
    pub fn payload_len(&self) -> Option<usize> {
        self.payload_len
    }

    /// Take ownership of the application data.
    #[must_use]
    pub fn into_application_data(self) -> Vec<u8> {
        self.application_data
    }

    /// Decode a frame from a buffer holding at least one complete frame.
    ///
    /// # Errors
    ///
    /// `Error::IncompleteFrame` if `buf` is shorter than the frame it
    /// describes. Unrepresentable payload lengths are not an error here:
    /// they produce a frame whose [`payload_len`](Self::payload_len) is
    /// `None`, which [`validate`](Self::validate) rejects.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        Self::parse(buf).map(|(frame, _)| frame)
    }

    /// Decode a frame and report the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// `Error::IncompleteFrame` if not enough data is available.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }
        let header_len = header_len(buf[1]);
        if buf.len() < header_len {
            return Err(Error::IncompleteFrame {
                needed: header_len - buf.len(),
            });
        }

        let header = FrameHeader::parse(&buf[..header_len]);
        let Some(payload_len) = header.payload_len else {
            return Ok((Self::undetermined(&header), header_len));
        };

        let total = header_len + payload_len;
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let mut application_data = buf[header_len..total].to_vec();
        if let Some(key) = header.mask_key {
            apply_mask_fast(&mut application_data, key);
        }

        let frame = Self {
            fin: header.fin,
            rsv: header.rsv,
            opcode: header.opcode,
            mask: header.mask_key.is_some(),
            mask_key: header.mask_key,
            extension_data: Vec::new(),
            application_data,
            payload_len: Some(payload_len),
        };
        Ok((frame, total))
    }

    /// Frame whose declared length was unrepresentable: no payload populated.
    pub(crate) fn undetermined(header: &FrameHeader) -> Self {
        Self {
            fin: header.fin,
            rsv: header.rsv,
            opcode: header.opcode,
            mask: header.mask_key.is_some(),
            mask_key: header.mask_key,
            extension_data: Vec::new(),
            application_data: Vec::new(),
            payload_len: None,
        }
    }

    /// Check the rules every frame received from a server must satisfy.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedBitsSet` if `rsv != 0`
    /// - `Error::ReservedOpcode` for opcodes 0x3-0x7 and 0xB-0xF
    /// - `Error::MaskedServerFrame` if the frame is masked
    /// - `Error::UndeterminedPayloadLength` if decoding could not read the length
    pub fn validate(&self) -> Result<()> {
        if self.rsv != 0 {
            return Err(Error::ReservedBitsSet(self.rsv));
        }
        if let OpCode::Reserved(value) = self.opcode {
            return Err(Error::ReservedOpcode(value));
        }
        if self.mask {
            return Err(Error::MaskedServerFrame);
        }
        if self.payload_len.is_none() {
            return Err(Error::UndeterminedPayloadLength);
        }
        Ok(())
    }

    /// Number of bytes [`encode`](Self::encode) produces.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        let payload_len = self.extension_data.len() + self.application_data.len();
        let extended_len_size = if payload_len <= 125 {
            0
        } else if payload_len <= 65535 {
            2
        } else {
            8
        };
        let mask_size = if self.mask { 4 } else { 0 };
        2 + extended_len_size + mask_size + payload_len
    }

    /// Encode the frame to its wire representation.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_size());
        self.encode_into(&mut buf);
        buf
    }

    /// Append the wire representation of the frame to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let payload_len = self.extension_data.len() + self.application_data.len();

        let mut byte0 = ((self.rsv & 0x07) << 4) | self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        buf.push(byte0);

        let mask_bit = if self.mask { 0x80 } else { 0x00 };
        if payload_len <= 125 {
            buf.push(mask_bit | payload_len as u8);
        } else if payload_len <= 65535 {
            buf.push(mask_bit | 126);
            buf.extend_from_slice(&(payload_len as u16).to_be_bytes());
        } else {
            buf.push(mask_bit | 127);
            buf.extend_from_slice(&(payload_len as u64).to_be_bytes());
        }

        let key = self
            .mask
            .then(|| self.mask_key.unwrap_or_else(random_mask_key));
        if let Some(key) = key {
            buf.extend_from_slice(&key);
        }

        let payload_start = buf.len();
        buf.extend_from_slice(&self.extension_data);
        buf.extend_from_slice(&self.application_data);
        if let Some(key) = key {
            apply_mask_fast(&mut buf[payload_start..], key);
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[FIN={}, RSV={}, OPCODE={}, MASK={}, PAYLOAD_LENGTH=",
            self.fin, self.rsv, self.opcode, self.mask
        )?;
        match self.payload_len {
            Some(len) => write!(f, "{len}]"),
            None => write!(f, "?]"),
        }
    }
}
