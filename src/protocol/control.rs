//! Close, ping and pong views over control frames (RFC 6455 Section 5.5).

use crate::protocol::{Frame, OpCode};

/// WebSocket close status code per RFC 6455 Section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000). The connection successfully completed.
    #[default]
    Normal,
    /// Going away (1001). Endpoint is going away (e.g., server shutdown, browser navigating away).
    GoingAway,
    /// Protocol error (1002). Endpoint received a malformed frame or protocol violation.
    ProtocolError,
    /// Unsupported data (1003). Endpoint received data type it cannot handle.
    UnsupportedData,
    /// No status received (1005). Stands for a close frame without a body;
    /// never written on the wire.
    NoStatus,
    /// Invalid payload (1007). Endpoint received a message with invalid data (e.g., non-UTF-8 in text).
    InvalidPayload,
    /// Policy violation (1008). Endpoint received a message that violates its policy.
    PolicyViolation,
    /// Message too big (1009). Endpoint received a message too large to process.
    MessageTooBig,
    /// Mandatory extension (1010). Client expected server to negotiate an extension.
    MandatoryExtension,
    /// Internal error (1011). Server encountered an unexpected condition.
    InternalError,
    /// Any other code, including application codes 3000-4999.
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatus,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            other => CloseCode::Other(other),
        }
    }

    /// Get the numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => *code,
        }
    }

    /// Check if this close code is reserved and MUST NOT be sent in a Close frame.
    ///
    /// Reserved codes per RFC 6455 Section 7.4.1:
    /// - 1004: Reserved
    /// - 1005: No Status Received (MUST NOT be set by endpoint)
    /// - 1006: Abnormal Closure (MUST NOT be set by endpoint)
    /// - 1015: TLS Handshake (MUST NOT be set by endpoint)
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        let code = self.as_u16();
        matches!(code, 1004..=1006 | 1015)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode::from_u16(code)
    }
}

/// Close frame payload: status code and reason bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The close status code. [`CloseCode::NoStatus`] when the frame had no body.
    pub code: CloseCode,
    /// Reason bytes, normally UTF-8 text.
    pub reason: Vec<u8>,
}

impl CloseFrame {
    /// Create a new close frame with the given code and reason.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Read code and reason from a close frame's application data.
    ///
    /// An empty payload yields code 1005, a single byte is taken as the code
    /// itself, otherwise the first two bytes are the big-endian code and the
    /// rest is the reason.
    #[must_use]
    pub fn from_frame(frame: &Frame) -> Self {
        match frame.application_data() {
            [] => Self::new(CloseCode::NoStatus, Vec::new()),
            [code] => Self::new(CloseCode::from_u16(u16::from(*code)), Vec::new()),
            [hi, lo, reason @ ..] => {
                Self::new(CloseCode::from_u16(u16::from_be_bytes([*hi, *lo])), reason)
            }
        }
    }

    /// Build the close frame to send. [`CloseCode::NoStatus`] produces an
    /// empty body; any other code is written as 2 big-endian bytes followed
    /// by the reason.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        let payload = if self.code == CloseCode::NoStatus {
            Vec::new()
        } else {
            let mut data = self.code.as_u16().to_be_bytes().to_vec();
            data.extend_from_slice(&self.reason);
            data
        };
        Frame::new(true, OpCode::Close, payload)
    }

    /// Reason decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn reason_text(&self) -> String {
        String::from_utf8_lossy(&self.reason).into_owned()
    }
}

/// Ping frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingFrame {
    /// Opaque application data.
    pub data: Vec<u8>,
}

impl PingFrame {
    /// Create a ping with the given payload.
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// View a ping frame.
    #[must_use]
    pub fn from_frame(frame: &Frame) -> Self {
        Self::new(frame.application_data())
    }

    /// Build the ping frame to send.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame::ping(self.data.clone())
    }

    /// The matching pong: identical application data.
    #[must_use]
    pub fn to_pong(&self) -> PongFrame {
        PongFrame::new(self.data.clone())
    }
}

/// Pong frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PongFrame {
    /// Opaque application data.
    pub data: Vec<u8>,
}

impl PongFrame {
    /// Create a pong with the given payload.
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// View a pong frame.
    #[must_use]
    pub fn from_frame(frame: &Frame) -> Self {
        Self::new(frame.application_data())
    }

    /// Build the pong frame to send.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame::pong(self.data.clone())
    }
}
