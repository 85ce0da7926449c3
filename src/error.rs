//! Error types for the WebSocket client.
//!
//! Every failure belongs to one of three kinds (see [`ErrorKind`]):
//! handshake failures are fatal to the connection attempt, protocol
//! violations trigger a graceful close, and transport failures tear the
//! connection down immediately.

use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionState;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The opening handshake failed or timed out.
    Handshake,
    /// A received frame or frame sequence broke the framing rules.
    Protocol,
    /// The underlying byte stream failed or ended.
    Transport,
}

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Malformed handshake response or a missing/mismatched header.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// The server did not complete the handshake in time.
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The handshake response exceeded the configured size.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Generic framing or fragmentation violation.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Non-zero RSV bits without a negotiated extension.
    #[error("Non-zero rsv: {0}")]
    ReservedBitsSet(u8),

    /// Opcode in the reserved ranges 0x3-0x7 or 0xB-0xF.
    #[error("Undefined opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// A server sent a masked frame.
    #[error("A server must not mask any frames that it sends to the client")]
    MaskedServerFrame,

    /// The declared payload length could not be represented.
    #[error("Could not determine payload length")]
    UndeterminedPayloadLength,

    /// Control frame with FIN=0.
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload above 125 bytes.
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared frame payload size.
        size: u64,
        /// Maximum allowed size.
        max: usize,
    },

    /// Reassembled message exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Accumulated message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Invalid UTF-8 in a text message.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Incomplete frame data in a complete-buffer decode.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// The operation is not allowed in the current connection state.
    #[error("Operation not allowed in state {0}")]
    InvalidState(ConnectionState),

    /// Close code that must not appear in a close frame.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// The peer closed the byte stream.
    #[error("Connection closed by peer")]
    ConnectionClosed,
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidHandshake(_)
            | Error::HandshakeTimeout(_)
            | Error::HandshakeTooLarge { .. } => ErrorKind::Handshake,
            Error::Io(_) | Error::ConnectionClosed => ErrorKind::Transport,
            _ => ErrorKind::Protocol,
        }
    }

    /// Close code the engine sends when this error is raised by a received
    /// frame. `None` for errors that do not start a close handshake.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Error::ProtocolViolation(_)
            | Error::ReservedBitsSet(_)
            | Error::ReservedOpcode(_)
            | Error::MaskedServerFrame
            | Error::UndeterminedPayloadLength
            | Error::FragmentedControlFrame
            | Error::ControlFrameTooLarge(_) => Some(1002),
            Error::FrameTooLarge { .. } | Error::MessageTooLarge { .. } => Some(1009),
            Error::InvalidUtf8 => Some(1007),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::Io(err.to_string()),
        }
    }
}
