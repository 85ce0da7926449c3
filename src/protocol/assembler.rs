//! Message reassembly from fragmented data frames (RFC 6455 Section 5.4).

use bytes::BytesMut;

use crate::config::{Limits, TextDecoding};
use crate::error::{Error, Result};
use crate::protocol::{Frame, OpCode};

/// A complete data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message.
    Text(String),
    /// Binary message.
    Binary(Vec<u8>),
}

impl Message {
    /// Opcode of the frame that opened this message.
    #[must_use]
    pub fn opcode(&self) -> OpCode {
        match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Message::Text(text) => text.len(),
            Message::Binary(data) => data.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reassembles fragmented WebSocket messages.
///
/// Continuation frames inherit the type of the frame that opened the
/// sequence. Control frames are never buffered; the caller dispatches them
/// as they arrive.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    text: String,
    opcode: Option<OpCode>,
    fragment_count: usize,
    utf8_checked: usize,
    max_message_size: usize,
    decoding: TextDecoding,
}

impl MessageAssembler {
    /// Create an assembler bounded by `limits.max_message_size`.
    pub fn new(limits: &Limits, decoding: TextDecoding) -> Self {
        Self {
            buffer: BytesMut::new(),
            text: String::new(),
            opcode: None,
            fragment_count: 0,
            utf8_checked: 0,
            max_message_size: limits.max_message_size,
            decoding,
        }
    }

    /// Add a data frame to the message being assembled.
    ///
    /// Returns `Some(message)` once a frame with FIN=1 completes it.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a continuation frame with no open
    ///   message, or a new text/binary frame while one is open
    /// - `Error::MessageTooLarge` when the accumulated size exceeds the limit
    /// - `Error::InvalidUtf8` for invalid text under [`TextDecoding::WholeMessage`]
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        if frame.opcode.is_control() {
            return Ok(None);
        }

        match (frame.opcode, self.opcode) {
            (OpCode::Continuation, None) => {
                return Err(Error::ProtocolViolation(
                    "continuation frame without a message in progress".into(),
                ));
            }
            (OpCode::Continuation, Some(_)) => {}
            (opcode, None) => self.opcode = Some(opcode),
            (_, Some(_)) => {
                return Err(Error::ProtocolViolation(
                    "unexpected opcode inside continuation".into(),
                ));
            }
        }

        let new_size = self.size() + frame.application_data().len();
        if new_size > self.max_message_size {
            return Err(Error::MessageTooLarge {
                size: new_size,
                max: self.max_message_size,
            });
        }

        let fin = frame.fin;
        let data = frame.into_application_data();
        if self.opcode == Some(OpCode::Text) && self.decoding == TextDecoding::PerFragment {
            self.text.push_str(&String::from_utf8_lossy(&data));
        } else {
            self.buffer.extend_from_slice(&data);
            if self.opcode == Some(OpCode::Text) {
                self.check_utf8_prefix()?;
            }
        }
        self.fragment_count += 1;

        if fin { self.finish().map(Some) } else { Ok(None) }
    }

    /// True while a fragmented message is open.
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Number of frames buffered for the open message.
    pub fn fragment_count(&self) -> usize {
        self.fragment_count
    }

    /// Drop any partially assembled message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.text.clear();
        self.opcode = None;
        self.fragment_count = 0;
        self.utf8_checked = 0;
    }

    fn size(&self) -> usize {
        self.buffer.len() + self.text.len()
    }

    // Fail early on bytes that can never become valid UTF-8; an incomplete
    // trailing sequence may still be completed by the next fragment.
    fn check_utf8_prefix(&mut self) -> Result<()> {
        match std::str::from_utf8(&self.buffer[self.utf8_checked..]) {
            Ok(_) => {
                self.utf8_checked = self.buffer.len();
                Ok(())
            }
            Err(e) if e.error_len().is_none() => {
                self.utf8_checked += e.valid_up_to();
                Ok(())
            }
            Err(_) => Err(Error::InvalidUtf8),
        }
    }

    fn finish(&mut self) -> Result<Message> {
        let opcode = self.opcode.take();
        let bytes = self.buffer.split().freeze().to_vec();
        let text = std::mem::take(&mut self.text);
        self.fragment_count = 0;
        self.utf8_checked = 0;

        match opcode {
            Some(OpCode::Text) if self.decoding == TextDecoding::PerFragment => {
                Ok(Message::Text(text))
            }
            Some(OpCode::Text) => String::from_utf8(bytes)
                .map(Message::Text)
                .map_err(|_| Error::InvalidUtf8),
            _ => Ok(Message::Binary(bytes)),
        }
    }
}
