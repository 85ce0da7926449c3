//! Events reported by a connection, in the order they happen.

use crate::error::Error;
use crate::protocol::{CloseFrame, Frame, PingFrame, PongFrame};

/// Something the application should know about.
///
/// Every connection delivers its events through one ordered channel. Each
/// connection that leaves the open state reports exactly one
/// [`Event::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A frame was decoded, before it is validated or dispatched.
    DataFrameReceived(Frame),
    /// A complete text message.
    TextMessage(String),
    /// A complete binary message.
    BinaryMessage(Vec<u8>),
    /// The server sent a ping.
    PingReceived(PingFrame),
    /// The server sent a pong.
    PongReceived(PongFrame),
    /// The connection closed. `Some` carries the server's close frame,
    /// `None` means the transport ended or was torn down without one.
    Closed(Option<CloseFrame>),
    /// A protocol or transport error. Protocol errors are followed by a
    /// close frame sent to the server.
    Errored(Error),
}

impl Event {
    /// Short name, used in log lines.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Event::DataFrameReceived(_) => "DataFrameReceived",
            Event::TextMessage(_) => "TextMessage",
            Event::BinaryMessage(_) => "BinaryMessage",
            Event::PingReceived(_) => "PingReceived",
            Event::PongReceived(_) => "PongReceived",
            Event::Closed(_) => "Closed",
            Event::Errored(_) => "Errored",
        }
    }

    /// True for events that carry a complete data message.
    #[must_use]
    pub fn is_message(&self) -> bool {
        matches!(self, Event::TextMessage(_) | Event::BinaryMessage(_))
    }
}
