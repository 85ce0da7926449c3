//! The client protocol state machine, independent of any I/O model.
//!
//! [`Engine`] consumes bytes read from the transport and produces
//! [`Event`]s plus a queue of [`Outgoing`] byte runs to write. The drivers
//! in [`crate::client`] and [`crate::blocking`] only move bytes and enforce
//! timeouts; every protocol decision is made here.
//!
//! ## Lifecycle
//!
//! 1. [`Engine::start_handshake`] queues the upgrade request.
//! 2. [`Engine::feed`] accumulates the response, validates it and moves to
//!    `Open`. Bytes after the response head are parsed as frames.
//! 3. Sends queue masked frames; received frames are validated and
//!    dispatched by opcode.
//! 4. A close frame in either direction moves to `Closing`. Once both
//!    sides' close frames are exchanged and ours is flushed
//!    ([`Engine::outbound_flushed`]) the state is `Closed`.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use log::{debug, trace, warn};

use crate::config::Config;
use crate::connection::ConnectionState;
use crate::connection::fragmenter::MessageFragmenter;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;
use crate::protocol::handshake::find_header_end;
use crate::protocol::{
    CloseCode, CloseFrame, Frame, FrameReassembler, FrameValidator, HandshakeKey,
    HandshakeRequest, HandshakeResponse, Message, MessageAssembler, OpCode, PingFrame,
    PongFrame,
};

/// Bytes of one send operation.
///
/// Drivers write every chunk of an `Outgoing` before starting the next one,
/// so a frame, or the frames of one fragmented message, are never
/// interleaved with another send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    chunks: Vec<Bytes>,
}

impl Outgoing {
    fn single(bytes: Vec<u8>) -> Self {
        Self {
            chunks: vec![Bytes::from(bytes)],
        }
    }

    /// Chunks to write, in order.
    #[must_use]
    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Total length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    /// Whether there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All chunks joined.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.chunks.concat()
    }
}

/// Sans-I/O WebSocket client connection.
#[derive(Debug)]
pub struct Engine {
    id: u64,
    config: Config,
    state: ConnectionState,
    request: HandshakeRequest,
    key: HandshakeKey,
    handshake_buf: Vec<u8>,
    response: Option<HandshakeResponse>,
    reassembler: FrameReassembler,
    assembler: MessageAssembler,
    validator: FrameValidator,
    outbound: VecDeque<Outgoing>,
    sent_close: bool,
    received_close: bool,
    closed_by_server: bool,
    handshake_started: bool,
    // A protocol error was raised: data frames are dropped from then on.
    discard_data: bool,
    // The byte stream can no longer be split into frames.
    framing_broken: bool,
}

impl Engine {
    /// Create an engine for one connection attempt with a fresh random key.
    pub fn new(id: u64, request: HandshakeRequest, config: Config) -> Self {
        Self::with_key(id, request, HandshakeKey::generate(), config)
    }

    /// Create an engine that sends a fixed handshake key.
    pub fn with_key(id: u64, request: HandshakeRequest, key: HandshakeKey, config: Config) -> Self {
        let reassembler = FrameReassembler::new(config.limits.max_frame_size);
        let assembler = MessageAssembler::new(&config.limits, config.text_decoding);
        let validator = FrameValidator::new(config.limits.clone())
            .with_strict_control_frames(config.strict_control_frames);
        Self {
            id,
            config,
            state: ConnectionState::Connecting,
            request,
            key,
            handshake_buf: Vec::new(),
            response: None,
            reassembler,
            assembler,
            validator,
            outbound: VecDeque::new(),
            sent_close: false,
            received_close: false,
            closed_by_server: false,
            handshake_started: false,
            discard_data: false,
            framing_broken: false,
        }
    }

    /// Connection id, used in every log line.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The configuration this engine was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The key sent with the upgrade request.
    pub fn handshake_key(&self) -> &HandshakeKey {
        &self.key
    }

    /// Whether the server's handshake response was accepted.
    pub fn handshake_finished(&self) -> bool {
        self.response.is_some()
    }

    /// Status code of the handshake response, once one was parsed.
    pub fn response_status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    /// Handshake response headers keyed by lowercase name.
    pub fn response_headers(&self) -> Option<&HashMap<String, String>> {
        self.response.as_ref().map(|r| &r.headers)
    }

    /// Whether a close frame was queued for sending.
    pub fn has_sent_close(&self) -> bool {
        self.sent_close
    }

    /// Whether the server's close frame arrived.
    pub fn has_received_close(&self) -> bool {
        self.received_close
    }

    /// Whether the server ended the byte stream.
    pub fn closed_by_server(&self) -> bool {
        self.closed_by_server
    }

    /// Queue the opening handshake request.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidState` unless the engine is `Connecting` and has not
    ///   started yet
    /// - `Error::InvalidHandshake` if a request header is malformed
    pub fn start_handshake(&mut self) -> Result<()> {
        if self.state != ConnectionState::Connecting || self.handshake_started {
            return Err(Error::InvalidState(self.state));
        }
        let bytes = self.request.to_bytes(&self.key)?;
        debug!(
            "ws[{}] sending handshake GET {} to {}",
            self.id, self.request.path, self.request.host
        );
        self.outbound.push_back(Outgoing::single(bytes));
        self.handshake_started = true;
        Ok(())
    }

    /// Process bytes read from the transport.
    ///
    /// While connecting, the bytes are the handshake response; anything past
    /// its end is parsed as frames. Protocol errors in received frames are
    /// reported as [`Event::Errored`] and answered with a close frame.
    ///
    /// # Errors
    ///
    /// Handshake failures only (`InvalidHandshake`, `HandshakeTooLarge`).
    /// The engine is `Closed` afterwards.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        match self.state {
            ConnectionState::Connecting => {
                if let Some(leftover) = self.feed_handshake(bytes)? {
                    if !leftover.is_empty() {
                        self.receive_frames(&leftover, &mut events);
                    }
                }
            }
            ConnectionState::Open | ConnectionState::Closing => {
                self.receive_frames(bytes, &mut events);
            }
            ConnectionState::Closed => {
                trace!("ws[{}] ignoring {} bytes after close", self.id, bytes.len());
            }
        }
        Ok(events)
    }

    /// Process one frame read by a driver that splits frames itself.
    pub fn feed_frame(&mut self, frame: Frame) -> Vec<Event> {
        let mut events = Vec::new();
        if self.state.can_receive() && !self.framing_broken {
            self.receive_frame(frame, &mut events);
        }
        events
    }

    /// Report an error that left the incoming byte stream unparseable,
    /// such as a frame above the size limit. Answered like any protocol
    /// error; later bytes are ignored.
    pub fn framing_error(&mut self, err: Error) -> Vec<Event> {
        let mut events = Vec::new();
        if self.state.can_receive() && !self.framing_broken {
            self.framing_broken = true;
            self.protocol_error(err, &mut events);
        }
        events
    }

    /// Record that the transport ended (`Error::ConnectionClosed`) or failed.
    pub fn transport_closed(&mut self, err: Error) -> Vec<Event> {
        let mut events = Vec::new();
        if self.state == ConnectionState::Closed {
            return events;
        }

        match err {
            Error::ConnectionClosed => {
                debug!("ws[{}] server closed the connection", self.id);
                self.closed_by_server = true;
            }
            err => {
                warn!("ws[{}] transport failure: {}", self.id, err);
                events.push(Event::Errored(err));
            }
        }

        let was_connecting = self.state == ConnectionState::Connecting;
        self.outbound.clear();
        self.set_state(ConnectionState::Closed);
        if !self.received_close && !was_connecting {
            events.push(Event::Closed(None));
        }
        events
    }

    /// Tear the connection down without waiting for the close handshake.
    ///
    /// Used when the close timeout elapses or the application disconnects.
    pub fn force_close(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        if self.state == ConnectionState::Closed {
            return events;
        }
        if self.state != ConnectionState::Connecting {
            warn!("ws[{}] disconnecting in state {}", self.id, self.state);
            if !self.received_close {
                events.push(Event::Closed(None));
            }
        }
        self.outbound.clear();
        self.set_state(ConnectionState::Closed);
        events
    }

    /// Next byte run to write, if any.
    pub fn poll_outbound(&mut self) -> Option<Outgoing> {
        self.outbound.pop_front()
    }

    /// Whether writes are pending.
    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Tell the engine every polled write reached the transport.
    ///
    /// Completes the close handshake once both close frames are exchanged.
    pub fn outbound_flushed(&mut self) {
        self.maybe_finish_close();
    }

    /// Send a text message, fragmented per [`Config::fragment_size`].
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` unless `Open`; `Error::MessageTooLarge` above
    /// `limits.max_message_size`.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        match self.config.fragment_size {
            Some(size) => self.send_text_fragmented(text, size),
            None => self.send_text_fragmented(text, usize::MAX),
        }
    }

    /// Send a text message in fragments of at most `per_size` characters.
    ///
    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub fn send_text_fragmented(&mut self, text: &str, per_size: usize) -> Result<()> {
        self.check_can_send()?;
        self.config.limits.check_message_size(text.len())?;
        let frames = MessageFragmenter::text(text, per_size).collect();
        self.queue_frames(frames);
        Ok(())
    }

    /// Send a binary message, fragmented per [`Config::fragment_size`].
    ///
    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        match self.config.fragment_size {
            Some(size) => self.send_binary_fragmented(data, size),
            None => self.send_binary_fragmented(data, usize::MAX),
        }
    }

    /// Send a binary message in fragments of at most `per_size` bytes.
    ///
    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub fn send_binary_fragmented(&mut self, data: &[u8], per_size: usize) -> Result<()> {
        self.check_can_send()?;
        self.config.limits.check_message_size(data.len())?;
        let frames = MessageFragmenter::binary(data, per_size).collect();
        self.queue_frames(frames);
        Ok(())
    }

    /// Send a pre-built frame as is, optionally written in chops of
    /// `chop_size` bytes.
    ///
    /// The frame is not masked unless it was built masked.
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` when `Connecting` or `Closed`.
    pub fn send_frame(&mut self, frame: Frame, chop_size: Option<usize>) -> Result<()> {
        self.check_transport_open()?;
        trace!("ws[{}] >> {}", self.id, frame);
        let bytes = Bytes::from(frame.encode());
        let chunks = match chop_size {
            Some(size) if size > 0 && size < bytes.len() => (0..bytes.len())
                .step_by(size)
                .map(|start| bytes.slice(start..(start + size).min(bytes.len())))
                .collect(),
            _ => vec![bytes],
        };
        self.outbound.push_back(Outgoing { chunks });
        if frame.opcode == OpCode::Close {
            self.mark_close_sent();
        }
        Ok(())
    }

    /// Send arbitrary bytes verbatim.
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` when `Connecting` or `Closed`.
    pub fn send_raw(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.check_transport_open()?;
        trace!("ws[{}] >> {} raw bytes", self.id, bytes.len());
        self.outbound.push_back(Outgoing::single(bytes));
        Ok(())
    }

    /// Send a ping.
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` unless `Open`; `Error::ControlFrameTooLarge`
    /// for payloads above 125 bytes.
    pub fn ping(&mut self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.check_can_send()?;
        let frame = PingFrame::new(data).to_frame();
        check_control_payload(&frame)?;
        self.queue_frames(vec![frame]);
        Ok(())
    }

    /// Send an unsolicited pong.
    ///
    /// # Errors
    ///
    /// See [`ping`](Self::ping).
    pub fn pong(&mut self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.check_can_send()?;
        let frame = PongFrame::new(data).to_frame();
        check_control_payload(&frame)?;
        self.queue_frames(vec![frame]);
        Ok(())
    }

    /// Start the close handshake. Does nothing if a close was already sent.
    ///
    /// [`CloseCode::NoStatus`] sends a close frame without a body.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidState` when `Connecting` or `Closed`
    /// - `Error::InvalidCloseCode` for the reserved codes 1004, 1006 and 1015
    /// - `Error::ControlFrameTooLarge` if the reason does not fit a control frame
    pub fn close(&mut self, code: CloseCode, reason: impl Into<Vec<u8>>) -> Result<()> {
        self.check_transport_open()?;
        if self.sent_close {
            return Ok(());
        }
        if code.is_reserved() && code != CloseCode::NoStatus {
            return Err(Error::InvalidCloseCode(code.as_u16()));
        }
        let frame = CloseFrame::new(code, reason).to_frame();
        check_control_payload(&frame)?;
        debug!("ws[{}] sending close {}", self.id, code.as_u16());
        self.queue_frames(vec![frame]);
        self.mark_close_sent();
        Ok(())
    }

    fn check_can_send(&self) -> Result<()> {
        if self.state.can_send() {
            Ok(())
        } else {
            Err(Error::InvalidState(self.state))
        }
    }

    fn check_transport_open(&self) -> Result<()> {
        match self.state {
            ConnectionState::Open | ConnectionState::Closing => Ok(()),
            state => Err(Error::InvalidState(state)),
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!("ws[{}] refusing transition {} -> {}", self.id, self.state, next);
            return;
        }
        debug!("ws[{}] state {} -> {}", self.id, self.state, next);
        self.state = next;
    }

    // Every frame a client sends is masked with a fresh key.
    fn queue_frames(&mut self, frames: Vec<Frame>) {
        let chunks = frames
            .into_iter()
            .map(|frame| {
                let frame = frame.masked();
                trace!("ws[{}] >> {}", self.id, frame);
                Bytes::from(frame.encode())
            })
            .collect();
        self.outbound.push_back(Outgoing { chunks });
    }

    fn mark_close_sent(&mut self) {
        self.sent_close = true;
        if self.state == ConnectionState::Open {
            self.set_state(ConnectionState::Closing);
        }
    }

    fn maybe_finish_close(&mut self) {
        if self.sent_close && self.received_close && self.outbound.is_empty() {
            self.set_state(ConnectionState::Closed);
        }
    }

    /// Accumulate handshake response bytes without parsing frames.
    ///
    /// Returns `Some(leftover)` once the response is accepted, where
    /// `leftover` holds the bytes that followed the response head (possibly
    /// empty). Used by drivers that read frames themselves.
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` unless `Connecting`, otherwise as [`feed`](Self::feed).
    pub fn feed_handshake(&mut self, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.state != ConnectionState::Connecting {
            return Err(Error::InvalidState(self.state));
        }
        self.handshake_buf.extend_from_slice(bytes);
        let max = self.config.limits.max_handshake_size;

        let Some(end) = find_header_end(&self.handshake_buf) else {
            if let Err(err) = self.config.limits.check_handshake_size(self.handshake_buf.len()) {
                return Err(self.fail_handshake(err));
            }
            return Ok(None);
        };

        let response = match HandshakeResponse::parse_with_limit(&self.handshake_buf[..end], max)
            .and_then(|response| response.validate(&self.key).map(|()| response))
        {
            Ok(response) => response,
            Err(err) => return Err(self.fail_handshake(err)),
        };

        let leftover = self.handshake_buf.split_off(end);
        self.handshake_buf = Vec::new();
        debug!(
            "ws[{}] handshake accepted with status {} protocol={:?} extensions={:?}",
            self.id,
            response.status,
            response.protocol(),
            response.extensions()
        );
        self.response = Some(response);
        self.set_state(ConnectionState::Open);
        Ok(Some(leftover))
    }

    fn fail_handshake(&mut self, err: Error) -> Error {
        warn!("ws[{}] handshake failed: {}", self.id, err);
        self.handshake_buf.clear();
        self.outbound.clear();
        self.set_state(ConnectionState::Closed);
        err
    }

    fn receive_frames(&mut self, bytes: &[u8], events: &mut Vec<Event>) {
        if self.framing_broken {
            trace!("ws[{}] dropping {} bytes after framing error", self.id, bytes.len());
            return;
        }
        match self.reassembler.feed(bytes) {
            Ok(frames) => {
                for frame in frames {
                    self.receive_frame(frame, events);
                    if self.framing_broken {
                        break;
                    }
                }
            }
            Err(err) => events.extend(self.framing_error(err)),
        }
    }

    fn receive_frame(&mut self, frame: Frame, events: &mut Vec<Event>) {
        trace!("ws[{}] << {}", self.id, frame);
        if self.received_close {
            trace!("ws[{}] ignoring frame after close", self.id);
            return;
        }
        events.push(Event::DataFrameReceived(frame.clone()));

        // Without a length the payload cannot be skipped, so nothing after
        // this header can be delimited.
        if frame.payload_len().is_none() {
            events.extend(self.framing_error(Error::UndeterminedPayloadLength));
            return;
        }

        if let Err(err) = self.validator.validate(&frame) {
            self.protocol_error(err, events);
            return;
        }

        match frame.opcode {
            OpCode::Close => self.receive_close(&frame, events),
            OpCode::Ping => {
                let ping = PingFrame::from_frame(&frame);
                if self.config.auto_pong && self.state == ConnectionState::Open {
                    self.queue_frames(vec![ping.to_pong().to_frame()]);
                }
                events.push(Event::PingReceived(ping));
            }
            OpCode::Pong => events.push(Event::PongReceived(PongFrame::from_frame(&frame))),
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                if self.discard_data {
                    return;
                }
                match self.assembler.push(frame) {
                    Ok(Some(Message::Text(text))) => events.push(Event::TextMessage(text)),
                    Ok(Some(Message::Binary(data))) => events.push(Event::BinaryMessage(data)),
                    Ok(None) => {}
                    Err(err) => {
                        self.assembler.reset();
                        self.protocol_error(err, events);
                    }
                }
            }
            OpCode::Reserved(value) => self.protocol_error(Error::ReservedOpcode(value), events),
        }
    }

    fn receive_close(&mut self, frame: &Frame, events: &mut Vec<Event>) {
        let close = CloseFrame::from_frame(frame);
        debug!(
            "ws[{}] close received: code={} reason={:?}",
            self.id,
            close.code.as_u16(),
            close.reason_text()
        );
        self.received_close = true;
        if self.state == ConnectionState::Open {
            self.set_state(ConnectionState::Closing);
        }

        if self.config.echo_close && !self.sent_close {
            debug!("ws[{}] echoing close {}", self.id, close.code.as_u16());
            self.queue_frames(vec![close.to_frame()]);
            self.sent_close = true;
        }
        events.push(Event::Closed(Some(close)));
        self.maybe_finish_close();
    }

    fn protocol_error(&mut self, err: Error, events: &mut Vec<Event>) {
        warn!("ws[{}] protocol error: {}", self.id, err);
        self.discard_data = true;
        let code = CloseCode::from_u16(err.close_code().unwrap_or(1002));
        let reason = truncate_reason(&err.to_string());
        events.push(Event::Errored(err));

        if !self.sent_close {
            self.queue_frames(vec![CloseFrame::new(code, reason).to_frame()]);
            self.mark_close_sent();
        }
    }
}

fn check_control_payload(frame: &Frame) -> Result<()> {
    let len = frame.application_data().len();
    if len > MAX_CONTROL_FRAME_PAYLOAD {
        return Err(Error::ControlFrameTooLarge(len));
    }
    Ok(())
}

// Close reason must fit in a control frame next to the 2-byte code.
fn truncate_reason(reason: &str) -> String {
    const MAX_REASON: usize = MAX_CONTROL_FRAME_PAYLOAD - 2;
    if reason.len() <= MAX_REASON {
        return reason.to_string();
    }
    let mut end = MAX_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}
