//! Thread-per-connection client over blocking `std::io` streams.
//!
//! The reader thread pulls one frame at a time off the socket with
//! [`read_frame`](crate::protocol::reader::read_frame), reading the header,
//! then the extended length and mask key, then the payload. Protocol logic
//! is the same [`Engine`] the event-driven client uses.

use std::collections::HashMap;
use std::io::{self, Chain, Cursor, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::config::Config;
use crate::connection::{ConnectionState, Engine};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::protocol::reader::read_frame;
use crate::protocol::{CloseCode, Frame, HandshakeRequest};

/// Receiving side of a connection's event channel.
pub type EventReceiver = mpsc::Receiver<Event>;

/// A byte stream the blocking client can drive.
///
/// The reader thread works on a clone of the stream while sends write to the
/// original, so the stream must support independent handles onto the same
/// connection.
pub trait BlockingTransport: Read + Write + Send + Sized + 'static {
    /// Another handle to the same connection.
    fn try_clone(&self) -> io::Result<Self>;

    /// Bound how long a read may block. `None` blocks forever.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Shut both directions down, waking a blocked reader.
    fn shutdown_both(&self) -> io::Result<()>;
}

impl BlockingTransport for TcpStream {
    fn try_clone(&self) -> io::Result<Self> {
        TcpStream::try_clone(self)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown_both(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

struct Shared<S> {
    id: u64,
    engine: Mutex<Engine>,
    changed: Condvar,
    writer: Mutex<S>,
    events: mpsc::Sender<Event>,
    stopped: AtomicBool,
    close_timeout: Duration,
}

impl<S: BlockingTransport> Shared<S> {
    fn engine(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn writer(&self) -> MutexGuard<'_, S> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_engine<T>(&self, f: impl FnOnce(&mut Engine) -> (T, Vec<Event>)) -> T {
        let mut engine = self.engine();
        let (value, events) = f(&mut engine);
        for event in events {
            trace!("ws[{}] event {}", self.id, event.name());
            let _ = self.events.send(event);
        }
        drop(engine);
        self.changed.notify_all();
        value
    }

    fn state(&self) -> ConnectionState {
        self.engine().state()
    }

    fn flush(&self) -> Result<()> {
        let result = self.write_pending();
        match &result {
            Ok(()) => self.with_engine(|engine| {
                engine.outbound_flushed();
                ((), Vec::new())
            }),
            Err(err) => {
                let err = err.clone();
                self.with_engine(|engine| ((), engine.transport_closed(err)));
            }
        }
        result
    }

    fn write_pending(&self) -> Result<()> {
        let mut writer = self.writer();
        loop {
            let next = self.engine().poll_outbound();
            let Some(outgoing) = next else {
                return Ok(());
            };
            for chunk in outgoing.chunks() {
                writer.write_all(chunk)?;
            }
            writer.flush()?;
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Err(err) = self.writer().shutdown_both() {
            trace!("ws[{}] shutdown: {}", self.id, err);
        }
    }
}

/// Handle to a connection served by its own reader thread.
pub struct BlockingClient<S: BlockingTransport> {
    shared: Arc<Shared<S>>,
    reader: Option<thread::JoinHandle<()>>,
}

impl<S: BlockingTransport> std::fmt::Debug for BlockingClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingClient")
            .field("id", &self.shared.id)
            .finish_non_exhaustive()
    }
}

impl BlockingClient<TcpStream> {
    /// Open a TCP connection to `addr` and perform the handshake on it.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the TCP connection fails, otherwise as
    /// [`connect`](BlockingClient::connect).
    pub fn connect_tcp(
        addr: impl ToSocketAddrs,
        request: HandshakeRequest,
        config: Config,
        id: u64,
    ) -> Result<(Self, EventReceiver)> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Self::connect(stream, request, config, id)
    }
}

impl<S: BlockingTransport> BlockingClient<S> {
    /// Perform the opening handshake on `stream` and start the reader
    /// thread.
    ///
    /// # Errors
    ///
    /// - `Error::HandshakeTimeout` if no valid response arrives in time
    /// - `Error::InvalidHandshake` / `Error::HandshakeTooLarge`
    /// - `Error::Io` if the stream fails or cannot be cloned
    pub fn connect(
        stream: S,
        request: HandshakeRequest,
        config: Config,
        id: u64,
    ) -> Result<(Self, EventReceiver)> {
        let engine = Engine::new(id, request, config);
        Self::connect_engine(stream, engine)
    }

    /// Like [`connect`](Self::connect) with an engine built by the caller.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub fn connect_engine(stream: S, mut engine: Engine) -> Result<(Self, EventReceiver)> {
        let id = engine.id();
        let config = engine.config().clone();
        engine.start_handshake()?;

        let mut reader = stream.try_clone()?;
        let (events_tx, events_rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            id,
            engine: Mutex::new(engine),
            changed: Condvar::new(),
            writer: Mutex::new(stream),
            events: events_tx,
            stopped: AtomicBool::new(false),
            close_timeout: config.timeouts.close,
        });

        let leftover = match shared
            .write_pending()
            .and_then(|()| read_handshake(&shared, &mut reader, &config))
        {
            Ok(leftover) => leftover,
            Err(err) => {
                warn!("ws[{}] handshake failed: {}", id, err);
                shared.with_engine(|engine| ((), engine.force_close()));
                shared.stop();
                return Err(err);
            }
        };
        reader.set_read_timeout(None)?;

        let max_frame_size = config.limits.max_frame_size;
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("ws-{id}"))
            .spawn(move || {
                read_loop(&thread_shared, Cursor::new(leftover).chain(reader), max_frame_size);
            })
            .map_err(Error::from)?;

        Ok((
            Self {
                shared,
                reader: Some(handle),
            },
            events_rx,
        ))
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn handshake_finished(&self) -> bool {
        self.shared.engine().handshake_finished()
    }

    pub fn response_status(&self) -> Option<u16> {
        self.shared.engine().response_status()
    }

    pub fn response_headers(&self) -> Option<HashMap<String, String>> {
        self.shared.engine().response_headers().cloned()
    }

    pub fn has_sent_close(&self) -> bool {
        self.shared.engine().has_sent_close()
    }

    pub fn has_received_close(&self) -> bool {
        self.shared.engine().has_received_close()
    }

    pub fn closed_by_server(&self) -> bool {
        self.shared.engine().closed_by_server()
    }

    /// # Errors
    ///
    /// `Error::InvalidState` unless open, `Error::MessageTooLarge`, or a
    /// transport error.
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send(|engine| engine.send_text(text))
    }

    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub fn send_text_fragmented(&self, text: &str, per_size: usize) -> Result<()> {
        self.send(|engine| engine.send_text_fragmented(text, per_size))
    }

    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.send(|engine| engine.send_binary(data))
    }

    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub fn send_binary_fragmented(&self, data: &[u8], per_size: usize) -> Result<()> {
        self.send(|engine| engine.send_binary_fragmented(data, per_size))
    }

    /// # Errors
    ///
    /// `Error::InvalidState` once closed, or a transport error.
    pub fn send_frame(&self, frame: Frame, chop_size: Option<usize>) -> Result<()> {
        self.send(|engine| engine.send_frame(frame, chop_size))
    }

    /// # Errors
    ///
    /// `Error::InvalidState` once closed, or a transport error.
    pub fn send_raw(&self, bytes: Vec<u8>) -> Result<()> {
        self.send(|engine| engine.send_raw(bytes))
    }

    /// # Errors
    ///
    /// `Error::InvalidState` unless open, `Error::ControlFrameTooLarge`, or
    /// a transport error.
    pub fn ping(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(|engine| engine.ping(data))
    }

    /// # Errors
    ///
    /// See [`ping`](Self::ping).
    pub fn pong(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(|engine| engine.pong(data))
    }

    /// Run the close handshake, blocking until the connection is closed or
    /// the close timeout forces it shut.
    ///
    /// # Errors
    ///
    /// `Error::InvalidCloseCode` for reserved codes,
    /// `Error::ControlFrameTooLarge` for an oversized reason.
    pub fn close(&self, code: CloseCode, reason: impl Into<Vec<u8>>) -> Result<()> {
        let queued = self.shared.with_engine(|engine| match engine.state() {
            ConnectionState::Closed => (Ok(false), Vec::new()),
            _ => (engine.close(code, reason).map(|()| true), Vec::new()),
        });
        if !queued? {
            return Ok(());
        }
        let _ = self.shared.flush();

        let engine = self.shared.engine();
        let (engine, wait) = self
            .shared
            .changed
            .wait_timeout_while(engine, self.shared.close_timeout, |engine| {
                engine.state() != ConnectionState::Closed
            })
            .unwrap_or_else(PoisonError::into_inner);
        drop(engine);

        if wait.timed_out() {
            warn!("ws[{}] close timed out", self.shared.id);
            self.disconnect();
        }
        Ok(())
    }

    /// Close with code 1000 and no reason.
    ///
    /// # Errors
    ///
    /// See [`close`](Self::close).
    pub fn close_normal(&self) -> Result<()> {
        self.close(CloseCode::Normal, "")
    }

    /// Shut the transport down without a close handshake.
    pub fn disconnect(&self) {
        debug!("ws[{}] disconnect", self.shared.id);
        self.shared.with_engine(|engine| ((), engine.force_close()));
        self.shared.stop();
    }

    /// Wait for the reader thread to exit.
    pub fn join(mut self) {
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("ws[{}] reader thread panicked", self.shared.id);
            }
        }
    }

    fn send(&self, queue: impl FnOnce(&mut Engine) -> Result<()>) -> Result<()> {
        self.shared.with_engine(|engine| (queue(engine), Vec::new()))?;
        self.shared.flush()
    }
}

impl<S: BlockingTransport> Drop for BlockingClient<S> {
    fn drop(&mut self) {
        if self.reader.is_some() && self.shared.state() != ConnectionState::Closed {
            self.disconnect();
        }
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

// Returns the bytes read past the end of the response head.
fn read_handshake<S: BlockingTransport>(
    shared: &Shared<S>,
    reader: &mut S,
    config: &Config,
) -> Result<Vec<u8>> {
    let timeout = config.timeouts.handshake;
    let deadline = Instant::now() + timeout;
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::HandshakeTimeout(timeout));
        }
        reader.set_read_timeout(Some(remaining))?;

        let n = match reader.read(&mut buf) {
            Ok(0) => {
                return Err(Error::InvalidHandshake(
                    "connection closed during handshake".to_string(),
                ));
            }
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if is_timeout(&err) => return Err(Error::HandshakeTimeout(timeout)),
            Err(err) => return Err(err.into()),
        };

        let fed = shared.with_engine(|engine| (engine.feed_handshake(&buf[..n]), Vec::new()));
        if let Some(leftover) = fed? {
            return Ok(leftover);
        }
    }
}

fn read_loop<S: BlockingTransport>(
    shared: &Shared<S>,
    mut reader: Chain<Cursor<Vec<u8>>, S>,
    max_frame_size: usize,
) {
    let id = shared.id;
    let mut close_deadline: Option<Instant> = None;
    let mut framing_broken = false;
    let mut scratch = [0u8; 4096];

    loop {
        if shared.stopped.load(Ordering::Acquire) {
            debug!("ws[{}] reader stopped", id);
            break;
        }
        match shared.state() {
            ConnectionState::Closed => break,
            ConnectionState::Closing if close_deadline.is_none() => {
                close_deadline = Some(Instant::now() + shared.close_timeout);
            }
            _ => {}
        }

        if let Some(at) = close_deadline {
            let remaining = at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("ws[{}] no close from server within {:?}", id, shared.close_timeout);
                shared.with_engine(|engine| ((), engine.force_close()));
                break;
            }
            if let Err(err) = reader.get_ref().1.set_read_timeout(Some(remaining)) {
                shared.with_engine(|engine| ((), engine.transport_closed(err.into())));
                break;
            }
        }

        let result = if framing_broken {
            // Frames can no longer be delimited; drain until the server
            // closes or the close timeout expires.
            match reader.read(&mut scratch) {
                Ok(0) => Err(Error::ConnectionClosed),
                Ok(n) => {
                    trace!("ws[{}] discarding {} bytes", id, n);
                    continue;
                }
                Err(err) => Err(err.into()),
            }
        } else {
            read_frame(&mut reader, max_frame_size)
        };

        match result {
            Ok(frame) => {
                // A header without a usable length leaves no way to find the
                // next frame.
                framing_broken = frame.payload_len().is_none();
                shared.with_engine(|engine| ((), engine.feed_frame(frame)));
                if shared.flush().is_err() {
                    break;
                }
            }
            Err(err @ (Error::ConnectionClosed | Error::Io(_))) => {
                if shared.stopped.load(Ordering::Acquire) {
                    break;
                }
                if close_deadline.is_some() && !matches!(err, Error::ConnectionClosed) {
                    // Read timeouts land here while closing.
                    shared.with_engine(|engine| ((), engine.force_close()));
                } else {
                    shared.with_engine(|engine| ((), engine.transport_closed(err)));
                }
                break;
            }
            Err(err) => {
                framing_broken = true;
                shared.with_engine(|engine| ((), engine.framing_error(err)));
                if shared.flush().is_err() {
                    break;
                }
            }
        }
    }

    if let Err(err) = shared.writer().shutdown_both() {
        trace!("ws[{}] shutdown: {}", id, err);
    }
    debug!("ws[{}] reader finished", id);
}
